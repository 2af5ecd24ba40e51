//! Field type system
//!
//! A [`FieldDescriptor`] maps a logical field name to a physical column and
//! owns the coercion rules of its [`FieldType`]. Coercion is the single gate
//! every value passes through before it is cached on an entity or rehydrated
//! from a database row.

use std::sync::{Arc, LazyLock, OnceLock, Weak};

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::{Captures, Regex};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{DataAccessError, Result};
use crate::id::Identifier;
use crate::query::{Condition, Operator};
use crate::schema::{EntitySchema, SchemaRegistry};
use crate::value::Value;

fn default_lookup_column() -> String {
    "id".to_string()
}

/// Target of a reference field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceTarget {
    /// Logical name of the referenced entity, resolved through a [`SchemaRegistry`]
    pub entity: String,
    /// Column looked up on the referenced entity (default: `id`)
    #[serde(default = "default_lookup_column")]
    pub lookup_column: String,
    /// Name of the inverse relation on the referenced entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse_relation: Option<String>,
}

/// Field type with coercion rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    /// Record identifier
    Id,

    /// Text; identifiers are accepted and stringified
    String,

    /// Boolean; also accepts the strings `"true"` and `"false"`
    Boolean,

    /// Whole number; decimals are floored
    Integer,

    /// Floating point number, optionally rounded to a fixed number of decimals
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        decimal_places: Option<u8>,
    },

    /// Calendar date, stored as midnight UTC
    Date,

    /// Point in time, normalized to UTC
    #[serde(rename = "datetime")]
    DateTime,

    /// Identifier of a record of another entity
    Reference(ReferenceTarget),
}

impl FieldType {
    /// Coerce a non-null value into the canonical representation of this type
    ///
    /// Malformed strings fail with [`DataAccessError::Format`], values of an
    /// unsupported kind with [`DataAccessError::TypeMismatch`].
    pub fn coerce(&self, field: &str, value: Value) -> Result<Value> {
        match self {
            FieldType::Id | FieldType::Reference(_) => coerce_id(field, value),
            FieldType::String => coerce_string(field, value),
            FieldType::Boolean => coerce_boolean(field, value),
            FieldType::Integer => coerce_integer(field, value),
            FieldType::Number { decimal_places } => coerce_number(field, value, *decimal_places),
            FieldType::Date => coerce_timestamp(field, value).map(|ts| {
                Value::Timestamp(truncate_to_midnight(ts))
            }),
            FieldType::DateTime => coerce_timestamp(field, value).map(Value::Timestamp),
        }
    }

    /// Name used for this type in table definitions
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::Id => "id",
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::Number { .. } => "number",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::Reference(_) => "reference",
        }
    }
}

fn mismatch(field: &str, expected: &str, value: &Value) -> DataAccessError {
    DataAccessError::type_mismatch(format!(
        "Value of {} field '{}' must be a {}, got {}",
        expected,
        field,
        expected,
        value.kind()
    ))
}

fn coerce_id(field: &str, value: Value) -> Result<Value> {
    match value {
        Value::Id(id) => Ok(Value::Id(id)),
        Value::String(s) => Identifier::try_from(s)
            .map(Value::Id)
            .map_err(|e| DataAccessError::format(format!("Field '{}': {}", field, e))),
        other => Err(mismatch(field, "id", &other)),
    }
}

fn coerce_string(field: &str, value: Value) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(s)),
        Value::Id(id) => Ok(Value::String(id.into())),
        other => Err(mismatch(field, "string", &other)),
    }
}

fn coerce_boolean(field: &str, value: Value) -> Result<Value> {
    match value {
        Value::Bool(b) => Ok(Value::Bool(b)),
        Value::String(s) => match s.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(DataAccessError::format(format!(
                "Cannot convert '{}' to boolean for field '{}'",
                s, field
            ))),
        },
        other => Err(mismatch(field, "boolean", &other)),
    }
}

fn coerce_integer(field: &str, value: Value) -> Result<Value> {
    let number = match value {
        Value::Integer(i) => return Ok(Value::Integer(i)),
        Value::Number(n) => n,
        Value::String(s) => parse_exact_number(&s).ok_or_else(|| {
            DataAccessError::format(format!(
                "Cannot convert '{}' to integer for field '{}'",
                s, field
            ))
        })?,
        other => return Err(mismatch(field, "integer", &other)),
    };
    let floored = number.floor();
    if !floored.is_finite() || floored < i64::MIN as f64 || floored >= i64::MAX as f64 {
        return Err(DataAccessError::format(format!(
            "Value {} is out of range for integer field '{}'",
            number, field
        )));
    }
    Ok(Value::Integer(floored as i64))
}

fn coerce_number(field: &str, value: Value, decimal_places: Option<u8>) -> Result<Value> {
    let number = match value {
        Value::Integer(i) => i as f64,
        Value::Number(n) => n,
        Value::String(s) => parse_exact_number(&s).ok_or_else(|| {
            DataAccessError::format(format!(
                "Cannot convert '{}' to number for field '{}'",
                s, field
            ))
        })?,
        other => return Err(mismatch(field, "number", &other)),
    };
    if !number.is_finite() {
        return Err(DataAccessError::format(format!(
            "Value of number field '{}' must be finite",
            field
        )));
    }
    Ok(Value::Number(match decimal_places {
        Some(places) => round_to_places(number, places),
        None => number,
    }))
}

fn coerce_timestamp(field: &str, value: Value) -> Result<DateTime<Utc>> {
    match value {
        Value::Timestamp(ts) => Ok(ts),
        Value::Integer(millis) => from_epoch_millis(field, millis),
        Value::Number(n) if n.fract() == 0.0 && n.is_finite() => from_epoch_millis(field, n as i64),
        Value::String(s) => parse_date_string(&s).ok_or_else(|| {
            DataAccessError::format(format!(
                "Value '{}' can not be stored in date field '{}'",
                s, field
            ))
        }),
        other => Err(mismatch(field, "date", &other)),
    }
}

fn from_epoch_millis(field: &str, millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        DataAccessError::format(format!(
            "Epoch value {} is out of range for date field '{}'",
            millis, field
        ))
    })
}

fn truncate_to_midnight(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Round half away from zero on the exact binary value, so `0.125` at two
/// places is `0.13` while `1.005` (stored just below the tie) stays `1.0`
fn round_to_places(number: f64, places: u8) -> f64 {
    Decimal::from_f64_retain(number)
        .map(|d| d.round_dp_with_strategy(u32::from(places), RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_string().parse().ok())
        .unwrap_or(number)
}

/// Parse a numeric string, accepting it only when the parsed number prints
/// back to exactly the same text
///
/// This rejects partial parses such as `"123 "` or `"3.14abc"` as well as
/// alternate spellings like `"+5"`, `"1e3"` or `"1.50"`.
pub fn parse_exact_number(s: &str) -> Option<f64> {
    let parsed: f64 = s.parse().ok()?;
    if parsed.is_finite() && canonical_number_string(parsed) == s {
        Some(parsed)
    } else {
        None
    }
}

/// Canonical shortest decimal text of a number
///
/// Matches the conventional number-to-string conversion of dynamic
/// languages: no trailing `.0`, exponent notation outside `[1e-6, 1e21)`.
pub fn canonical_number_string(number: f64) -> String {
    if number == 0.0 {
        return "0".to_string();
    }
    if number.is_nan() {
        return "NaN".to_string();
    }
    if number.is_infinite() {
        return if number > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = number.abs();
    if (1e-6..1e21).contains(&magnitude) {
        return format!("{}", number);
    }
    let exp = format!("{:e}", number);
    match exp.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            format!("{}e+{}", mantissa, exponent)
        }
        _ => exp,
    }
}

const TIME_PATTERN: &str = r"(?: (\d{1,2}):(\d{2})(?::(\d{2})(?:\.(\d{1,2}))?)?)?";

static YEAR_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^(\d{{4}})-(\d{{1,2}})-(\d{{1,2}}){}$", TIME_PATTERN))
        .expect("date pattern is valid")
});

static YEAR_LAST_DASHED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^(\d{{1,2}})-(\d{{1,2}})-(\d{{4}}){}$", TIME_PATTERN))
        .expect("date pattern is valid")
});

static YEAR_LAST_SLASHED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(\d{{1,2}})/(\d{{1,2}})/(\d{{2}}|\d{{4}}){}$",
        TIME_PATTERN
    ))
    .expect("date pattern is valid")
});

static ISO_8601: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-[01]\d-[0-3]\dT[0-2]\d:[0-5]\d:[0-5]\d\.\d+(?:[+-][0-2]\d:[0-5]\d|Z)$")
        .expect("ISO pattern is valid")
});

/// Parse one of the accepted date string formats
///
/// Accepted: `YYYY-M-D`, `M-D-YYYY`, `M/D/YY` and `M/D/YYYY`, each with an
/// optional ` H:MM[:SS[.ff]]` time, and strict ISO-8601 with fractional
/// seconds and a zone. Strings without a zone are read as UTC. The format
/// is checked before any calendar validation, so strings such as
/// `YYYY/MM/DD` never parse.
pub fn parse_date_string(s: &str) -> Option<DateTime<Utc>> {
    if ISO_8601.is_match(s) {
        return DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }
    if let Some(caps) = YEAR_FIRST.captures(s) {
        return build_timestamp(&caps, 1, 2, 3);
    }
    if let Some(caps) = YEAR_LAST_DASHED.captures(s) {
        return build_timestamp(&caps, 3, 1, 2);
    }
    if let Some(caps) = YEAR_LAST_SLASHED.captures(s) {
        return build_timestamp(&caps, 3, 1, 2);
    }
    None
}

fn build_timestamp(caps: &Captures<'_>, year: usize, month: usize, day: usize) -> Option<DateTime<Utc>> {
    let number = |idx: usize| -> Option<u32> { caps.get(idx).and_then(|m| m.as_str().parse().ok()) };

    let year_text = caps.get(year)?.as_str();
    let mut year_value: i32 = year_text.parse().ok()?;
    if year_text.len() == 2 {
        year_value += if year_value < 50 { 2000 } else { 1900 };
    }
    let date = NaiveDate::from_ymd_opt(year_value, number(month)?, number(day)?)?;

    let time = match caps.get(4) {
        None => NaiveTime::MIN,
        Some(_) => {
            let millis = match caps.get(7) {
                Some(m) if m.as_str().len() == 1 => m.as_str().parse::<u32>().ok()? * 100,
                Some(m) => m.as_str().parse::<u32>().ok()? * 10,
                None => 0,
            };
            NaiveTime::from_hms_milli_opt(number(4)?, number(5)?, number(6).unwrap_or(0), millis)?
        }
    };
    Utc.from_local_datetime(&date.and_time(time)).single()
}

/// Descriptor of one field of an entity schema
#[derive(Debug)]
pub struct FieldDescriptor {
    name: String,
    column: Option<String>,
    field_type: FieldType,
    required: bool,
    /// Reference target, keyed by the registry it was resolved through
    resolved: OnceLock<(u64, Weak<EntitySchema>)>,
}

// Clones start unresolved; they may end up in another tenant's schema.
impl Clone for FieldDescriptor {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            column: self.column.clone(),
            field_type: self.field_type.clone(),
            required: self.required,
            resolved: OnceLock::new(),
        }
    }
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            column: None,
            field_type,
            required: false,
            resolved: OnceLock::new(),
        }
    }

    pub fn id(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Id)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Number { decimal_places: None })
    }

    /// Number field rounded to `places` decimals on every coercion
    pub fn decimal(name: impl Into<String>, places: u8) -> Self {
        Self::new(name, FieldType::Number { decimal_places: Some(places) })
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Date)
    }

    pub fn date_time(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::DateTime)
    }

    /// Reference to the entity registered under `entity`, looked up by `id`
    pub fn reference(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldType::Reference(ReferenceTarget {
                entity: entity.into(),
                lookup_column: default_lookup_column(),
                inverse_relation: None,
            }),
        )
    }

    /// Set the physical column name (defaults to the field name)
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set the lookup column of a reference field; ignored for other types
    pub fn lookup_column(mut self, column: impl Into<String>) -> Self {
        if let FieldType::Reference(target) = &mut self.field_type {
            target.lookup_column = column.into();
        }
        self
    }

    /// Set the inverse relation name of a reference field; ignored for other types
    pub fn inverse_relation(mut self, relation: impl Into<String>) -> Self {
        if let FieldType::Reference(target) = &mut self.field_type {
            target.inverse_relation = Some(relation.into());
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Physical column name
    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn reference_target(&self) -> Option<&ReferenceTarget> {
        match &self.field_type {
            FieldType::Reference(target) => Some(target),
            _ => None,
        }
    }

    /// Coerce a value for this field
    ///
    /// `Null` passes through as unset (`None`) without running the coercion;
    /// the empty string is coerced like any other string.
    pub fn coerce(&self, value: impl Into<Value>) -> Result<Option<Value>> {
        let value = value.into();
        if value.is_null() {
            return Ok(None);
        }
        self.field_type.coerce(&self.name, value).map(Some)
    }

    /// Resolve the schema of the referenced entity
    ///
    /// Resolution happens on first access, so the target may be registered
    /// after this field was declared. The result is cached for the registry
    /// it came from; any other registry is looked up directly.
    pub fn resolve_reference(&self, registry: &SchemaRegistry) -> Result<Arc<EntitySchema>> {
        let target = self.reference_target().ok_or_else(|| {
            DataAccessError::invalid_argument(format!("Field '{}' is not a reference", self.name))
        })?;
        let cached = self
            .resolved
            .get()
            .filter(|(key, _)| *key == registry.key())
            .and_then(|(_, schema)| schema.upgrade());
        if let Some(schema) = cached {
            return Ok(schema);
        }
        let schema = registry.get(&target.entity).ok_or_else(|| {
            DataAccessError::UnresolvedReference(format!(
                "Could not resolve entity '{}' referenced by field '{}'",
                target.entity, self.name
            ))
        })?;
        let _ = self.resolved.set((registry.key(), Arc::downgrade(&schema)));
        Ok(schema)
    }

    fn compare(&self, operator: Operator, value: impl Into<Value>) -> Condition {
        Condition::compare(self.column_name(), operator, value.into())
    }

    pub fn equals(&self, value: impl Into<Value>) -> Condition {
        self.compare(Operator::Eq, value)
    }

    pub fn not_equals(&self, value: impl Into<Value>) -> Condition {
        self.compare(Operator::Ne, value)
    }

    pub fn greater_than(&self, value: impl Into<Value>) -> Condition {
        self.compare(Operator::Gt, value)
    }

    pub fn greater_or_equal_than(&self, value: impl Into<Value>) -> Condition {
        self.compare(Operator::Gte, value)
    }

    pub fn less_than(&self, value: impl Into<Value>) -> Condition {
        self.compare(Operator::Lt, value)
    }

    pub fn less_or_equal_than(&self, value: impl Into<Value>) -> Condition {
        self.compare(Operator::Lte, value)
    }

    pub fn is_null(&self) -> Condition {
        Condition::unary(self.column_name(), Operator::IsNull)
    }

    pub fn is_not_null(&self) -> Condition {
        Condition::unary(self.column_name(), Operator::IsNotNull)
    }
}
