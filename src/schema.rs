//! Entity schemas
//!
//! An [`EntitySchema`] is the descriptor set of one tenant table: the base
//! identifier field followed by the declared fields, computed once when the
//! schema is built. Schemas are registered by logical name in a
//! [`SchemaRegistry`], which is also what reference fields resolve through.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{DataAccessError, Result};
use crate::field::{FieldDescriptor, FieldType, ReferenceTarget};
use crate::query::SelectQuery;
use crate::sql::sanitize::validate_identifier;

/// Logical and physical name of the identifier field every schema starts with
pub const ID_FIELD: &str = "id";

/// Field descriptors of one tenant table
#[derive(Debug)]
pub struct EntitySchema {
    name: String,
    table: String,
    namespace: Option<String>,
    fields: Vec<FieldDescriptor>,
    by_name: HashMap<String, usize>,
    by_column: HashMap<String, usize>,
}

impl EntitySchema {
    /// Start building a schema for the logical entity `name` stored in `table`
    pub fn builder(name: impl Into<String>, table: impl Into<String>) -> EntitySchemaBuilder {
        EntitySchemaBuilder {
            name: name.into(),
            table: table.into(),
            namespace: None,
            id_column: ID_FIELD.to_string(),
            fields: Vec::new(),
        }
    }

    /// Build a schema from a JSON table definition
    pub fn from_definition(definition: &TableDefinition) -> Result<Arc<Self>> {
        let table = definition
            .db_name
            .clone()
            .unwrap_or_else(|| definition.name.clone());
        let mut builder = Self::builder(&definition.name, table);
        if let Some(namespace) = &definition.namespace {
            builder = builder.namespace(namespace);
        }
        for field in definition.fields.iter().filter(|f| f.name != ID_FIELD) {
            builder = builder.field(field.to_descriptor()?);
        }
        builder.build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// All fields, the identifier first
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn id_field(&self) -> &FieldDescriptor {
        &self.fields[0]
    }

    /// Look up a field by logical name
    pub fn field(&self, name: &str) -> Result<&FieldDescriptor> {
        self.by_name
            .get(name)
            .map(|&idx| &self.fields[idx])
            .ok_or_else(|| {
                DataAccessError::unknown_field(format!(
                    "Field '{}' does not exist on entity '{}'",
                    name, self.name
                ))
            })
    }

    /// Look up a field by physical column name
    pub fn field_by_column(&self, column: &str) -> Option<&FieldDescriptor> {
        self.by_column.get(column).map(|&idx| &self.fields[idx])
    }

    /// Physical column names in declaration order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(FieldDescriptor::column_name)
    }

    /// Start a select query over this entity's table
    pub fn select(self: &Arc<Self>) -> SelectQuery {
        SelectQuery::for_schema(Arc::clone(self))
    }
}

/// Builder for [`EntitySchema`]
#[derive(Debug)]
pub struct EntitySchemaBuilder {
    name: String,
    table: String,
    namespace: Option<String>,
    id_column: String,
    fields: Vec<FieldDescriptor>,
}

impl EntitySchemaBuilder {
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the physical column of the base identifier field
    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Validate names and compose the base field list with the declared fields
    pub fn build(self) -> Result<Arc<EntitySchema>> {
        if self.name.is_empty() {
            return Err(DataAccessError::invalid_argument("Entity name must not be empty"));
        }
        validate_identifier(&self.table).map_err(DataAccessError::InvalidArgument)?;

        let mut fields = Vec::with_capacity(self.fields.len() + 1);
        fields.push(FieldDescriptor::id(ID_FIELD).column(self.id_column));
        fields.extend(self.fields);

        let mut by_name = HashMap::with_capacity(fields.len());
        let mut by_column = HashMap::with_capacity(fields.len());
        for (idx, field) in fields.iter().enumerate() {
            if field.name().is_empty() {
                return Err(DataAccessError::invalid_argument(format!(
                    "Entity '{}' declares a field without a name",
                    self.name
                )));
            }
            validate_identifier(field.column_name()).map_err(DataAccessError::InvalidArgument)?;
            if by_name.insert(field.name().to_string(), idx).is_some() {
                return Err(DataAccessError::invalid_argument(format!(
                    "Field '{}' is declared twice on entity '{}'",
                    field.name(),
                    self.name
                )));
            }
            if by_column.insert(field.column_name().to_string(), idx).is_some() {
                return Err(DataAccessError::invalid_argument(format!(
                    "Column '{}' is mapped twice on entity '{}'",
                    field.column_name(),
                    self.name
                )));
            }
        }

        Ok(Arc::new(EntitySchema {
            name: self.name,
            table: self.table,
            namespace: self.namespace,
            fields,
            by_name,
            by_column,
        }))
    }
}

/// Anything that names a field of a schema
pub trait FieldSelector {
    fn resolve<'s>(&self, schema: &'s EntitySchema) -> Result<&'s FieldDescriptor>;
}

impl FieldSelector for &str {
    fn resolve<'s>(&self, schema: &'s EntitySchema) -> Result<&'s FieldDescriptor> {
        schema.field(self)
    }
}

impl FieldSelector for String {
    fn resolve<'s>(&self, schema: &'s EntitySchema) -> Result<&'s FieldDescriptor> {
        schema.field(self)
    }
}

impl FieldSelector for &String {
    fn resolve<'s>(&self, schema: &'s EntitySchema) -> Result<&'s FieldDescriptor> {
        schema.field(self)
    }
}

/// A descriptor resolves only if the schema has a field of the same name
/// mapped to the same column
impl FieldSelector for &FieldDescriptor {
    fn resolve<'s>(&self, schema: &'s EntitySchema) -> Result<&'s FieldDescriptor> {
        let field = schema.field(self.name())?;
        if field.column_name() == self.column_name() {
            Ok(field)
        } else {
            Err(DataAccessError::unknown_field(format!(
                "Field '{}' ({}) does not belong to entity '{}'",
                self.name(),
                self.column_name(),
                schema.name()
            )))
        }
    }
}

/// Field entry of a JSON table definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal_places: Option<u8>,
    #[serde(rename = "foreignObject", default, skip_serializing_if = "Option::is_none")]
    pub foreign_object: Option<String>,
    #[serde(rename = "foreignLookupField", default, skip_serializing_if = "Option::is_none")]
    pub foreign_lookup_field: Option<String>,
    #[serde(rename = "foreignRelationName", default, skip_serializing_if = "Option::is_none")]
    pub foreign_relation_name: Option<String>,
}

impl FieldDefinition {
    /// Convert to a descriptor; unknown type names fail with `InvalidArgument`
    pub fn to_descriptor(&self) -> Result<FieldDescriptor> {
        let field_type = match self.field_type.as_str() {
            "id" => FieldType::Id,
            "string" | "text" => FieldType::String,
            "boolean" => FieldType::Boolean,
            "integer" => FieldType::Integer,
            "number" => FieldType::Number {
                decimal_places: self.decimal_places,
            },
            "date" => FieldType::Date,
            "datetime" => FieldType::DateTime,
            "reference" => {
                let entity = self.foreign_object.clone().ok_or_else(|| {
                    DataAccessError::invalid_argument(format!(
                        "Reference field '{}' has no foreignObject",
                        self.name
                    ))
                })?;
                FieldType::Reference(ReferenceTarget {
                    entity,
                    lookup_column: self
                        .foreign_lookup_field
                        .clone()
                        .unwrap_or_else(|| ID_FIELD.to_string()),
                    inverse_relation: self.foreign_relation_name.clone(),
                })
            }
            other => {
                return Err(DataAccessError::invalid_argument(format!(
                    "Unknown type '{}' for field '{}'",
                    other, self.name
                )));
            }
        };

        let mut descriptor = FieldDescriptor::new(&self.name, field_type);
        if let Some(column) = &self.db_name {
            descriptor = descriptor.column(column);
        }
        if self.required {
            descriptor = descriptor.required();
        }
        Ok(descriptor)
    }
}

/// JSON definition of one tenant table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

/// Either a single table definition or `{"tables": [...]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaDefinition {
    Tables { tables: Vec<TableDefinition> },
    Table(TableDefinition),
}

impl SchemaDefinition {
    pub fn into_tables(self) -> Vec<TableDefinition> {
        match self {
            SchemaDefinition::Tables { tables } => tables,
            SchemaDefinition::Table(table) => vec![table],
        }
    }
}

static NEXT_REGISTRY_KEY: AtomicU64 = AtomicU64::new(1);

fn next_registry_key() -> u64 {
    NEXT_REGISTRY_KEY.fetch_add(1, Ordering::Relaxed)
}

/// Schemas of one tenant keyed by logical entity name
///
/// Every registry, clone or registration gets a fresh key, which reference
/// fields use to tell whether their cached target is still current.
#[derive(Debug)]
pub struct SchemaRegistry {
    key: u64,
    schemas: HashMap<String, Arc<EntitySchema>>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self {
            key: next_registry_key(),
            schemas: HashMap::new(),
        }
    }
}

impl Clone for SchemaRegistry {
    fn clone(&self) -> Self {
        Self {
            key: next_registry_key(),
            schemas: self.schemas.clone(),
        }
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn key(&self) -> u64 {
        self.key
    }

    /// Parse a JSON definition document and register every table in it
    pub fn from_json(json: &str) -> Result<Self> {
        let definition: SchemaDefinition = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for table in definition.into_tables() {
            registry.register(EntitySchema::from_definition(&table)?);
        }
        Ok(registry)
    }

    /// Register a schema, replacing any previous schema of the same name
    pub fn register(&mut self, schema: Arc<EntitySchema>) -> Option<Arc<EntitySchema>> {
        self.key = next_registry_key();
        self.schemas.insert(schema.name().to_string(), schema)
    }

    pub fn get(&self, name: &str) -> Option<Arc<EntitySchema>> {
        self.schemas.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}
