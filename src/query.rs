//! Query model
//!
//! [`QueryNode`] is the JSON intermediate representation every data access
//! goes through. It is what remote callers send and what the SQL compiler
//! consumes:
//!
//! ```json
//! {"type": "select", "table": "users", "fields": "*",
//!  "where": {"left": "age", "operator": ">", "right": 35},
//!  "orderBy": ["last_name", "age DESC"], "limit": 10}
//! ```
//!
//! Operators are matched case-insensitively on the wire (`"and"`,
//! `"is null"`), and `"!="` is read as `<>`. Serialization always emits the
//! upper-case SQL spelling.
//!
//! [`SelectQuery`] is the fluent builder for select nodes.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{DataAccessError, Result};
use crate::field::FieldDescriptor;
use crate::schema::EntitySchema;
use crate::store::TenantStore;
use crate::value::Value;

/// Operators of a condition expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<>")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "IS NULL")]
    IsNull,
    #[serde(rename = "IS NOT NULL")]
    IsNotNull,
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "NOT LIKE")]
    NotLike,
    #[serde(rename = "ILIKE")]
    ILike,
}

impl Operator {
    const ALL: [Operator; 13] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::IsNull,
        Operator::IsNotNull,
        Operator::And,
        Operator::Or,
        Operator::Like,
        Operator::NotLike,
        Operator::ILike,
    ];

    /// SQL spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::ILike => "ILIKE",
        }
    }

    /// Symbolic comparison, rendered without spaces around the operator
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Eq | Operator::Ne | Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte
        )
    }

    /// Null test, which takes no right operand
    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }

    /// Boolean connective, whose operands are both expressions
    pub fn is_boolean(&self) -> bool {
        matches!(self, Operator::And | Operator::Or)
    }
}

impl FromStr for Operator {
    type Err = DataAccessError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "!=" {
            return Ok(Operator::Ne);
        }
        let upper = s.to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == upper)
            .ok_or_else(|| DataAccessError::invalid_query(format!("Unknown operator '{}'", s)))
    }
}

impl TryFrom<String> for Operator {
    type Error = DataAccessError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a condition
///
/// On the left, a string is a column reference; on the right it is a
/// literal. Either side may be a nested expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Expression(Box<Condition>),
    Value(serde_json::Value),
}

impl Default for Operand {
    fn default() -> Self {
        Operand::Value(serde_json::Value::Null)
    }
}

impl From<Condition> for Operand {
    fn from(condition: Condition) -> Self {
        Operand::Expression(Box::new(condition))
    }
}

/// Binary condition tree node `{left, operator, right}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub left: Operand,
    pub operator: Operator,
    #[serde(default)]
    pub right: Operand,
}

impl Condition {
    pub fn new(left: impl Into<Operand>, operator: Operator, right: impl Into<Operand>) -> Self {
        Self {
            left: left.into(),
            operator,
            right: right.into(),
        }
    }

    /// Leaf comparing `column` with a literal
    pub fn compare(column: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            left: Operand::Value(serde_json::Value::String(column.into())),
            operator,
            right: Operand::Value(value.to_json()),
        }
    }

    /// Leaf applying a null test to `column`
    pub fn unary(column: impl Into<String>, operator: Operator) -> Self {
        Self {
            left: Operand::Value(serde_json::Value::String(column.into())),
            operator,
            right: Operand::default(),
        }
    }

    /// `(self AND other)`, with `self` as the left child
    pub fn and(self, other: Condition) -> Self {
        Self::new(self, Operator::And, other)
    }

    /// `(self OR other)`, with `self` as the left child
    pub fn or(self, other: Condition) -> Self {
        Self::new(self, Operator::Or, other)
    }

    /// Column name when the left side is a plain column reference
    pub fn left_column(&self) -> Option<&str> {
        match &self.left {
            Operand::Value(serde_json::Value::String(column)) => Some(column),
            _ => None,
        }
    }
}

/// Field list of a select node
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "FieldListRepr", into = "FieldListRepr")]
pub enum FieldList {
    /// Every whitelisted column (`"*"`)
    #[default]
    All,
    /// Row count (`"COUNT(*)"`)
    Count,
    /// Explicit physical column names
    Columns(Vec<String>),
}

const ALL_FIELDS: &str = "*";
const COUNT_FIELDS: &str = "COUNT(*)";

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FieldListRepr {
    One(String),
    Many(Vec<String>),
}

impl TryFrom<FieldListRepr> for FieldList {
    type Error = String;

    fn try_from(repr: FieldListRepr) -> std::result::Result<Self, Self::Error> {
        let columns = match repr {
            FieldListRepr::One(field) if field == ALL_FIELDS => return Ok(FieldList::All),
            FieldListRepr::One(field) if field == COUNT_FIELDS => return Ok(FieldList::Count),
            FieldListRepr::One(field) => vec![field],
            FieldListRepr::Many(fields) => fields,
        };
        match columns.as_slice() {
            [] => Err("Field list must not be empty".to_string()),
            [only] if only == ALL_FIELDS => Ok(FieldList::All),
            _ if columns.iter().any(|c| c == ALL_FIELDS) => {
                Err("'*' cannot be combined with other fields".to_string())
            }
            _ => Ok(FieldList::Columns(columns)),
        }
    }
}

impl From<FieldList> for FieldListRepr {
    fn from(fields: FieldList) -> Self {
        match fields {
            FieldList::All => FieldListRepr::One(ALL_FIELDS.to_string()),
            FieldList::Count => FieldListRepr::One(COUNT_FIELDS.to_string()),
            FieldList::Columns(columns) => FieldListRepr::Many(columns),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectNode {
    pub table: String,
    #[serde(default)]
    pub fields: FieldList,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(rename = "orderBy", default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

/// Column values of one inserted record, keyed by physical column name
pub type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertNode {
    pub table: String,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    #[serde(rename = "where")]
    pub condition: Condition,
    pub updates: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateNode {
    pub table: String,
    pub records: Vec<UpdateRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRecord {
    #[serde(rename = "where")]
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteNode {
    pub table: String,
    pub records: Vec<DeleteRecord>,
}

/// Wire-format query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueryNode {
    Select(SelectNode),
    Insert(InsertNode),
    Update(UpdateNode),
    Delete(DeleteNode),
}

impl QueryNode {
    pub fn table(&self) -> &str {
        match self {
            QueryNode::Select(node) => &node.table,
            QueryNode::Insert(node) => &node.table,
            QueryNode::Update(node) => &node.table,
            QueryNode::Delete(node) => &node.table,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueryNode::Select(_) => "select",
            QueryNode::Insert(_) => "insert",
            QueryNode::Update(_) => "update",
            QueryNode::Delete(_) => "delete",
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| DataAccessError::invalid_query(format!("Malformed query: {}", e)))
    }
}

/// Anything naming a physical column
pub trait ColumnRef {
    fn column(&self) -> &str;
}

impl ColumnRef for &str {
    fn column(&self) -> &str {
        self
    }
}

impl ColumnRef for String {
    fn column(&self) -> &str {
        self
    }
}

impl ColumnRef for &FieldDescriptor {
    fn column(&self) -> &str {
        self.column_name()
    }
}

/// Fluent builder of select queries
#[derive(Debug, Clone)]
pub struct SelectQuery {
    schema: Option<Arc<EntitySchema>>,
    table: String,
    fields: FieldList,
    condition: Option<Condition>,
    order_by: Vec<String>,
    limit: Option<u64>,
}

impl SelectQuery {
    /// Select over a raw table name; rows cannot be rehydrated into entities
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: table.into(),
            fields: FieldList::All,
            condition: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn for_schema(schema: Arc<EntitySchema>) -> Self {
        let mut query = Self::new(schema.table());
        query.schema = Some(schema);
        query
    }

    /// Add columns to the field list
    ///
    /// The first call replaces the `"*"` sentinel, later calls append.
    pub fn select<C: ColumnRef>(mut self, columns: impl IntoIterator<Item = C>) -> Self {
        let mut selected = match std::mem::take(&mut self.fields) {
            FieldList::Columns(existing) => existing,
            FieldList::All | FieldList::Count => Vec::new(),
        };
        selected.extend(columns.into_iter().map(|c| c.column().to_string()));
        self.fields = if selected.is_empty() {
            FieldList::All
        } else {
            FieldList::Columns(selected)
        };
        self
    }

    /// Add a condition, folding any existing root in as the left operand of
    /// a new `AND` node
    pub fn filter(mut self, condition: Condition) -> Self {
        self.condition = Some(match self.condition.take() {
            Some(root) => root.and(condition),
            None => condition,
        });
        self
    }

    pub fn sort(mut self, column: impl ColumnRef) -> Self {
        self.order_by.push(column.column().to_string());
        self
    }

    pub fn sort_down(mut self, column: impl ColumnRef) -> Self {
        self.order_by.push(format!("{} DESC", column.column()));
        self
    }

    /// Limit the number of rows; must be positive, last call wins
    pub fn limit(mut self, limit: i64) -> Result<Self> {
        if limit <= 0 {
            return Err(DataAccessError::invalid_argument(format!(
                "Limit must be a positive integer, got {}",
                limit
            )));
        }
        self.limit = Some(limit as u64);
        Ok(self)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> Option<&Arc<EntitySchema>> {
        self.schema.as_ref()
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    pub fn to_node(&self) -> QueryNode {
        QueryNode::Select(SelectNode {
            table: self.table.clone(),
            fields: self.fields.clone(),
            condition: self.condition.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
        })
    }

    /// Node counting the rows matched by this query's condition
    pub fn to_count_node(&self) -> QueryNode {
        QueryNode::Select(SelectNode {
            table: self.table.clone(),
            fields: FieldList::Count,
            condition: self.condition.clone(),
            order_by: Vec::new(),
            limit: None,
        })
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        self.to_node().to_json()
    }

    /// Run the query and rehydrate every row
    pub async fn all(&self, store: &TenantStore) -> Result<Vec<Entity>> {
        store.fetch_all(self).await
    }

    /// Count matching rows
    pub async fn count(&self, store: &TenantStore) -> Result<u64> {
        store.count(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(column: &str, value: i64) -> Condition {
        Condition::compare(column, Operator::Eq, Value::from(value))
    }

    // =========================================================================
    // Builder
    // =========================================================================

    #[test]
    fn test_defaults_to_all_fields() {
        let json = SelectQuery::new("users").to_json().unwrap();
        assert_eq!(json, json!({"type": "select", "table": "users", "fields": "*"}));
    }

    #[test]
    fn test_select_replaces_sentinel_then_appends() {
        let query = SelectQuery::new("users")
            .select(["first_name"])
            .select(["last_name", "age"]);
        assert_eq!(
            query.to_json().unwrap()["fields"],
            json!(["first_name", "last_name", "age"])
        );
    }

    #[test]
    fn test_select_accepts_descriptors() {
        let first = FieldDescriptor::string("firstName").column("first_name");
        let query = SelectQuery::new("users").select([&first]);
        assert_eq!(query.to_json().unwrap()["fields"], json!(["first_name"]));
    }

    #[test]
    fn test_where_left_associative() {
        let (a, b, c) = (cond("a", 1), cond("b", 2), cond("c", 3));
        let query = SelectQuery::new("t")
            .filter(a.clone())
            .filter(b.clone())
            .filter(c.clone());
        let expected = Condition::new(Condition::new(a, Operator::And, b), Operator::And, c);
        assert_eq!(query.condition(), Some(&expected));

        let json = query.to_json().unwrap();
        assert_eq!(
            json["where"],
            json!({
                "left": {
                    "left": {"left": "a", "operator": "=", "right": 1},
                    "operator": "AND",
                    "right": {"left": "b", "operator": "=", "right": 2}
                },
                "operator": "AND",
                "right": {"left": "c", "operator": "=", "right": 3}
            })
        );
    }

    #[test]
    fn test_sort_preserves_order() {
        let query = SelectQuery::new("users").sort("last_name").sort_down("age").sort("id");
        assert_eq!(
            query.to_json().unwrap()["orderBy"],
            json!(["last_name", "age DESC", "id"])
        );
    }

    #[test]
    fn test_limit_validation() {
        assert!(matches!(
            SelectQuery::new("users").limit(0),
            Err(DataAccessError::InvalidArgument(_))
        ));
        assert!(SelectQuery::new("users").limit(-3).is_err());
        let query = SelectQuery::new("users").limit(5).unwrap().limit(20).unwrap();
        assert_eq!(query.to_json().unwrap()["limit"], json!(20));
    }

    #[test]
    fn test_serialization_is_stable() {
        let query = SelectQuery::new("users").filter(cond("age", 30)).sort("age");
        assert_eq!(query.to_json().unwrap(), query.to_json().unwrap());
    }

    #[test]
    fn test_count_node() {
        let query = SelectQuery::new("users").filter(cond("age", 30)).sort("age");
        let json = query.to_count_node().to_json().unwrap();
        assert_eq!(json["fields"], json!("COUNT(*)"));
        assert!(json.get("orderBy").is_none());
    }

    // =========================================================================
    // Wire format
    // =========================================================================

    #[test]
    fn test_parse_update_node() {
        let node = QueryNode::from_json(json!({
            "type": "update",
            "table": "users",
            "records": [{
                "where": {"left": "id", "operator": "=", "right": "a00aaaaaaaaaaaa"},
                "updates": {"age": 31}
            }]
        }))
        .unwrap();
        let QueryNode::Update(update) = &node else {
            panic!("expected update node");
        };
        assert_eq!(update.records[0].condition.left_column(), Some("id"));
        assert_eq!(update.records[0].updates["age"], json!(31));
        assert_eq!(node.table(), "users");
        assert_eq!(node.kind(), "update");
    }

    #[test]
    fn test_parse_rejects_unknown_operator() {
        let result = QueryNode::from_json(json!({
            "type": "select",
            "table": "users",
            "where": {"left": "age", "operator": "; DROP", "right": 1}
        }));
        assert!(matches!(result, Err(DataAccessError::InvalidQuery(_))));
    }

    #[test]
    fn test_operators_are_case_insensitive() {
        let node = QueryNode::from_json(json!({
            "type": "select",
            "table": "users",
            "where": {
                "left": {"left": "age", "operator": "is not null"},
                "operator": "and",
                "right": {"left": "last_name", "operator": "ilike", "right": "sm%"}
            }
        }))
        .unwrap();
        let QueryNode::Select(select) = &node else {
            panic!("expected select node");
        };
        let condition = select.condition.as_ref().unwrap();
        assert_eq!(condition.operator, Operator::And);
        assert_eq!(node.to_json().unwrap()["where"]["operator"], json!("AND"));
        assert_eq!("Not Like".parse::<Operator>().unwrap(), Operator::NotLike);
        assert_eq!("!=".parse::<Operator>().unwrap(), Operator::Ne);
        assert!("LIKE ".parse::<Operator>().is_err());
    }

    #[test]
    fn test_parse_rejects_mixed_star() {
        let result = QueryNode::from_json(json!({
            "type": "select", "table": "users", "fields": ["*", "age"]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_null_test_without_right() {
        let node = QueryNode::from_json(json!({
            "type": "select",
            "table": "users",
            "where": {"left": "age", "operator": "IS NULL"}
        }))
        .unwrap();
        let QueryNode::Select(select) = node else {
            panic!("expected select node");
        };
        let condition = select.condition.unwrap();
        assert_eq!(condition.operator, Operator::IsNull);
        assert_eq!(condition.right, Operand::default());
    }
}
