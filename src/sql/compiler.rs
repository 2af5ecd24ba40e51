//! Query compilation
//!
//! Turns a [`QueryNode`] into SQL text after checking every table and column
//! against the tenant catalog. Select compiles to one statement; insert,
//! update and delete compile to one statement per record. A malformed record
//! anywhere in a batch fails the whole batch before any statement is
//! returned.

use crate::catalog::{CatalogTable, TenantCatalog};
use crate::error::{DataAccessError, Result};
use crate::id::Identifier;
use crate::query::{
    Condition, DeleteNode, FieldList, InsertNode, Operand, Operator, QueryNode, Record,
    SelectNode, UpdateNode,
};
use crate::schema::ID_FIELD;
use crate::sql::condition::{build_condition_clause, build_order_by_clause, validate_column};
use crate::sql::sanitize::{escape_literal, validate_identifier};

/// Compiles wire queries against one tenant catalog
#[derive(Debug, Clone, Copy)]
pub struct SqlCompiler<'a> {
    catalog: &'a TenantCatalog,
    id_column: &'a str,
}

impl<'a> SqlCompiler<'a> {
    pub fn new(catalog: &'a TenantCatalog) -> Self {
        Self {
            catalog,
            id_column: ID_FIELD,
        }
    }

    /// Set the identifier column required by update and delete where clauses
    pub fn id_column(mut self, id_column: &'a str) -> Self {
        self.id_column = id_column;
        self
    }

    /// Compile a query into the statements to run, in order
    pub fn compile(&self, node: &QueryNode) -> Result<Vec<String>> {
        match node {
            QueryNode::Select(select) => Ok(vec![self.compile_select(select)?]),
            QueryNode::Insert(insert) => self.compile_insert(insert),
            QueryNode::Update(update) => self.compile_update(update),
            QueryNode::Delete(delete) => self.compile_delete(delete),
        }
    }

    fn table(&self, name: &str) -> Result<&'a CatalogTable> {
        validate_identifier(name).map_err(DataAccessError::UnknownTable)?;
        self.catalog.table(name).ok_or_else(|| {
            DataAccessError::unknown_table(format!(
                "Table '{}' does not exist for organization '{}'",
                name,
                self.catalog.organization_id()
            ))
        })
    }

    fn returning(table: &CatalogTable) -> String {
        table.all_columns().collect::<Vec<_>>().join(", ")
    }

    fn literal(value: &serde_json::Value) -> Result<String> {
        escape_literal(value).map_err(DataAccessError::InvalidQuery)
    }

    fn compile_select(&self, node: &SelectNode) -> Result<String> {
        let table = self.table(&node.table)?;

        let fields = match &node.fields {
            FieldList::All => Self::returning(table),
            FieldList::Count => "COUNT(*) AS count".to_string(),
            FieldList::Columns(columns) => {
                let mut selected: Vec<&str> = Vec::with_capacity(columns.len() + 1);
                for column in columns {
                    validate_column(column, table)?;
                    if !selected.contains(&column.as_str()) {
                        selected.push(column);
                    }
                }
                if !selected.contains(&self.id_column) {
                    validate_column(self.id_column, table)?;
                    selected.push(self.id_column);
                }
                selected.join(", ")
            }
        };

        let mut sql = format!("SELECT {} FROM {}", fields, table.name());
        if let Some(condition) = &node.condition {
            sql.push_str(" WHERE ");
            sql.push_str(&build_condition_clause(condition, table)?);
        }
        if !node.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&build_order_by_clause(&node.order_by, table)?);
        }
        if let Some(limit) = node.limit {
            if limit == 0 {
                return Err(DataAccessError::invalid_argument(
                    "Limit must be a positive integer, got 0",
                ));
            }
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        Ok(sql)
    }

    fn compile_insert(&self, node: &InsertNode) -> Result<Vec<String>> {
        let table = self.table(&node.table)?;
        let returning = Self::returning(table);

        node.records
            .iter()
            .map(|record| {
                if record.is_empty() {
                    return Ok(format!(
                        "INSERT INTO {} DEFAULT VALUES RETURNING {}",
                        table.name(),
                        returning
                    ));
                }
                let (columns, values) = self.assignments(record, table)?;
                Ok(format!(
                    "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
                    table.name(),
                    columns.join(", "),
                    values.join(", "),
                    returning
                ))
            })
            .collect()
    }

    fn compile_update(&self, node: &UpdateNode) -> Result<Vec<String>> {
        let table = self.table(&node.table)?;
        let returning = Self::returning(table);

        node.records
            .iter()
            .map(|record| {
                let filter = self.id_filter(&record.condition, table)?;
                if record.updates.is_empty() {
                    return Err(DataAccessError::invalid_query(format!(
                        "Update of '{}' has no columns to set",
                        table.name()
                    )));
                }
                if record.updates.contains_key(self.id_column) {
                    return Err(DataAccessError::invalid_query(format!(
                        "Column '{}' cannot be updated",
                        self.id_column
                    )));
                }
                let (columns, values) = self.assignments(&record.updates, table)?;
                let set = columns
                    .iter()
                    .zip(&values)
                    .map(|(column, value)| format!("{}={}", column, value))
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(format!(
                    "UPDATE {} SET {} WHERE ({}) RETURNING {}",
                    table.name(),
                    set,
                    filter,
                    returning
                ))
            })
            .collect()
    }

    fn compile_delete(&self, node: &DeleteNode) -> Result<Vec<String>> {
        let table = self.table(&node.table)?;
        let returning = Self::returning(table);

        node.records
            .iter()
            .map(|record| {
                let filter = self.id_filter(&record.condition, table)?;
                Ok(format!(
                    "DELETE FROM {} WHERE ({}) RETURNING {}",
                    table.name(),
                    filter,
                    returning
                ))
            })
            .collect()
    }

    fn assignments(&self, record: &Record, table: &CatalogTable) -> Result<(Vec<String>, Vec<String>)> {
        let mut columns = Vec::with_capacity(record.len());
        let mut values = Vec::with_capacity(record.len());
        for (column, value) in record {
            validate_column(column, table)?;
            columns.push(column.clone());
            values.push(Self::literal(value)?);
        }
        Ok((columns, values))
    }

    /// Render a where clause that must be exactly `id = <identifier>`
    fn id_filter(&self, condition: &Condition, table: &CatalogTable) -> Result<String> {
        let id = match (&condition.left, condition.operator, &condition.right) {
            (
                Operand::Value(serde_json::Value::String(column)),
                Operator::Eq,
                Operand::Value(serde_json::Value::String(id)),
            ) if column == self.id_column => Identifier::parse(id).map_err(|_| {
                DataAccessError::invalid_where_clause(format!("'{}' is not a valid id", id))
            })?,
            _ => {
                return Err(DataAccessError::invalid_where_clause(format!(
                    "Where clause on '{}' must be exactly {} = <id>",
                    table.name(),
                    self.id_column
                )));
            }
        };
        validate_column(self.id_column, table)?;
        build_condition_clause(
            &Condition::compare(self.id_column, Operator::Eq, id.into()),
            table,
        )
    }
}

/// Compile `node` against `catalog` with the default identifier column
pub fn compile(node: &QueryNode, catalog: &TenantCatalog) -> Result<Vec<String>> {
    SqlCompiler::new(catalog).compile(node)
}
