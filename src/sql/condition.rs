//! Condition building for SQL WHERE clauses
//!
//! Renders a [`Condition`] tree to SQL text. Three operator classes render
//! differently and the output must stay byte-stable:
//!
//! - symbolic comparisons join without spaces: `age>35`
//! - `AND` / `OR` wrap both sides in one group: `(left AND right)`
//! - everything else joins with spaces: `last_name LIKE 'S%'`, `age IS NULL`

use crate::catalog::CatalogTable;
use crate::error::{DataAccessError, Result};
use crate::query::{Condition, Operand};
use crate::sql::sanitize::{escape_literal, validate_identifier};

/// Build a WHERE clause body from a condition tree
///
/// Every column referenced on a left side must be whitelisted in `table`,
/// otherwise the whole condition fails with `UnknownField`.
///
/// # Arguments
/// * `condition` - Root of the condition tree
/// * `table` - Catalog entry of the queried table
pub fn build_condition_clause(condition: &Condition, table: &CatalogTable) -> Result<String> {
    let operator = condition.operator;

    if operator.is_boolean() {
        let (Operand::Expression(left), Operand::Expression(right)) =
            (&condition.left, &condition.right)
        else {
            return Err(DataAccessError::invalid_query(format!(
                "{} requires a condition on both sides",
                operator
            )));
        };
        return Ok(format!(
            "({} {} {})",
            build_condition_clause(left, table)?,
            operator,
            build_condition_clause(right, table)?
        ));
    }

    let left = render_left(&condition.left, table)?;
    if operator.is_unary() {
        return Ok(format!("{} {}", left, operator));
    }

    let right = render_right(&condition.right, table)?;
    if operator.is_comparison() {
        Ok(format!("{}{}{}", left, operator, right))
    } else {
        Ok(format!("{} {} {}", left, operator, right))
    }
}

fn render_left(operand: &Operand, table: &CatalogTable) -> Result<String> {
    match operand {
        Operand::Expression(inner) => build_condition_clause(inner, table),
        Operand::Value(serde_json::Value::String(column)) => {
            validate_column(column, table)?;
            Ok(column.clone())
        }
        Operand::Value(other) => Err(DataAccessError::invalid_query(format!(
            "Left side of a condition must be a column name, got {}",
            other
        ))),
    }
}

fn render_right(operand: &Operand, table: &CatalogTable) -> Result<String> {
    match operand {
        Operand::Expression(inner) => build_condition_clause(inner, table),
        Operand::Value(value) => escape_literal(value).map_err(DataAccessError::InvalidQuery),
    }
}

/// Check a column name against the identifier pattern and the whitelist
pub fn validate_column(column: &str, table: &CatalogTable) -> Result<()> {
    validate_identifier(column).map_err(DataAccessError::UnknownField)?;
    if !table.has_column(column) {
        return Err(DataAccessError::unknown_field(format!(
            "Field '{}' does not exist on table '{}'",
            column,
            table.name()
        )));
    }
    Ok(())
}

/// Build an ORDER BY list from `column` / `column DESC` entries
pub fn build_order_by_clause(order_by: &[String], table: &CatalogTable) -> Result<String> {
    let mut parts = Vec::with_capacity(order_by.len());
    for entry in order_by {
        let (column, descending) = match entry.strip_suffix(" DESC") {
            Some(column) => (column, true),
            None => (entry.as_str(), false),
        };
        validate_column(column, table)?;
        parts.push(if descending {
            format!("{} DESC", column)
        } else {
            column.to_string()
        });
    }
    Ok(parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Operator;
    use crate::value::Value;
    use serde_json::json;

    fn users() -> CatalogTable {
        CatalogTable::new("users")
            .with_column("id", "id")
            .with_column("first_name", "text")
            .with_column("last_name", "text")
            .with_column("age", "integer")
    }

    fn parse(value: serde_json::Value) -> Condition {
        serde_json::from_value(value).unwrap()
    }

    // =========================================================================
    // Operator classes
    // =========================================================================

    #[test]
    fn test_comparison_has_no_spaces() {
        let cond = Condition::compare("age", Operator::Gt, Value::from(35));
        assert_eq!(build_condition_clause(&cond, &users()).unwrap(), "age>35");

        let cond = Condition::compare("last_name", Operator::Ne, Value::from("Smith"));
        assert_eq!(
            build_condition_clause(&cond, &users()).unwrap(),
            "last_name<>'Smith'"
        );
    }

    #[test]
    fn test_null_tests() {
        let cond = Condition::unary("age", Operator::IsNull);
        assert_eq!(build_condition_clause(&cond, &users()).unwrap(), "age IS NULL");
        let cond = Condition::unary("age", Operator::IsNotNull);
        assert_eq!(
            build_condition_clause(&cond, &users()).unwrap(),
            "age IS NOT NULL"
        );
    }

    #[test]
    fn test_boolean_groups_both_sides() {
        let cond = Condition::compare("first_name", Operator::Eq, Value::from("Joe"))
            .and(Condition::compare("last_name", Operator::Ne, Value::from("Smith")));
        assert_eq!(
            build_condition_clause(&cond, &users()).unwrap(),
            "(first_name='Joe' AND last_name<>'Smith')"
        );
    }

    #[test]
    fn test_nested_boolean_is_left_associative() {
        let cond = Condition::compare("age", Operator::Gte, Value::from(18))
            .and(Condition::compare("age", Operator::Lt, Value::from(65)))
            .or(Condition::unary("age", Operator::IsNull));
        assert_eq!(
            build_condition_clause(&cond, &users()).unwrap(),
            "((age>=18 AND age<65) OR age IS NULL)"
        );
    }

    #[test]
    fn test_other_operators_are_space_joined() {
        let cond = Condition::compare("last_name", Operator::Like, Value::from("S%"));
        assert_eq!(
            build_condition_clause(&cond, &users()).unwrap(),
            "last_name LIKE 'S%'"
        );
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn test_unknown_column_rejected() {
        let cond = Condition::compare("salary", Operator::Gt, Value::from(1));
        assert!(matches!(
            build_condition_clause(&cond, &users()),
            Err(DataAccessError::UnknownField(_))
        ));
    }

    #[test]
    fn test_injection_in_column_rejected() {
        let cond = parse(json!({"left": "age>0 OR 1", "operator": "=", "right": 1}));
        assert!(matches!(
            build_condition_clause(&cond, &users()),
            Err(DataAccessError::UnknownField(_))
        ));
    }

    #[test]
    fn test_injection_in_literal_escaped() {
        let cond = Condition::compare("first_name", Operator::Eq, Value::from("x' OR '1'='1"));
        assert_eq!(
            build_condition_clause(&cond, &users()).unwrap(),
            "first_name='x'' OR ''1''=''1'"
        );
    }

    #[test]
    fn test_boolean_requires_expressions() {
        let cond = parse(json!({"left": "age", "operator": "AND", "right": 1}));
        assert!(matches!(
            build_condition_clause(&cond, &users()),
            Err(DataAccessError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_literal_left_rejected() {
        let cond = parse(json!({"left": 1, "operator": "=", "right": 1}));
        assert!(matches!(
            build_condition_clause(&cond, &users()),
            Err(DataAccessError::InvalidQuery(_))
        ));
    }

    // =========================================================================
    // ORDER BY
    // =========================================================================

    #[test]
    fn test_order_by() {
        let order = vec!["last_name".to_string(), "age DESC".to_string()];
        assert_eq!(
            build_order_by_clause(&order, &users()).unwrap(),
            "last_name, age DESC"
        );
        let order = vec!["age; DROP TABLE users".to_string()];
        assert!(build_order_by_clause(&order, &users()).is_err());
    }
}
