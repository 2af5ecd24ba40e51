//! SQL identifier validation and literal escaping
//!
//! Identifiers are never quoted: anything that reaches SQL text must match
//! the lowercase identifier pattern and be whitelisted by the tenant catalog.
//! Literals are always rendered through [`escape_literal`].

use std::sync::LazyLock;

use regex::Regex;

static IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("identifier pattern is valid"));

/// Validate a table or column name
///
/// Rules:
/// - Must start with a letter (a-z)
/// - Can only contain lowercase letters, numbers, and underscores
///
/// # Example
/// ```
/// use tenant_orm::sql::validate_identifier;
///
/// assert!(validate_identifier("first_name").is_ok());
/// assert!(validate_identifier("firstName").is_err());
/// ```
pub fn validate_identifier(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Identifier cannot be empty".to_string());
    }
    if !IDENTIFIER_PATTERN.is_match(name) {
        return Err(format!(
            "Identifier '{}' is invalid. Must start with a lowercase letter and contain only lowercase letters, numbers, and underscores.",
            name
        ));
    }
    Ok(())
}

/// Quote a string as a SQL literal, doubling embedded single quotes
///
/// Fails on NUL characters, which PostgreSQL text cannot hold.
pub fn quote_literal(value: &str) -> Result<String, String> {
    if value.contains('\0') {
        return Err("String literal cannot contain NUL characters".to_string());
    }
    Ok(format!("'{}'", value.replace('\'', "''")))
}

/// Render a JSON scalar as a SQL literal
///
/// Strings are quoted, numbers are emitted bare, booleans become `TRUE` or
/// `FALSE` and null becomes `NULL`. Arrays and objects are rejected.
pub fn escape_literal(value: &serde_json::Value) -> Result<String, String> {
    match value {
        serde_json::Value::Null => Ok("NULL".to_string()),
        serde_json::Value::Bool(true) => Ok("TRUE".to_string()),
        serde_json::Value::Bool(false) => Ok("FALSE".to_string()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::String(s) => quote_literal(s),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            Err(format!("Cannot use structured value {} as a SQL literal", value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // =========================================================================
    // validate_identifier
    // =========================================================================

    #[test]
    fn test_validate_identifier_valid() {
        for name in ["users", "first_name", "table1", "a", "a_b_c", "id"] {
            assert!(validate_identifier(name).is_ok(), "{} should be valid", name);
        }
    }

    #[test]
    fn test_validate_identifier_empty() {
        let result = validate_identifier("");
        assert!(result.unwrap_err().contains("cannot be empty"));
    }

    #[test]
    fn test_validate_identifier_invalid() {
        for name in [
            "1users",
            "_users",
            "Users",
            "firstName",
            "my-table",
            "schema.table",
            "my table",
            "age>0",
            "id; DROP TABLE users",
            "name'",
        ] {
            assert!(validate_identifier(name).is_err(), "{} should be invalid", name);
        }
    }

    // =========================================================================
    // Literals
    // =========================================================================

    #[test]
    fn test_quote_literal_doubles_quotes() {
        assert_eq!(quote_literal("Joe").unwrap(), "'Joe'");
        assert_eq!(quote_literal("O'Brien").unwrap(), "'O''Brien'");
        assert_eq!(
            quote_literal("x' OR '1'='1").unwrap(),
            "'x'' OR ''1''=''1'"
        );
        assert_eq!(quote_literal("").unwrap(), "''");
    }

    #[test]
    fn test_quote_literal_rejects_nul() {
        assert!(quote_literal("a\0b").is_err());
    }

    #[test]
    fn test_escape_literal_scalars() {
        assert_eq!(escape_literal(&json!(null)).unwrap(), "NULL");
        assert_eq!(escape_literal(&json!(true)).unwrap(), "TRUE");
        assert_eq!(escape_literal(&json!(false)).unwrap(), "FALSE");
        assert_eq!(escape_literal(&json!(35)).unwrap(), "35");
        assert_eq!(escape_literal(&json!(-1.5)).unwrap(), "-1.5");
        assert_eq!(escape_literal(&json!("Smith")).unwrap(), "'Smith'");
    }

    #[test]
    fn test_escape_literal_rejects_structures() {
        assert!(escape_literal(&json!([1, 2])).is_err());
        assert!(escape_literal(&json!({"a": 1})).is_err());
    }
}
