use std::fmt;

/// Postgres truncates identifiers beyond NAMEDATALEN - 1 bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlGuardError {
    InvalidTableName(String),
    InvalidColumnName(String),
    InvalidIdentifier(String),
}

impl fmt::Display for SqlGuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTableName(name) => write!(f, "Invalid table name: {name}"),
            Self::InvalidColumnName(name) => write!(f, "Invalid column name: {name}"),
            Self::InvalidIdentifier(id) => write!(f, "Invalid identifier: {id}"),
        }
    }
}

impl std::error::Error for SqlGuardError {}

pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Accepts only names that survive sanitizing unchanged, so nothing is
/// silently rewritten into a different identifier.
pub fn validate_identifier(name: &str) -> Result<&str, SqlGuardError> {
    if name.is_empty() {
        return Err(SqlGuardError::InvalidIdentifier(name.to_string()));
    }

    if sanitize_identifier(name) != name {
        return Err(SqlGuardError::InvalidIdentifier(name.to_string()));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(SqlGuardError::InvalidIdentifier(format!(
            "{name} (longer than {MAX_IDENTIFIER_LEN} characters)"
        )));
    }

    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return Err(SqlGuardError::InvalidIdentifier(format!(
            "{name} (starts with a digit)"
        )));
    }

    Ok(name)
}

pub fn validate_table_name(table: &str) -> Result<&str, SqlGuardError> {
    validate_identifier(table).map_err(|_| SqlGuardError::InvalidTableName(table.to_string()))
}

pub fn validate_column_name(column: &str) -> Result<&str, SqlGuardError> {
    validate_identifier(column).map_err(|_| SqlGuardError::InvalidColumnName(column.to_string()))
}

/// Double-quotes an already validated identifier.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escapes a value for a standard-conforming single-quoted literal.
pub fn escape_string_literal(value: &str) -> String {
    value.replace('\'', "''")
}

pub fn string_literal(value: &str) -> String {
    format!("'{}'", escape_string_literal(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("valid_name"), "valid_name");
        assert_eq!(sanitize_identifier("name123"), "name123");
        assert_eq!(sanitize_identifier("name; DROP--"), "nameDROP");
        assert_eq!(sanitize_identifier(""), "");
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("consultation_fee").is_ok());
        assert!(validate_identifier("isFree").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("123name").is_err());
        assert!(validate_identifier("bio; DROP TABLE users").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
        assert!(validate_identifier(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_table_and_column_errors_are_distinct() {
        assert_eq!(
            validate_table_name("bad table"),
            Err(SqlGuardError::InvalidTableName("bad table".to_string()))
        );
        assert_eq!(
            validate_column_name("bad-col"),
            Err(SqlGuardError::InvalidColumnName("bad-col".to_string()))
        );
    }

    #[test]
    fn test_escape_string_literal() {
        assert_eq!(escape_string_literal("hello"), "hello");
        assert_eq!(escape_string_literal("it's"), "it''s");
        assert_eq!(string_literal("O'Brien's"), "'O''Brien''s'");
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("bookings"), "\"bookings\"");
        assert_eq!(quote_identifier("isFree"), "\"isFree\"");
    }
}
