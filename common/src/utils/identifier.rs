//! PostgreSQL identifier validation and quoting.
//!
//! Identifiers cannot be bound as statement parameters, so every name that
//! reaches generated DDL goes through [`quote_identifier`].

use crate::errors::{AppError, AppResult};

/// PostgreSQL truncates identifiers longer than `NAMEDATALEN - 1` bytes.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Reserved words that always need quoting.
const RESERVED_WORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "both", "case", "cast",
    "check", "collate", "column", "constraint", "create", "default", "desc", "distinct", "do",
    "else", "end", "false", "for", "foreign", "from", "grant", "group", "having", "in", "limit",
    "not", "null", "on", "or", "order", "primary", "select", "table", "user",
];

/// Rejects names that cannot be used in generated SQL.
///
/// # Errors
/// Returns `AppError::InvalidIdentifier` for empty names, names containing a
/// NUL byte and names longer than [`MAX_IDENTIFIER_LENGTH`] bytes.
pub fn validate_identifier(name: &str) -> AppResult<()> {
    if name.is_empty() {
        return Err(AppError::InvalidIdentifier("identifier cannot be empty".into()));
    }
    if name.contains('\0') {
        return Err(AppError::InvalidIdentifier(format!(
            "identifier contains a null byte: {:?}",
            name
        )));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(AppError::InvalidIdentifier(format!(
            "identifier exceeds {} bytes: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }
    Ok(())
}

/// Quotes `name` if PostgreSQL would otherwise fold or reject it.
///
/// Plain lowercase names are returned as-is; anything else is wrapped in
/// double quotes with embedded quotes doubled.
pub fn quote_identifier(name: &str) -> AppResult<String> {
    validate_identifier(name)?;
    if needs_quoting(name) {
        Ok(format!("\"{}\"", name.replace('"', "\"\"")))
    } else {
        Ok(name.to_string())
    }
}

/// Returns `schema.object` with both parts quoted as needed.
pub fn qualify_name(schema: &str, name: &str) -> AppResult<String> {
    Ok(format!("{}.{}", quote_identifier(schema)?, quote_identifier(name)?))
}

fn needs_quoting(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$');
    !(starts_ok && rest_ok) || RESERVED_WORDS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_are_not_quoted() {
        assert_eq!(quote_identifier("users").unwrap(), "users");
        assert_eq!(quote_identifier("_tmp$1").unwrap(), "_tmp$1");
    }

    #[test]
    fn test_mixed_case_and_keywords_are_quoted() {
        assert_eq!(quote_identifier("UserName").unwrap(), "\"UserName\"");
        assert_eq!(quote_identifier("order").unwrap(), "\"order\"");
        assert_eq!(quote_identifier("my col").unwrap(), "\"my col\"");
        assert_eq!(quote_identifier("1st").unwrap(), "\"1st\"");
    }

    #[test]
    fn test_embedded_quotes_are_doubled() {
        assert_eq!(quote_identifier("a\"b").unwrap(), "\"a\"\"b\"");
    }

    #[test]
    fn test_invalid_identifiers_are_rejected() {
        assert!(quote_identifier("").is_err());
        assert!(quote_identifier("a\0b").is_err());
        assert!(quote_identifier(&"x".repeat(64)).is_err());
        assert!(quote_identifier(&"x".repeat(63)).is_ok());
    }

    #[test]
    fn test_qualify_name() {
        assert_eq!(qualify_name("public", "Orders").unwrap(), "public.\"Orders\"");
    }
}
