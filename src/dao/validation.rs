//! Validation helpers for store identifiers.

use validator::ValidationError;

/// Maximum length accepted for a table identifier.
pub const TABLE_ID_MAX_LENGTH: usize = 64;
/// Maximum length accepted for a username.
pub const USERNAME_MAX_LENGTH: usize = 128;

/// Validates that a table identifier is 1 to 64 characters drawn from
/// lowercase letters, digits, and dashes.
///
/// # Examples
///
/// ```ignore
/// validate_table_id("cf3wdpkg0d-scores") // Ok
/// validate_table_id("My-Table")          // Err - uppercase
/// validate_table_id("")                  // Err - empty
/// ```
pub fn validate_table_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > TABLE_ID_MAX_LENGTH {
        let mut err = ValidationError::new("table_id_length");
        err.message = Some(
            format!(
                "Table ID must be between 1 and {TABLE_ID_MAX_LENGTH} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
    {
        let mut err = ValidationError::new("table_id_charset");
        err.message =
            Some("Table ID must contain only lowercase letters, digits, and dashes".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a username is non-empty, at most 128 characters, and free
/// of whitespace.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.is_empty() || username.len() > USERNAME_MAX_LENGTH {
        let mut err = ValidationError::new("username_length");
        err.message = Some(
            format!(
                "Username must be between 1 and {USERNAME_MAX_LENGTH} characters (got {})",
                username.len()
            )
            .into(),
        );
        return Err(err);
    }

    if username.chars().any(char::is_whitespace) {
        let mut err = ValidationError::new("username_whitespace");
        err.message = Some("Username must not contain whitespace".into());
        return Err(err);
    }

    Ok(())
}
