//! Token-safety checks for anything interpolated into a command line
//!
//! Names and queries are validated against an allow-list and rejected, never
//! sanitized, when they fail.

use crate::error::{PkgError, Result};

/// Maximum accepted token length
pub const MAX_TOKEN_LENGTH: usize = 200;

/// Validate a package name or search query.
///
/// A safe token starts with an ASCII letter or digit and continues with ASCII
/// letters, digits, `-`, `.`, `+`, `_` or `:`. The leading-character rule keeps
/// a token from ever being read as an option by the backend.
pub fn validate_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(PkgError::unsafe_token(token, "token cannot be empty"));
    }

    if token.len() > MAX_TOKEN_LENGTH {
        return Err(PkgError::unsafe_token(
            token,
            format!("token too long (max {} characters)", MAX_TOKEN_LENGTH),
        ));
    }

    let mut chars = token.chars();
    let first = chars.next().unwrap_or_default();
    if !first.is_ascii_alphanumeric() {
        return Err(PkgError::unsafe_token(
            token,
            format!("token must start with a letter or digit, found {:?}", first),
        ));
    }

    for c in chars {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '.' | '+' | '_' | ':' => {}
            _ => {
                return Err(PkgError::unsafe_token(
                    token,
                    format!(
                        "invalid character {:?}; only alphanumerics and - . + _ : are allowed",
                        c
                    ),
                ));
            }
        }
    }

    Ok(())
}

/// Validate a non-empty list of package names.
pub fn validate_names<S: AsRef<str>>(names: &[S]) -> Result<()> {
    if names.is_empty() {
        return Err(PkgError::invalid_input("at least one package name is required"));
    }
    for name in names {
        validate_token(name.as_ref())?;
    }
    Ok(())
}

/// Check a token without building an error.
pub fn is_safe_token(token: &str) -> bool {
    validate_token(token).is_ok()
}
