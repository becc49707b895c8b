//! Input validation for crate names and versions taken from request paths.
//!
//! Both end up as path components under the cache root, so anything outside
//! the registry's character set is rejected before any store is touched.

use crate::error::AppError;
use mirror_metadata::ArtifactKey;

/// Longest crate name crates.io accepts.
pub const MAX_CRATE_NAME_LENGTH: usize = 64;

pub const MAX_VERSION_LENGTH: usize = 64;

/// Error types for validation failures
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Input too long: {actual} exceeds maximum {max}")]
    TooLong { actual: usize, max: usize },

    #[error("Input is empty")]
    Empty,

    #[error("Invalid characters in input: {input}")]
    InvalidCharacters { input: String },

    #[error("Invalid format: {reason}")]
    InvalidFormat { reason: String },
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// ASCII alphanumerics, `-` and `_`, starting with a letter.
pub fn validate_crate_name(name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ValidationError::Empty);
    }
    if name.len() > MAX_CRATE_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            actual: name.len(),
            max: MAX_CRATE_NAME_LENGTH,
        });
    }
    if name
        .chars()
        .any(|c| !c.is_ascii_alphanumeric() && !matches!(c, '-' | '_'))
    {
        return Err(ValidationError::InvalidCharacters {
            input: name.to_string(),
        });
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(ValidationError::InvalidFormat {
            reason: "Crate names must start with a letter".to_string(),
        });
    }
    Ok(())
}

/// ASCII alphanumerics plus `.`, `-`, `_` and `+`.
pub fn validate_version(version: &str) -> ValidationResult<()> {
    if version.is_empty() {
        return Err(ValidationError::Empty);
    }
    if version.len() > MAX_VERSION_LENGTH {
        return Err(ValidationError::TooLong {
            actual: version.len(),
            max: MAX_VERSION_LENGTH,
        });
    }
    if !version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'))
    {
        return Err(ValidationError::InvalidCharacters {
            input: version.to_string(),
        });
    }
    Ok(())
}

/// Validate both halves of a request path and build the key.
pub fn artifact_key(name: &str, version: &str) -> Result<ArtifactKey, AppError> {
    validate_crate_name(name)
        .map_err(|e| AppError::BadRequest(format!("Invalid crate name: {e}")))?;
    validate_version(version)
        .map_err(|e| AppError::BadRequest(format!("Invalid version: {e}")))?;
    Ok(ArtifactKey::new(name, version))
}
