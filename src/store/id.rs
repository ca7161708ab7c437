//! Entry id validation and generation

use crate::error::{Result, StoreError};
use uuid::Uuid;

/// Check that an id is non-empty and made only of ASCII letters, digits and dashes.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Generate a fresh random id (hyphenated UUID v4).
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
