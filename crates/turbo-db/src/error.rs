//! Database error types.

use thiserror::Error;

/// Errors that can occur when using the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// The row does not exist (or was deleted while waiting for its lock).
    #[error("No row {key} in table {table}")]
    NotFound { table: &'static str, key: String },

    /// A row with the same key already exists.
    #[error("Duplicate key {key} in table {table}")]
    UniqueViolation { table: &'static str, key: String },
}

impl DbError {
    /// Check if this is a missing-row error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound { .. })
    }

    /// Check if this is a uniqueness violation.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DbError::UniqueViolation { .. })
    }
}
