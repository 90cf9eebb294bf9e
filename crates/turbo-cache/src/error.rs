//! Cache error types.

use thiserror::Error;

/// Errors that can occur when using the cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Failed to serialize or deserialize a value.
    #[error("Serialization error: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// Key not found.
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Another caller holds a claim on the entry.
    #[error("Entry is claimed: {0}")]
    Claimed(String),

    /// Another writer changed the entry since it was read.
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),
}

impl CacheError {
    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if another caller holds a claim on the entry.
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed(_))
    }

    /// Check if this is an optimistic concurrency failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }
}
