//! Cache error types
//!
//! This module defines error types for cache tier operations. These errors
//! never escape the cache coordinator: they are logged, reported to the tier's
//! observer and then treated as a miss or a skipped write.

use thiserror::Error;

/// Cache tier error types
#[derive(Error, Debug)]
pub enum CacheError {
    /// I/O error (for file-backed tiers)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend specific failure (storage full, unavailable, ...)
    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}
