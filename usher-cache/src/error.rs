//! Cache layer error types.

use thiserror::Error;

/// Errors that can occur in the cache layer.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend command failed or service unavailable
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Snapshot (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
