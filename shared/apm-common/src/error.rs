//! Shared error type for correlation, redaction, and breaker operations.

use thiserror::Error;

/// Errors that can originate from shared pipeline primitives.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed correlation comment: {0}")]
    InvalidCorrelationComment(String),

    #[error("breaker state file corrupt: {0}")]
    BreakerStateCorrupt(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type aliased to [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
