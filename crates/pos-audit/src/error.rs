//! Error types for attack logging.

use thiserror::Error;

/// Errors that can occur during attack logging operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// A required field was missing when building an event.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Failed to serialize or parse an event.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type alias for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;
