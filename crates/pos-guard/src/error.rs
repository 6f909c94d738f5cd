//! Error types for admission control.

use thiserror::Error;

/// Errors that can occur in admission-control operations.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Identity is on the blocklist.
    #[error("identity {identity} is blocked: {reason}")]
    Blocked {
        /// The blocked identity.
        identity: String,
        /// Reason recorded with the block.
        reason: String,
    },

    /// Declared request body exceeds the configured maximum.
    #[error("request body of {declared} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge {
        /// Declared content length.
        declared: u64,
        /// Maximum allowed.
        max: u64,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for admission operations.
pub type GuardResult<T> = Result<T, GuardError>;
