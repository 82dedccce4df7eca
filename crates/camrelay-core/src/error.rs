//! Error types for camrelay core library.

use thiserror::Error;

/// Result type alias using camrelay Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for camrelay operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file missing, unreadable or malformed
    #[error("Configuration error: {0}")]
    Config(String),
}
