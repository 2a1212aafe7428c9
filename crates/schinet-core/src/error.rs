//! Error types for SchiNET core library.

use thiserror::Error;

/// Result type alias using SchiNET Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for SchiNET operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Platform event could not be decoded
    #[error("Failed to parse platform event: {0}")]
    EventParse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
