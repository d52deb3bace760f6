//! Error types for the property monitor.

use std::time::Duration;
use thiserror::Error;

/// Main error type for monitor operations.
#[derive(Debug, Error)]
pub enum PropertyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No reply within {0:?}")]
    ReplyTimeout(Duration),

    #[error("Reply channel closed before a value was sent")]
    ReplyBroken,

    #[error("Registry is not running")]
    RegistryStopped,

    #[error("Global registry already initialized")]
    AlreadyInitialized,
}

impl From<serde_json::Error> for PropertyError {
    fn from(e: serde_json::Error) -> Self {
        PropertyError::Config(e.to_string())
    }
}

/// Result type for monitor operations.
pub type Result<T> = std::result::Result<T, PropertyError>;
