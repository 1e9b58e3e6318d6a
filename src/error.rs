//! Error types for the classification service

use std::io;
use thiserror::Error;

/// Result type alias for classification operations
pub type Result<T> = std::result::Result<T, SiftError>;

/// Main error type for the classification service
#[derive(Error, Debug)]
pub enum SiftError {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// HTTP/Network errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed tag or item document
    #[error("Document parse error: {0}")]
    Parse(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The tag training document could not be found
    #[error("No such tag: {0}")]
    NoSuchTag(String),

    /// The tag index could not be fetched or parsed
    #[error("Tag index unavailable: {0}")]
    TagIndex(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl SiftError {
    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        SiftError::Parse(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        SiftError::Config(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        SiftError::Other(msg.into())
    }
}
