//! Error types for CI platform operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid CI event payload: {0}")]
    Event(String),

    #[error("Git error: {0}")]
    Git(String),

    #[error("{platform} API returned {status}: {body}")]
    Http {
        platform: &'static str,
        status: u16,
        body: String,
    },

    #[error("{platform} API request failed: {message}")]
    Transport {
        platform: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for CI platform operations
pub type Result<T> = std::result::Result<T, CiError>;
