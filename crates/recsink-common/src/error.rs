//! Error types shared by recsink crates

use thiserror::Error;

/// Result type alias for recsink operations
pub type Result<T> = std::result::Result<T, RecsinkError>;

/// Errors that stop an invocation before any item is processed
#[derive(Error, Debug)]
pub enum RecsinkError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RecsinkError {
    /// Shorthand for a configuration failure
    pub fn config(message: impl Into<String>) -> Self {
        RecsinkError::Config(message.into())
    }
}
