//! Error types for the graph tracing engine.
//!
//! Tracking operations never fail the host workflow, so these errors only
//! surface from configuration loading, validation and JSON export.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TracerError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for TracerError {
    fn from(error: serde_json::Error) -> Self {
        TracerError::Serialization(format!("JSON serialization error: {error}"))
    }
}

impl From<config::ConfigError> for TracerError {
    fn from(error: config::ConfigError) -> Self {
        TracerError::Configuration(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TracerError>;
