//! Error types for strata-core

use thiserror::Error;

/// Core error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown granularity: {0}")]
    UnknownGranularity(String),

    #[error("Empty attribute name")]
    EmptyAttributeName,

    #[error("Duplicate attribute: {0}")]
    DuplicateAttribute(String),

    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),

    #[error("No {0} columns are in scope")]
    SourceNotInScope(&'static str),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Invalid time expression: {0}")]
    InvalidTime(String),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
