//! Storage error types

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Table {table}: expected {expected} columns, got {actual}")]
    RowWidth {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("Table {0} already exists with a different schema")]
    SchemaMismatch(String),

    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    #[error("Selection not supported: {0}")]
    UnsupportedSelection(String),

    #[error("Compiled {0} handle was produced by a different table implementation")]
    ForeignHandle(&'static str),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Core error: {0}")]
    Core(#[from] strata_core::CoreError),
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
