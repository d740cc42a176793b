//! Retention error types

use strata_core::Granularity;
use thiserror::Error;

/// Retention errors
#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Retention of {retention_ms}ms for {granularity} is shorter than one bucket")]
    RetentionTooShort {
        granularity: Granularity,
        retention_ms: i64,
    },

    #[error("Core error: {0}")]
    Core(#[from] strata_core::CoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] strata_storage::StorageError),
}

/// Result type for retention operations
pub type Result<T> = std::result::Result<T, RetentionError>;
