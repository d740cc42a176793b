//! Query error types

use strata_core::Timestamp;
use thiserror::Error;

/// Query errors
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Lookup requires a `per` clause")]
    MissingPer,

    #[error("Lookup requires a `within` clause")]
    MissingWithin,

    #[error("Invalid per: {0}")]
    InvalidPer(String),

    #[error("Invalid within: {0}")]
    InvalidWithin(String),

    #[error("Invalid time range: start {start} >= end {end}")]
    InvalidTimeRange { start: Timestamp, end: Timestamp },

    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    #[error("Storage error: {0}")]
    Storage(#[from] strata_storage::StorageError),

    #[error("Core error: {0}")]
    Core(#[from] strata_core::CoreError),
}

/// Result type for query operations
pub type Result<T> = std::result::Result<T, QueryError>;
