//! Aggregation error types

use strata_core::{Granularity, Timestamp};
use thiserror::Error;

/// Aggregation errors
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("Invalid aggregate definition: {0}")]
    InvalidDefinition(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Late event at {timestamp} for {granularity}: buckets before {sealed_until} are sealed")]
    LateEvent {
        granularity: Granularity,
        timestamp: Timestamp,
        sealed_until: Timestamp,
    },

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Storage error: {0}")]
    Storage(#[from] strata_storage::StorageError),

    #[error("Core error: {0}")]
    Core(#[from] strata_core::CoreError),
}

/// Result type for aggregation operations
pub type Result<T> = std::result::Result<T, AggregationError>;
