//! Engine error types

use thiserror::Error;

/// Runtime errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("Aggregation error: {0}")]
    Aggregation(#[from] strata_aggregation::AggregationError),

    #[error("Query error: {0}")]
    Query(#[from] strata_query::QueryError),

    #[error("Retention error: {0}")]
    Retention(#[from] strata_retention::RetentionError),

    #[error("Storage error: {0}")]
    Storage(#[from] strata_storage::StorageError),

    #[error("Core error: {0}")]
    Core(#[from] strata_core::CoreError),

    #[error("Snapshot encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
