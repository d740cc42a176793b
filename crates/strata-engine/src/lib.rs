//! Strata Engine - the aggregation runtime
//!
//! This crate ties the engine together:
//! - `AggregationRuntime`: ingestion, lookups, purging, initialisation and
//!   snapshots for one aggregation
//! - `RuntimeConfig`: YAML-loadable, validated configuration
//! - `ReadScope` / `SnapshotCoordinator`: lookup read scopes seen by an
//!   external snapshot service
//! - `init_logging`: tracing subscriber setup

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod scope;

pub use config::{LoggingSettings, LookupSettings, RuntimeConfig};
pub use error::{EngineError, Result};
pub use logging::init_logging;
pub use runtime::AggregationRuntime;
pub use scope::{ReadScope, SnapshotCoordinator};
