//! Strata Aggregation - incremental multi-granularity aggregation
//!
//! This crate provides:
//! - Aggregation definitions and the stored/output row layouts they imply
//! - Per-granularity incremental executors and the chain that rolls sealed
//!   buckets up from the finest to the coarsest granularity
//! - The initialiser rebuilding executor state from persisted tables

pub mod chain;
pub mod definition;
pub mod error;
pub mod executor;
pub mod initializer;
pub mod key;
pub mod layout;

pub use chain::{ChainSnapshot, ExecutorChain, IngestReport};
pub use definition::{AggregateFunction, AggregateSpec, AggregationDefinition, TimeColumn};
pub use error::{AggregationError, Result};
pub use executor::{ExecutorSnapshot, IncrementalExecutor, IngestConfig, LatePolicy};
pub use initializer::{ExecutorsInitialiser, InitReport};
pub use key::{ColumnKeyGenerator, GroupKey, GroupKeyGenerator};
pub use layout::{AggregationLayout, BaseColumn, BaseFunction};
