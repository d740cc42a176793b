//! Strata Query - lookups over incremental aggregations
//!
//! This crate provides:
//! - `within` resolution (bounds and wildcard patterns)
//! - Join condition rewriting into pushable and deferred parts
//! - Re-aggregating selectors and granularity decomposition
//! - The lookup compiler and compiled plan execution

pub mod compiler;
pub mod decompose;
pub mod error;
pub mod plan;
pub mod rewriter;
pub mod selector;
pub mod within;

pub use compiler::{LookupQuery, QueryCompiler};
pub use decompose::{decompose, Segment};
pub use error::{QueryError, Result};
pub use plan::{BoundPer, CompiledPlan, OpenBuckets};
pub use rewriter::{split_condition, SplitCondition};
pub use selector::Selector;
pub use within::{parse_pattern, parse_timestamp, BoundWithin, Within};
