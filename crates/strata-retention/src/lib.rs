//! Strata Retention - retention of sealed aggregation buckets
//!
//! This crate provides:
//! - Per-granularity retention policies with duration parsing
//! - The retention purger, which deletes buckets past their horizon

pub mod error;
pub mod policy;
pub mod purger;

pub use error::{Result, RetentionError};
pub use policy::{default_retention, parse_duration, RetentionConfig, RetentionPolicy};
pub use purger::{PurgeReport, RetentionPurger};
