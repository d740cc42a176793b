//! Strata Core - shared types for the incremental aggregation engine
//!
//! This crate provides the fundamental building blocks used by every other
//! Strata crate:
//! - `Value`, `Schema`, `Event`, `TimeRange`: typed rows and their layouts
//! - `Granularity`: the SECONDS..YEARS bucket hierarchy and boundary math
//! - `PerGranularity<T>`: tables indexed by granularity ordinal
//! - `Expr` / `BoundExpr`: expression trees bound against stream, aggregate
//!   and parameter schemas
//! - `RowMerger`: the incremental merge rules (sum, min, max, last)
//! - `Clock`: processing-time source

pub mod clock;
pub mod columns;
pub mod error;
pub mod expr;
pub mod granularity;
pub mod merge;
pub mod parallel;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, Result};
pub use expr::{ArithOp, BindScope, BoundExpr, CompareOp, Expr, Frame, Source};
pub use granularity::{Granularity, PerGranularity};
pub use merge::{MergeFunction, MergedRow, RowMerger, SelectItem};
pub use parallel::ParallelConfig;
pub use types::*;
