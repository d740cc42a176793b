//! Strata Storage - table capabilities for aggregation state
//!
//! This crate provides the storage seam of the engine:
//! - `Table` / `QueryableTable`: persist rows, answer compiled conditions and
//!   optionally execute grouped selections (push-down)
//! - `ExecutionContext`: per-call read flags
//! - `InMemoryTable` / `InMemoryStore`: reference implementations shared
//!   between shards by table name

pub mod error;
pub mod memory;
pub mod table;

pub use error::{Result, StorageError};
pub use memory::{InMemoryStore, InMemoryTable, TableFactory};
pub use table::{
    CompiledCondition, CompiledSelection, ExecutionContext, QueryableTable, SelectionSpec, Table,
};
