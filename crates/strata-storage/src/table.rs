//! Table capabilities consumed by the aggregation engine
//!
//! A [`Table`] persists rows in a fixed [`Schema`] and answers compiled
//! conditions. Tables that can also group and project rows on their side
//! expose [`QueryableTable`] through [`Table::as_queryable`].
//!
//! Conditions and selections are compiled once against the table schema and
//! a parameter schema, then executed many times with a parameter row. The
//! compiled handles are opaque; an implementation downcasts its own handles
//! through `as_any`.

use crate::error::Result;
use std::any::Any;
use std::fmt::Debug;
use strata_core::{Expr, Row, Schema, SelectItem, Value};

/// Per-call execution flags passed explicitly to storage reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Read-path state must not be captured by snapshots
    pub skip_snapshot: bool,
}

impl ExecutionContext {
    pub fn read_path() -> Self {
        Self {
            skip_snapshot: true,
        }
    }
}

/// Opaque compiled filter
pub trait CompiledCondition: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Opaque compiled group-by + projection
pub trait CompiledSelection: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Push-down request: filter, then group and merge the surviving rows
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionSpec {
    /// Filter over table columns (`Source::Aggregate`) and parameters
    pub filter: Expr,
    /// Table column positions forming the group key
    pub group_by: Vec<usize>,
    /// Output columns
    pub items: Vec<SelectItem>,
    /// Table column ordering rows for `last`
    pub recency: Option<usize>,
}

/// A persisted row set with a fixed schema
pub trait Table: Send + Sync {
    fn name(&self) -> &str;

    fn schema(&self) -> &Schema;

    /// Append rows laid out per [`Table::schema`]
    fn add(&self, rows: Vec<Row>) -> Result<()>;

    /// Compile a filter over this table's columns and the given parameters
    fn compile_condition(&self, condition: &Expr, params: &Schema) -> Result<Box<dyn CompiledCondition>>;

    /// Rows matching a compiled condition
    fn find(
        &self,
        params: &[Value],
        condition: &dyn CompiledCondition,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Row>>;

    /// Delete matching rows, returning how many were removed
    fn delete(&self, params: &[Value], condition: &dyn CompiledCondition) -> Result<usize>;

    /// Push-down capability, if supported
    fn as_queryable(&self) -> Option<&dyn QueryableTable> {
        None
    }
}

/// A table that executes grouped selections itself
pub trait QueryableTable: Table {
    fn compile_selection(&self, spec: &SelectionSpec, params: &Schema) -> Result<Box<dyn CompiledSelection>>;

    fn query(
        &self,
        params: &[Value],
        selection: &dyn CompiledSelection,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Row>>;
}
