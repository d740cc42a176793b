//! In-memory table and table store
//!
//! Rows are kept in insertion order behind a `parking_lot::RwLock`; every
//! read is a linear scan. Tables created through [`InMemoryStore`] are shared
//! by name, which is how several shards of one aggregation see the same
//! per-granularity tables.

use crate::error::{Result, StorageError};
use crate::table::{
    CompiledCondition, CompiledSelection, ExecutionContext, QueryableTable, SelectionSpec, Table,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::{BindScope, BoundExpr, Expr, Frame, Row, RowMerger, Schema, Value};
use tracing::debug;

#[derive(Debug)]
struct InMemoryCondition {
    predicate: BoundExpr,
}

impl CompiledCondition for InMemoryCondition {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct InMemorySelection {
    predicate: BoundExpr,
    group_by: Vec<usize>,
    merger: RowMerger,
}

impl CompiledSelection for InMemorySelection {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Vector-backed table
#[derive(Debug)]
pub struct InMemoryTable {
    name: String,
    schema: Schema,
    rows: RwLock<Vec<Row>>,
    queryable: bool,
}

impl InMemoryTable {
    /// Create a table that supports push-down selections
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            rows: RwLock::new(Vec::new()),
            queryable: true,
        }
    }

    /// Create a table without the push-down capability
    pub fn plain(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            queryable: false,
            ..Self::new(name, schema)
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Copy of all rows in insertion order
    pub fn rows(&self) -> Vec<Row> {
        self.rows.read().clone()
    }

    fn bind(&self, condition: &Expr, params: &Schema) -> Result<BoundExpr> {
        let scope = BindScope::new().with_aggregate(&self.schema).with_params(params);
        let predicate = condition
            .bind(&scope)
            .map_err(|e| StorageError::InvalidCondition(format!("{}: {}", self.name, e)))?;
        if predicate.return_type() != strata_core::AttributeType::Bool {
            return Err(StorageError::InvalidCondition(format!(
                "{}: condition must be boolean, got {}",
                self.name,
                predicate.return_type()
            )));
        }
        Ok(predicate)
    }

    fn matching(&self, params: &[Value], predicate: &BoundExpr) -> Vec<Row> {
        self.rows
            .read()
            .iter()
            .filter(|row| predicate.test(&Frame::new().with_aggregate(row).with_params(params)))
            .cloned()
            .collect()
    }
}

fn downcast_condition(condition: &dyn CompiledCondition) -> Result<&InMemoryCondition> {
    condition
        .as_any()
        .downcast_ref::<InMemoryCondition>()
        .ok_or(StorageError::ForeignHandle("condition"))
}

impl Table for InMemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn add(&self, rows: Vec<Row>) -> Result<()> {
        let expected = self.schema.len();
        if let Some(bad) = rows.iter().find(|row| row.len() != expected) {
            return Err(StorageError::RowWidth {
                table: self.name.clone(),
                expected,
                actual: bad.len(),
            });
        }
        self.rows.write().extend(rows);
        Ok(())
    }

    fn compile_condition(&self, condition: &Expr, params: &Schema) -> Result<Box<dyn CompiledCondition>> {
        let predicate = self.bind(condition, params)?;
        Ok(Box::new(InMemoryCondition { predicate }))
    }

    fn find(
        &self,
        params: &[Value],
        condition: &dyn CompiledCondition,
        _ctx: &ExecutionContext,
    ) -> Result<Vec<Row>> {
        let condition = downcast_condition(condition)?;
        Ok(self.matching(params, &condition.predicate))
    }

    fn delete(&self, params: &[Value], condition: &dyn CompiledCondition) -> Result<usize> {
        let condition = downcast_condition(condition)?;
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|row| {
            !condition
                .predicate
                .test(&Frame::new().with_aggregate(row).with_params(params))
        });
        Ok(before - rows.len())
    }

    fn as_queryable(&self) -> Option<&dyn QueryableTable> {
        if self.queryable {
            Some(self)
        } else {
            None
        }
    }
}

impl QueryableTable for InMemoryTable {
    fn compile_selection(&self, spec: &SelectionSpec, params: &Schema) -> Result<Box<dyn CompiledSelection>> {
        let width = self.schema.len();
        let out_of_range = spec
            .group_by
            .iter()
            .copied()
            .chain(spec.items.iter().map(|item| item.column()))
            .chain(spec.recency)
            .find(|column| *column >= width);
        if let Some(column) = out_of_range {
            return Err(StorageError::UnsupportedSelection(format!(
                "{}: column {} out of range",
                self.name, column
            )));
        }
        let predicate = self.bind(&spec.filter, params)?;
        Ok(Box::new(InMemorySelection {
            predicate,
            group_by: spec.group_by.clone(),
            merger: RowMerger::new(spec.items.clone(), spec.recency),
        }))
    }

    fn query(
        &self,
        params: &[Value],
        selection: &dyn CompiledSelection,
        _ctx: &ExecutionContext,
    ) -> Result<Vec<Row>> {
        let selection = selection
            .as_any()
            .downcast_ref::<InMemorySelection>()
            .ok_or(StorageError::ForeignHandle("selection"))?;

        let mut positions: HashMap<Vec<Value>, usize> = HashMap::new();
        let mut groups = Vec::new();
        for row in self.matching(params, &selection.predicate) {
            let key: Vec<Value> = selection
                .group_by
                .iter()
                .map(|&column| row.get(column).cloned().unwrap_or(Value::Null))
                .collect();
            match positions.get(&key) {
                Some(&position) => selection.merger.merge(&mut groups[position], &row),
                None => {
                    positions.insert(key, groups.len());
                    groups.push(selection.merger.start(&row));
                }
            }
        }
        Ok(groups.into_iter().map(|merged| merged.values).collect())
    }
}

/// Creates the backing table for one aggregation granularity
pub trait TableFactory: Send + Sync {
    fn create_table(&self, name: &str, schema: &Schema) -> Result<Arc<dyn Table>>;
}

/// Named in-memory tables shared between everyone holding the store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: DashMap<String, Arc<InMemoryTable>>,
    plain: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose tables do not support push-down
    pub fn without_push_down() -> Self {
        Self {
            tables: DashMap::new(),
            plain: true,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<InMemoryTable>> {
        self.tables.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Table names, sorted
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}

impl TableFactory for InMemoryStore {
    fn create_table(&self, name: &str, schema: &Schema) -> Result<Arc<dyn Table>> {
        let table = self
            .tables
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(table = name, columns = schema.len(), "Creating in-memory table");
                let table = if self.plain {
                    InMemoryTable::plain(name, schema.clone())
                } else {
                    InMemoryTable::new(name, schema.clone())
                };
                Arc::new(table)
            })
            .value()
            .clone();
        if table.schema() != schema {
            return Err(StorageError::SchemaMismatch(name.to_string()));
        }
        Ok(table)
    }
}
