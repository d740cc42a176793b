//! Shared fixtures for the runtime scenarios
#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_aggregation::{AggregateFunction, AggregationDefinition};
use strata_core::{Attribute, AttributeType, Event, Expr, Granularity, ManualClock, Row, Schema, Value};
use strata_engine::{AggregationRuntime, RuntimeConfig};
use strata_query::{LookupQuery, Within};
use strata_storage::{
    CompiledCondition, ExecutionContext, InMemoryStore, StorageError, Table, TableFactory,
};

pub const SECOND: i64 = 1_000;
pub const MINUTE: i64 = 60_000;
pub const HOUR: i64 = 3_600_000;

/// Output columns: AGG_TIMESTAMP, symbol, total, trades, avgPrice
pub fn trades() -> AggregationDefinition {
    AggregationDefinition::new(
        "trades",
        vec![
            Attribute::new("symbol", AttributeType::String),
            Attribute::new("price", AttributeType::Float),
        ],
    )
    .group_by(&["symbol"])
    .aggregate(AggregateFunction::Sum, Some("price"), "total")
    .aggregate(AggregateFunction::Count, None, "trades")
    .aggregate(AggregateFunction::Avg, Some("price"), "avgPrice")
    .every(Granularity::Seconds, Granularity::Hours)
}

pub fn trade(timestamp: i64, symbol: &str, price: f64) -> Event {
    Event::new(timestamp, vec![Value::from(symbol), Value::Float(price)])
}

pub fn runtime(config: RuntimeConfig, store: &dyn TableFactory, clock: &Arc<ManualClock>) -> AggregationRuntime {
    AggregationRuntime::new(config, store, Arc::clone(clock) as Arc<dyn strata_core::Clock>).unwrap()
}

pub fn local_runtime(store: &InMemoryStore, clock: &Arc<ManualClock>) -> AggregationRuntime {
    runtime(RuntimeConfig::new(trades()), store, clock)
}

/// Triggering stream: symbol, per
pub fn stream() -> Schema {
    Schema::new(vec![
        Attribute::new("symbol", AttributeType::String),
        Attribute::new("per", AttributeType::String),
    ])
    .unwrap()
}

pub fn trigger(symbol: &str) -> Vec<Value> {
    vec![Value::from(symbol), Value::from("")]
}

pub fn lookup(start: i64, end: i64, per: Granularity) -> LookupQuery {
    LookupQuery::new(stream())
        .within(Within::millis(start, end))
        .per_granularity(per)
}

/// Lookup restricted to the triggering symbol
pub fn lookup_symbol(start: i64, end: i64, per: Granularity) -> LookupQuery {
    lookup(start, end, per).on(Expr::aggregate("symbol").equal(Expr::stream("symbol")))
}

pub fn total(rows: &[Row]) -> f64 {
    rows.iter().filter_map(|row| row[2].as_f64()).sum()
}

pub fn count(rows: &[Row]) -> i64 {
    rows.iter().filter_map(|row| row[3].as_i64()).sum()
}

/// Switches shared by every table of a [`FaultyStore`]
#[derive(Debug, Default)]
pub struct Faults {
    reads: AtomicBool,
    deletes: Mutex<HashSet<String>>,
    /// Table name and `skip_snapshot` of every `find`
    seen: Mutex<Vec<(String, bool)>>,
}

impl Faults {
    pub fn fail_reads(&self, fail: bool) {
        self.reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, table: &str) {
        self.deletes.lock().insert(table.to_string());
    }

    /// Reads recorded since the last call
    pub fn take_reads(&self) -> Vec<(String, bool)> {
        std::mem::take(&mut *self.seen.lock())
    }
}

/// In-memory tables without push-down whose reads and deletes can be made to fail
pub struct FaultyTable {
    inner: Arc<dyn Table>,
    faults: Arc<Faults>,
}

impl Table for FaultyTable {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn schema(&self) -> &Schema {
        self.inner.schema()
    }

    fn add(&self, rows: Vec<Row>) -> strata_storage::Result<()> {
        self.inner.add(rows)
    }

    fn compile_condition(
        &self,
        condition: &Expr,
        params: &Schema,
    ) -> strata_storage::Result<Box<dyn CompiledCondition>> {
        self.inner.compile_condition(condition, params)
    }

    fn find(
        &self,
        params: &[Value],
        condition: &dyn CompiledCondition,
        ctx: &ExecutionContext,
    ) -> strata_storage::Result<Vec<Row>> {
        self.faults.seen.lock().push((self.name().to_string(), ctx.skip_snapshot));
        if self.faults.reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend(format!("{} unavailable", self.name())));
        }
        self.inner.find(params, condition, ctx)
    }

    fn delete(&self, params: &[Value], condition: &dyn CompiledCondition) -> strata_storage::Result<usize> {
        if self.faults.deletes.lock().contains(self.name()) {
            return Err(StorageError::Backend(format!("{} is read-only", self.name())));
        }
        self.inner.delete(params, condition)
    }
}

#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    pub faults: Arc<Faults>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TableFactory for FaultyStore {
    fn create_table(&self, name: &str, schema: &Schema) -> strata_storage::Result<Arc<dyn Table>> {
        let inner = self.inner.create_table(name, schema)?;
        Ok(Arc::new(FaultyTable {
            inner,
            faults: Arc::clone(&self.faults),
        }))
    }
}
