//! Executor chain: one incremental executor per granularity, finest first
//!
//! Raw base rows enter the finest executor; every bucket it seals is
//! forwarded as a roll-up row into the next coarser executor, and so on up
//! to the coarsest, whose sealed rows are only persisted.

use crate::error::{AggregationError, Result};
use crate::executor::{ExecutorSnapshot, IncrementalExecutor, IngestConfig};
use crate::layout::AggregationLayout;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_core::{Granularity, PerGranularity, Row, TimeRange, Timestamp, Value};
use strata_storage::Table;

/// Outcome of one ingest call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Rows folded into the finest executor
    pub accepted: usize,
    /// Rows dropped as late by the finest executor
    pub dropped_late: usize,
}

/// Serializable open state of the whole chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub watermark: Option<Timestamp>,
    pub executors: Vec<ExecutorSnapshot>,
}

/// Ordered executors of one aggregation (one shard in distributed mode)
#[derive(Debug)]
pub struct ExecutorChain {
    layout: Arc<AggregationLayout>,
    executors: Vec<IncrementalExecutor>,
    watermark: Option<Timestamp>,
    initialised: bool,
}

impl ExecutorChain {
    /// Build a cold chain over the given tables. Only the finest executor
    /// keeps a buffer of previous buckets.
    pub fn new(
        layout: Arc<AggregationLayout>,
        tables: &PerGranularity<Arc<dyn Table>>,
        config: &IngestConfig,
    ) -> Result<Self> {
        if tables.is_empty() {
            return Err(AggregationError::InvalidDefinition("No granularity tables".to_string()));
        }
        let executors = tables
            .iter()
            .enumerate()
            .map(|(level, (granularity, table))| {
                let buffer_count = if level == 0 { config.buffer_count } else { 0 };
                IncrementalExecutor::new(granularity, Arc::clone(table), &layout, buffer_count, config.late_events)
            })
            .collect();
        Ok(Self {
            layout,
            executors,
            watermark: None,
            initialised: false,
        })
    }

    pub fn layout(&self) -> &Arc<AggregationLayout> {
        &self.layout
    }

    /// Granularities, finest first
    pub fn granularities(&self) -> Vec<Granularity> {
        self.executors.iter().map(|e| e.granularity()).collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Position of a granularity in the chain
    pub fn level_of(&self, granularity: Granularity) -> Option<usize> {
        self.executors.iter().position(|e| e.granularity() == granularity)
    }

    pub fn executor(&self, level: usize) -> Option<&IncrementalExecutor> {
        self.executors.get(level)
    }

    pub fn executor_mut(&mut self, level: usize) -> Option<&mut IncrementalExecutor> {
        self.executors.get_mut(level)
    }

    /// Latest event time seen
    pub fn watermark(&self) -> Option<Timestamp> {
        self.watermark
    }

    pub fn is_live(&self) -> bool {
        self.executors.first().is_some_and(|e| e.is_live())
    }

    pub fn set_live(&mut self, live: bool) {
        for executor in &mut self.executors {
            executor.set_live(live);
        }
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    pub fn set_initialised(&mut self, initialised: bool) {
        self.initialised = initialised;
    }

    /// Late rows dropped by the finest executor so far
    pub fn dropped_late(&self) -> u64 {
        self.executors.first().map_or(0, |e| e.dropped_late())
    }

    /// Feed base rows into the finest executor and cascade roll-ups.
    /// Roll-ups sealed before a failure are still forwarded.
    pub fn ingest(&mut self, rows: Vec<Row>) -> Result<IngestReport> {
        let total = rows.len();
        let dropped_before = self.dropped_late();
        if let Some(max) = rows.iter().filter_map(|row| row.first().and_then(Value::as_i64)).max() {
            self.advance_watermark_to(max);
        }
        let result = self.cascade(rows, None);
        let dropped_late = (self.dropped_late() - dropped_before) as usize;
        result.map(|()| IngestReport {
            accepted: total - dropped_late,
            dropped_late,
        })
    }

    /// Seal every bucket that ends at or before `watermark`, cascading
    pub fn advance_watermark(&mut self, watermark: Timestamp) -> Result<()> {
        self.advance_watermark_to(watermark);
        self.cascade(Vec::new(), Some(watermark))
    }

    fn advance_watermark_to(&mut self, timestamp: Timestamp) {
        self.watermark = Some(self.watermark.map_or(timestamp, |w| w.max(timestamp)));
    }

    fn cascade(&mut self, rows: Vec<Row>, watermark: Option<Timestamp>) -> Result<()> {
        let mut pending = rows;
        let mut first_error = None;
        for executor in &mut self.executors {
            let mut sealed = Vec::new();
            if let Err(e) = executor.process(pending, &mut sealed) {
                first_error.get_or_insert(e);
            }
            if let Some(watermark) = watermark {
                if let Err(e) = executor.seal_until(watermark, &mut sealed) {
                    first_error.get_or_insert(e);
                }
            }
            pending = sealed;
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Open rows of executors `0..=level` whose bucket starts inside `range`
    pub fn open_rows(&self, level: usize, range: TimeRange) -> Vec<Row> {
        self.executors
            .iter()
            .take(level + 1)
            .flat_map(|executor| executor.open_rows(range))
            .collect()
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            watermark: self.watermark,
            executors: self.executors.iter().map(|e| e.snapshot()).collect(),
        }
    }

    /// Replace open state; a restored chain counts as initialised
    pub fn restore(&mut self, snapshot: ChainSnapshot) -> Result<()> {
        if snapshot.executors.len() != self.executors.len() {
            return Err(AggregationError::Snapshot(format!(
                "snapshot has {} executors, chain has {}",
                snapshot.executors.len(),
                self.executors.len()
            )));
        }
        for (executor, state) in self.executors.iter_mut().zip(snapshot.executors) {
            executor.restore(state)?;
        }
        self.watermark = snapshot.watermark;
        self.initialised = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{AggregateFunction, AggregationDefinition};
    use crate::executor::LatePolicy;
    use strata_core::{Attribute, AttributeType};
    use strata_storage::{InMemoryStore, TableFactory};

    const SECOND: i64 = 1_000;
    const MINUTE: i64 = 60_000;
    const HOUR: i64 = 3_600_000;

    struct Fixture {
        layout: Arc<AggregationLayout>,
        store: InMemoryStore,
        chain: ExecutorChain,
    }

    fn fixture(config: IngestConfig) -> Fixture {
        let definition = AggregationDefinition::new(
            "trades",
            vec![
                Attribute::new("symbol", AttributeType::String),
                Attribute::new("price", AttributeType::Float),
            ],
        )
        .group_by(&["symbol"])
        .aggregate(AggregateFunction::Sum, Some("price"), "total")
        .aggregate(AggregateFunction::Count, None, "trades")
        .every(Granularity::Seconds, Granularity::Hours);
        let layout = Arc::new(AggregationLayout::new(&definition, false).unwrap());
        let store = InMemoryStore::new();
        let tables = PerGranularity::from_fn(&definition.granularities, |g| {
            store.create_table(&definition.table_name(g), layout.table_schema())
        })
        .unwrap();
        let mut chain = ExecutorChain::new(Arc::clone(&layout), &tables, &config).unwrap();
        chain.set_live(true);
        Fixture { layout, store, chain }
    }

    fn event(layout: &AggregationLayout, ts: i64, price: f64) -> Row {
        layout.base_row(ts, &[Value::from("A"), Value::Float(price)], None)
    }

    fn table_sum(store: &InMemoryStore, name: &str) -> f64 {
        store
            .get(name)
            .unwrap()
            .rows()
            .iter()
            .filter_map(|row| row[3].as_f64())
            .sum()
    }

    #[test]
    fn test_rollup_cascades_through_granularities() {
        let mut f = fixture(IngestConfig::default());
        let rows = (0..130).map(|i| event(&f.layout, i * SECOND, 1.0)).collect();
        let report = f.chain.ingest(rows).unwrap();
        assert_eq!(report.accepted, 130);
        assert_eq!(f.chain.watermark(), Some(129 * SECOND));

        // seconds 0..=128 sealed, minutes 0 and 1 sealed by the roll-ups of seconds 60 and 120
        assert_eq!(f.store.get("trades_SECONDS").unwrap().len(), 129);
        assert_eq!(f.store.get("trades_MINUTES").unwrap().len(), 2);
        assert_eq!(table_sum(&f.store, "trades_MINUTES"), 120.0);
        assert!(f.store.get("trades_HOURS").unwrap().is_empty());

        // every second sealed into a minute bucket is accounted for exactly once
        let open_minutes: f64 = f
            .chain
            .open_rows(1, TimeRange::new(0, HOUR))
            .iter()
            .filter(|row| row[0] == Value::Int(2 * MINUTE))
            .filter_map(|row| row[3].as_f64())
            .sum();
        assert_eq!(table_sum(&f.store, "trades_MINUTES") + open_minutes, 129.0);
    }

    #[test]
    fn test_advance_watermark_seals_every_level() {
        let mut f = fixture(IngestConfig::default());
        let rows = vec![event(&f.layout, 10 * SECOND, 2.0), event(&f.layout, 70 * SECOND, 3.0)];
        f.chain.ingest(rows).unwrap();
        f.chain.advance_watermark(HOUR).unwrap();

        assert_eq!(f.store.get("trades_SECONDS").unwrap().len(), 2);
        assert_eq!(f.store.get("trades_MINUTES").unwrap().len(), 2);
        let hours = f.store.get("trades_HOURS").unwrap().rows();
        assert_eq!(hours.len(), 1);
        assert_eq!(hours[0][3], Value::Float(5.0));
        assert_eq!(hours[0][4], Value::Int(2));
        assert!(f.chain.open_rows(2, TimeRange::new(0, i64::MAX)).is_empty());
    }

    #[test]
    fn test_rejected_event_keeps_earlier_rollups() {
        let mut f = fixture(IngestConfig {
            buffer_count: 0,
            late_events: LatePolicy::Reject,
        });
        let rows = vec![
            event(&f.layout, 59 * SECOND, 1.0),
            event(&f.layout, 60 * SECOND, 1.0),
            event(&f.layout, 61 * SECOND, 1.0),
            event(&f.layout, 5 * SECOND, 1.0),
        ];
        assert!(matches!(f.chain.ingest(rows), Err(AggregationError::LateEvent { .. })));
        // second 59 and 60 sealed and forwarded before the rejection
        assert_eq!(f.store.get("trades_SECONDS").unwrap().len(), 2);
        assert_eq!(f.store.get("trades_MINUTES").unwrap().len(), 1);
    }

    #[test]
    fn test_dropped_events_are_reported() {
        let mut f = fixture(IngestConfig::default());
        f.chain
            .ingest(vec![event(&f.layout, 5 * SECOND, 1.0), event(&f.layout, 6 * SECOND, 1.0)])
            .unwrap();
        let report = f.chain.ingest(vec![event(&f.layout, SECOND, 1.0)]).unwrap();
        assert_eq!(report, IngestReport { accepted: 0, dropped_late: 1 });
        assert_eq!(f.chain.dropped_late(), 1);
    }

    #[test]
    fn test_snapshot_round_trip_through_bincode() {
        let mut f = fixture(IngestConfig::default());
        f.chain
            .ingest(vec![event(&f.layout, 5 * SECOND, 1.0), event(&f.layout, 65 * SECOND, 2.0)])
            .unwrap();
        let bytes = bincode::serialize(&f.chain.snapshot()).unwrap();

        let mut g = fixture(IngestConfig::default());
        assert!(!g.chain.is_initialised());
        g.chain.restore(bincode::deserialize(&bytes).unwrap()).unwrap();
        assert!(g.chain.is_initialised());
        assert_eq!(g.chain.snapshot(), f.chain.snapshot());
        assert_eq!(g.chain.watermark(), Some(65 * SECOND));
    }
}
