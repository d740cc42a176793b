//! Per-granularity incremental executor
//!
//! Folds base rows into open buckets keyed by bucket start and group key.
//! Once a bucket falls out of the open window it is sealed: persisted to the
//! granularity's table and handed back to the caller as a roll-up row for
//! the next coarser executor. Rows for already sealed buckets are late and
//! handled by [`LatePolicy`].

use crate::error::{AggregationError, Result};
use crate::key::{ColumnKeyGenerator, GroupKey, GroupKeyGenerator};
use crate::layout::AggregationLayout;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use strata_core::{Granularity, MergedRow, Row, RowMerger, TimeRange, Timestamp, Value};
use strata_storage::Table;
use tracing::{debug, warn};

/// What to do with an event whose bucket is already sealed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatePolicy {
    /// Log, count and skip the event
    #[default]
    Drop,
    /// Fail the ingest call
    Reject,
}

/// Ingestion settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Previous buckets kept open by the finest executor to absorb
    /// out-of-order events.
    /// Default: 0
    pub buffer_count: usize,

    /// Policy for events older than every open bucket.
    /// Default: drop
    pub late_events: LatePolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            buffer_count: 0,
            late_events: LatePolicy::Drop,
        }
    }
}

#[derive(Debug, Default)]
struct Bucket {
    groups: Vec<MergedRow>,
    positions: HashMap<GroupKey, usize>,
}

/// Serializable open state of one executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSnapshot {
    pub granularity: Granularity,
    pub sealed_until: Option<Timestamp>,
    pub buckets: Vec<(Timestamp, Vec<MergedRow>)>,
}

/// Incremental executor for one granularity
pub struct IncrementalExecutor {
    granularity: Granularity,
    table: Arc<dyn Table>,
    merger: RowMerger,
    keys: ColumnKeyGenerator,
    buckets: BTreeMap<Timestamp, Bucket>,
    buffer_count: usize,
    late_policy: LatePolicy,
    live: bool,
    sealed_until: Option<Timestamp>,
    dropped_late: u64,
}

impl fmt::Debug for IncrementalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncrementalExecutor")
            .field("granularity", &self.granularity)
            .field("table", &self.table.name())
            .field("open_buckets", &self.buckets.keys().collect::<Vec<_>>())
            .field("live", &self.live)
            .field("sealed_until", &self.sealed_until)
            .finish()
    }
}

impl IncrementalExecutor {
    /// Create a cold executor
    pub fn new(
        granularity: Granularity,
        table: Arc<dyn Table>,
        layout: &AggregationLayout,
        buffer_count: usize,
        late_policy: LatePolicy,
    ) -> Self {
        Self {
            granularity,
            table,
            merger: layout.bucket_merger(),
            keys: ColumnKeyGenerator::new(layout.key_columns()),
            buckets: BTreeMap::new(),
            buffer_count,
            late_policy,
            live: false,
            sealed_until: None,
            dropped_late: 0,
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn table(&self) -> &Arc<dyn Table> {
        &self.table
    }

    /// Live executors seal, persist and forward; cold ones only accumulate
    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn set_live(&mut self, live: bool) {
        self.live = live;
    }

    /// Buckets starting before this boundary are sealed
    pub fn sealed_until(&self) -> Option<Timestamp> {
        self.sealed_until
    }

    pub fn set_sealed_until(&mut self, sealed_until: Option<Timestamp>) {
        self.sealed_until = sealed_until;
    }

    /// Number of late rows dropped so far
    pub fn dropped_late(&self) -> u64 {
        self.dropped_late
    }

    /// Starts of the open buckets, oldest first
    pub fn open_buckets(&self) -> Vec<Timestamp> {
        self.buckets.keys().copied().collect()
    }

    /// Discard all open state
    pub fn reset(&mut self) {
        self.buckets.clear();
        self.sealed_until = None;
    }

    /// Fold base rows into open buckets. Rows sealed along the way are
    /// appended to `sealed` even when a later row fails.
    pub fn process(&mut self, rows: Vec<Row>, sealed: &mut Vec<Row>) -> Result<()> {
        for mut row in rows {
            let timestamp = row
                .first()
                .and_then(Value::as_i64)
                .ok_or_else(|| AggregationError::InvalidEvent("row without timestamp".to_string()))?;
            let start = self.granularity.bucket_start(timestamp);

            if let Some(horizon) = self.late_horizon(start) {
                match self.late_policy {
                    LatePolicy::Drop => {
                        self.dropped_late += 1;
                        warn!(
                            granularity = %self.granularity,
                            timestamp,
                            horizon,
                            "Dropping late event"
                        );
                        continue;
                    }
                    LatePolicy::Reject => {
                        return Err(AggregationError::LateEvent {
                            granularity: self.granularity,
                            timestamp,
                            sealed_until: horizon,
                        });
                    }
                }
            }

            row[0] = Value::Int(start);
            self.fold(start, row);
            if self.live {
                self.seal_excess(sealed)?;
            }
        }
        Ok(())
    }

    /// Seal every open bucket ending at or before `watermark`
    pub fn seal_until(&mut self, watermark: Timestamp, sealed: &mut Vec<Row>) -> Result<()> {
        if !self.live {
            return Ok(());
        }
        while let Some(&start) = self.buckets.keys().next() {
            if self.granularity.next_bucket_start(start) > watermark {
                break;
            }
            self.seal_oldest(sealed)?;
        }
        Ok(())
    }

    /// Open rows of buckets starting inside `range`
    pub fn open_rows(&self, range: TimeRange) -> Vec<Row> {
        if range.is_empty() {
            return Vec::new();
        }
        self.buckets
            .range(range.start..range.end)
            .flat_map(|(_, bucket)| bucket.groups.iter().map(|merged| merged.values.clone()))
            .collect()
    }

    /// Returns the boundary that makes a row in bucket `start` late
    fn late_horizon(&self, start: Timestamp) -> Option<Timestamp> {
        if self.buckets.contains_key(&start) {
            return None;
        }
        if let Some(sealed_until) = self.sealed_until {
            if start < sealed_until {
                return Some(sealed_until);
            }
        }
        match self.buckets.keys().next() {
            Some(&oldest) if self.live && start < oldest => Some(oldest),
            _ => None,
        }
    }

    fn fold(&mut self, start: Timestamp, row: Row) {
        let key = self.keys.key(&row);
        let bucket = self.buckets.entry(start).or_default();
        match bucket.positions.get(&key) {
            Some(&position) => self.merger.merge(&mut bucket.groups[position], &row),
            None => {
                bucket.positions.insert(key, bucket.groups.len());
                bucket.groups.push(self.merger.start(&row));
            }
        }
    }

    fn seal_excess(&mut self, sealed: &mut Vec<Row>) -> Result<()> {
        while self.buckets.len() > self.buffer_count + 1 {
            self.seal_oldest(sealed)?;
        }
        Ok(())
    }

    /// Persist then forward; the bucket stays open if persisting fails
    fn seal_oldest(&mut self, sealed: &mut Vec<Row>) -> Result<()> {
        let Some((&start, bucket)) = self.buckets.first_key_value() else {
            return Ok(());
        };
        let rows: Vec<Row> = bucket.groups.iter().map(|merged| merged.values.clone()).collect();
        self.table.add(rows.clone())?;
        self.buckets.pop_first();

        let end = self.granularity.next_bucket_start(start);
        self.sealed_until = Some(self.sealed_until.map_or(end, |until| until.max(end)));
        debug!(
            granularity = %self.granularity,
            bucket = start,
            groups = rows.len(),
            "Sealed bucket"
        );
        sealed.extend(rows);
        Ok(())
    }

    pub fn snapshot(&self) -> ExecutorSnapshot {
        ExecutorSnapshot {
            granularity: self.granularity,
            sealed_until: self.sealed_until,
            buckets: self
                .buckets
                .iter()
                .map(|(start, bucket)| (*start, bucket.groups.clone()))
                .collect(),
        }
    }

    pub fn restore(&mut self, snapshot: ExecutorSnapshot) -> Result<()> {
        if snapshot.granularity != self.granularity {
            return Err(AggregationError::Snapshot(format!(
                "snapshot for {} restored into {} executor",
                snapshot.granularity, self.granularity
            )));
        }
        self.buckets.clear();
        for (start, groups) in snapshot.buckets {
            let positions = groups
                .iter()
                .enumerate()
                .map(|(position, merged)| (self.keys.key(&merged.values), position))
                .collect();
            self.buckets.insert(start, Bucket { groups, positions });
        }
        self.sealed_until = snapshot.sealed_until;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{AggregateFunction, AggregationDefinition};
    use strata_core::{Attribute, AttributeType};
    use strata_storage::InMemoryTable;

    const MINUTE: i64 = 60_000;

    fn layout() -> AggregationLayout {
        let definition = AggregationDefinition::new(
            "trades",
            vec![
                Attribute::new("symbol", AttributeType::String),
                Attribute::new("price", AttributeType::Float),
            ],
        )
        .group_by(&["symbol"])
        .aggregate(AggregateFunction::Sum, Some("price"), "total");
        AggregationLayout::new(&definition, false).unwrap()
    }

    fn live_executor(layout: &AggregationLayout, buffer_count: usize, policy: LatePolicy) -> (IncrementalExecutor, Arc<InMemoryTable>) {
        let table = Arc::new(InMemoryTable::new("trades_MINUTES", layout.table_schema().clone()));
        let mut executor = IncrementalExecutor::new(Granularity::Minutes, table.clone(), layout, buffer_count, policy);
        executor.set_live(true);
        (executor, table)
    }

    fn event(layout: &AggregationLayout, ts: i64, symbol: &str, price: f64) -> Row {
        layout.base_row(ts, &[Value::from(symbol), Value::Float(price)], None)
    }

    #[test]
    fn test_merges_within_bucket_and_seals_on_next_bucket() {
        let layout = layout();
        let (mut executor, table) = live_executor(&layout, 0, LatePolicy::Drop);
        let mut sealed = Vec::new();
        executor
            .process(
                vec![
                    event(&layout, 1_000, "A", 1.0),
                    event(&layout, 2_000, "B", 5.0),
                    event(&layout, 3_000, "A", 2.0),
                ],
                &mut sealed,
            )
            .unwrap();
        assert!(sealed.is_empty());
        assert_eq!(executor.open_buckets(), vec![0]);

        executor
            .process(vec![event(&layout, MINUTE + 1, "A", 4.0)], &mut sealed)
            .unwrap();
        assert_eq!(sealed.len(), 2);
        assert_eq!(sealed[0][0], Value::Int(0));
        assert_eq!(sealed[0][3], Value::Float(3.0));
        assert_eq!(table.len(), 2);
        assert_eq!(executor.open_buckets(), vec![MINUTE]);
        assert_eq!(executor.sealed_until(), Some(MINUTE));
    }

    #[test]
    fn test_late_events_are_dropped_or_rejected() {
        let layout = layout();
        let (mut executor, _) = live_executor(&layout, 0, LatePolicy::Drop);
        let mut sealed = Vec::new();
        executor
            .process(
                vec![event(&layout, 1_000, "A", 1.0), event(&layout, MINUTE, "A", 1.0)],
                &mut sealed,
            )
            .unwrap();
        executor.process(vec![event(&layout, 2_000, "A", 1.0)], &mut sealed).unwrap();
        assert_eq!(executor.dropped_late(), 1);

        let (mut executor, _) = live_executor(&layout, 0, LatePolicy::Reject);
        let mut sealed = Vec::new();
        let err = executor
            .process(
                vec![
                    event(&layout, MINUTE, "A", 1.0),
                    event(&layout, 2 * MINUTE, "A", 1.0),
                    event(&layout, 1_000, "A", 1.0),
                    event(&layout, 2 * MINUTE + 1, "A", 1.0),
                ],
                &mut sealed,
            )
            .unwrap_err();
        assert!(matches!(err, AggregationError::LateEvent { timestamp: 1_000, .. }));
        // rows before the rejected one stay applied
        assert_eq!(sealed.len(), 1);
        assert_eq!(executor.open_buckets(), vec![2 * MINUTE]);
    }

    #[test]
    fn test_buffer_keeps_previous_buckets_open() {
        let layout = layout();
        let (mut executor, table) = live_executor(&layout, 1, LatePolicy::Drop);
        let mut sealed = Vec::new();
        executor
            .process(
                vec![
                    event(&layout, 1_000, "A", 1.0),
                    event(&layout, MINUTE, "A", 2.0),
                    event(&layout, 2_000, "A", 3.0),
                ],
                &mut sealed,
            )
            .unwrap();
        assert!(sealed.is_empty());
        assert_eq!(executor.open_buckets(), vec![0, MINUTE]);

        executor
            .process(vec![event(&layout, 2 * MINUTE, "A", 1.0)], &mut sealed)
            .unwrap();
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0][3], Value::Float(4.0));
        assert_eq!(table.len(), 1);
        assert_eq!(executor.open_buckets(), vec![MINUTE, 2 * MINUTE]);
    }

    #[test]
    fn test_watermark_seals_without_new_events() {
        let layout = layout();
        let (mut executor, table) = live_executor(&layout, 0, LatePolicy::Drop);
        let mut sealed = Vec::new();
        executor.process(vec![event(&layout, 1_000, "A", 1.0)], &mut sealed).unwrap();
        executor.seal_until(MINUTE - 1, &mut sealed).unwrap();
        assert!(sealed.is_empty());
        executor.seal_until(MINUTE, &mut sealed).unwrap();
        assert_eq!(sealed.len(), 1);
        assert_eq!(table.len(), 1);
        assert!(executor.open_buckets().is_empty());
    }

    #[test]
    fn test_cold_executor_keeps_state() {
        let layout = layout();
        let (mut executor, table) = live_executor(&layout, 0, LatePolicy::Drop);
        executor.set_live(false);
        let mut sealed = Vec::new();
        executor
            .process(
                vec![event(&layout, 1_000, "A", 1.0), event(&layout, 5 * MINUTE, "A", 1.0)],
                &mut sealed,
            )
            .unwrap();
        executor.seal_until(10 * MINUTE, &mut sealed).unwrap();
        assert!(sealed.is_empty());
        assert!(table.is_empty());
        assert_eq!(executor.open_buckets(), vec![0, 5 * MINUTE]);

        // turning live seals the excess on the next row
        executor.set_live(true);
        executor.process(vec![event(&layout, 5 * MINUTE + 1, "A", 1.0)], &mut sealed).unwrap();
        assert_eq!(sealed.len(), 1);
        assert_eq!(executor.open_buckets(), vec![5 * MINUTE]);
    }

    #[test]
    fn test_open_rows_and_snapshot_restore() {
        let layout = layout();
        let (mut executor, _) = live_executor(&layout, 1, LatePolicy::Drop);
        let mut sealed = Vec::new();
        executor
            .process(
                vec![
                    event(&layout, 1_000, "A", 1.0),
                    event(&layout, MINUTE, "A", 2.0),
                    event(&layout, MINUTE, "B", 3.0),
                ],
                &mut sealed,
            )
            .unwrap();
        assert_eq!(executor.open_rows(TimeRange::new(MINUTE, 2 * MINUTE)).len(), 2);
        assert_eq!(executor.open_rows(TimeRange::new(0, 2 * MINUTE)).len(), 3);

        let snapshot = executor.snapshot();
        let (mut restored, _) = live_executor(&layout, 1, LatePolicy::Drop);
        restored.restore(snapshot.clone()).unwrap();
        assert_eq!(restored.snapshot(), snapshot);

        // restored positions keep merging into the same group
        restored.process(vec![event(&layout, MINUTE + 5, "B", 1.0)], &mut sealed).unwrap();
        let rows = restored.open_rows(TimeRange::new(MINUTE, 2 * MINUTE));
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|row| row[3] == Value::Float(4.0)));
    }
}
