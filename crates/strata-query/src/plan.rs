//! Compiled lookup plans and their execution
//!
//! A [`CompiledPlan`] is immutable and reused for every triggering event.
//! Executing it resolves the range and the requested granularity, splits
//! the range into per-level segments, fetches each segment (in parallel
//! when there are several), re-buckets everything to the requested
//! granularity, merges, finalizes, post-filters and sorts.

use crate::decompose::{decompose, Segment};
use crate::error::{QueryError, Result};
use crate::selector::Selector;
use crate::within::BoundWithin;
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;
use strata_aggregation::{AggregationLayout, ExecutorChain};
use strata_core::{BoundExpr, Frame, Granularity, ParallelConfig, Row, TimeRange, Timestamp, Value};
use strata_storage::{CompiledCondition, CompiledSelection, ExecutionContext, Table};
use tracing::debug;

/// Read access to not-yet-sealed buckets
pub trait OpenBuckets: Sync {
    /// Open rows of levels `0..=level` whose bucket starts inside `range`
    fn open_rows(&self, level: usize, range: TimeRange) -> Vec<Row>;
}

impl OpenBuckets for ExecutorChain {
    fn open_rows(&self, level: usize, range: TimeRange) -> Vec<Row> {
        ExecutorChain::open_rows(self, level, range)
    }
}

/// Requested granularity of a lookup
#[derive(Debug, Clone)]
pub enum BoundPer {
    Fixed(Granularity),
    /// String expression over the triggering event
    Dynamic(BoundExpr),
}

impl BoundPer {
    fn resolve(&self, trigger: &[Value], configured: &[Granularity]) -> Result<Granularity> {
        let granularity = match self {
            BoundPer::Fixed(granularity) => return Ok(*granularity),
            BoundPer::Dynamic(expr) => match expr.evaluate(&Frame::new().with_stream(trigger)) {
                Value::String(name) => name
                    .parse::<Granularity>()
                    .map_err(|e| QueryError::InvalidPer(e.to_string()))?,
                other => return Err(QueryError::InvalidPer(format!("per evaluated to {}", other))),
            },
        };
        if !configured.contains(&granularity) {
            return Err(QueryError::InvalidPer(format!("{} is not aggregated", granularity)));
        }
        Ok(granularity)
    }
}

/// Storage read of one table: push-down selection when compiled, else a
/// filtered scan
pub(crate) struct TableRead {
    pub(crate) condition: Box<dyn CompiledCondition>,
    pub(crate) selection: Option<Box<dyn CompiledSelection>>,
}

pub(crate) struct LevelPlan {
    pub(crate) table: Arc<dyn Table>,
    /// Rows of this level inside a segment range
    pub(crate) segment: TableRead,
    /// Distributed mode: rows of this level not yet forwarded to the next
    pub(crate) pending: Option<TableRead>,
}

/// Immutable, reusable lookup plan
pub struct CompiledPlan {
    pub(crate) layout: Arc<AggregationLayout>,
    pub(crate) granularities: Vec<Granularity>,
    pub(crate) levels: Vec<LevelPlan>,
    pub(crate) within: BoundWithin,
    pub(crate) per: BoundPer,
    /// Same semantics as the storage condition, over open stored-layout rows
    pub(crate) in_memory: BoundExpr,
    pub(crate) post_filter: Option<BoundExpr>,
    pub(crate) selector: Selector,
    pub(crate) optimised: bool,
    pub(crate) parallel: ParallelConfig,
}

impl fmt::Debug for CompiledPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledPlan")
            .field("aggregation", &self.layout.name())
            .field("granularities", &self.granularities)
            .field("per", &self.per)
            .field("optimised", &self.optimised)
            .field("regrouped", &self.selector.is_regrouped())
            .field("post_filter", &self.post_filter.is_some())
            .finish()
    }
}

impl CompiledPlan {
    /// Whether every table read is pushed down
    pub fn is_optimised(&self) -> bool {
        self.optimised
    }

    /// Whether retrieved rows are re-grouped by the lookup's own group-by
    pub fn is_regrouped(&self) -> bool {
        self.selector.is_regrouped()
    }

    pub fn has_post_filter(&self) -> bool {
        self.post_filter.is_some()
    }

    pub fn is_distributed(&self) -> bool {
        self.layout.is_distributed()
    }

    /// Segments a triggering event would read
    pub fn segments(&self, trigger: &[Value]) -> Result<Vec<Segment>> {
        let range = self.within.resolve(trigger)?;
        let per = self.per.resolve(trigger, &self.granularities)?;
        Ok(decompose(range, per, &self.granularities))
    }

    /// Run the lookup for one triggering event. `now` bounds the
    /// not-yet-forwarded rows in distributed mode.
    pub fn execute(
        &self,
        trigger: &[Value],
        open: &dyn OpenBuckets,
        now: Timestamp,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Row>> {
        let range = self.within.resolve(trigger)?;
        let per = self.per.resolve(trigger, &self.granularities)?;
        let segments = decompose(range, per, &self.granularities);

        let forward_filters: Vec<Value> = if self.is_distributed() {
            self.granularities
                .iter()
                .skip(1)
                .map(|coarser| Value::Int(coarser.bucket_start(now)))
                .collect()
        } else {
            Vec::new()
        };

        let fetch = |segment: &Segment| self.fetch(segment, &forward_filters, open, ctx);
        let batches = if self.parallel.should_parallelize_segments(segments.len()) {
            segments.par_iter().map(fetch).collect::<Result<Vec<_>>>()?
        } else {
            segments.iter().map(fetch).collect::<Result<Vec<_>>>()?
        };

        let timestamp = self.layout.timestamp_column();
        let mut rows: Vec<Row> = batches.into_iter().flatten().collect();
        for row in &mut rows {
            if let Some(ts) = row.get(timestamp).and_then(Value::as_i64) {
                row[timestamp] = Value::Int(per.bucket_start(ts));
            }
        }
        let retrieved = rows.len();

        let mut output: Vec<Row> = self
            .selector
            .merge(rows)
            .iter()
            .map(|stored| self.layout.finalize(stored))
            .filter(|row| match &self.post_filter {
                Some(filter) => filter.test(&Frame::new().with_stream(trigger).with_aggregate(row)),
                None => true,
            })
            .collect();

        let key_width = 1 + self.layout.group_by_columns().len();
        output.sort_by(|a, b| {
            a.iter()
                .zip(b.iter())
                .take(key_width)
                .map(|(x, y)| x.total_cmp(y))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(
            aggregation = self.layout.name(),
            per = %per,
            start = range.start,
            end = range.end,
            segments = segments.len(),
            retrieved,
            returned = output.len(),
            "Executed lookup"
        );
        Ok(output)
    }

    fn fetch(
        &self,
        segment: &Segment,
        forward_filters: &[Value],
        open: &dyn OpenBuckets,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Row>> {
        let mut params = vec![Value::Int(segment.range.start), Value::Int(segment.range.end)];
        params.extend(forward_filters.iter().cloned());

        let Some(level) = self.levels.get(segment.level) else {
            return Ok(Vec::new());
        };
        let mut rows = self.read(level, &level.segment, &params, ctx)?;

        if self.is_distributed() {
            for finer in &self.levels[..segment.level] {
                if let Some(pending) = &finer.pending {
                    rows.extend(self.read(finer, pending, &params, ctx)?);
                }
            }
        } else {
            rows.extend(
                open.open_rows(segment.level, segment.range)
                    .into_iter()
                    .filter(|row| self.in_memory.test(&Frame::new().with_aggregate(row).with_params(&params))),
            );
        }
        Ok(rows)
    }

    fn read(&self, level: &LevelPlan, read: &TableRead, params: &[Value], ctx: &ExecutionContext) -> Result<Vec<Row>> {
        if let (Some(selection), Some(queryable)) = (&read.selection, level.table.as_queryable()) {
            return Ok(queryable.query(params, selection.as_ref(), ctx)?);
        }
        Ok(level.table.find(params, read.condition.as_ref(), ctx)?)
    }
}
