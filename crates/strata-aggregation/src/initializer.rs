//! Rebuilds executor state from persisted tables after a restart
//!
//! Every sealed bucket of a level is persisted before it is forwarded, so
//! the open state of a coarser executor is exactly the finer table's rows
//! that the coarser table does not cover yet. Starting at the coarsest
//! level, rows of the next finer table from the end of the latest coarser
//! bucket onwards are replayed into the coarser executor; the end of the
//! latest replayed row becomes the boundary for the next level down.

use crate::chain::ExecutorChain;
use crate::error::Result;
use std::fmt;
use strata_core::{columns, Attribute, AttributeType, Expr, Granularity, Row, Schema, Timestamp, Value};
use strata_storage::{CompiledCondition, ExecutionContext};
use tracing::{debug, info};

/// Outcome of an initialisation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// The chain was already initialised and nothing was read
    pub skipped: bool,
    /// Rows replayed into each rebuilt executor, coarsest first
    pub replayed: Vec<(Granularity, usize)>,
    /// Buckets of the finest level starting before this are sealed
    pub resume_from: Option<Timestamp>,
}

/// Reads rows from the per-granularity tables and replays them up the chain
pub struct ExecutorsInitialiser {
    shard: Option<String>,
    /// One compiled `AGG_TIMESTAMP >= _START` read per level, finest first
    conditions: Vec<Box<dyn CompiledCondition>>,
}

impl fmt::Debug for ExecutorsInitialiser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorsInitialiser")
            .field("shard", &self.shard)
            .field("levels", &self.conditions.len())
            .finish()
    }
}

impl ExecutorsInitialiser {
    /// Compile the reads for every table of the chain. In distributed mode
    /// only rows of `shard` are replayed.
    pub fn new(chain: &ExecutorChain, shard: Option<String>) -> Result<Self> {
        let distributed = chain.layout().is_distributed();
        let mut condition = Expr::aggregate(columns::AGG_TIMESTAMP).ge(Expr::param(columns::START));
        let mut params = vec![Attribute::new(columns::START, AttributeType::Int)];
        if distributed {
            condition = condition.and(Expr::aggregate(columns::SHARD_ID).equal(Expr::param(columns::SHARD)));
            params.push(Attribute::new(columns::SHARD, AttributeType::String));
        }
        let params = Schema::new(params)?;

        let mut conditions = Vec::with_capacity(chain.len());
        for level in 0..chain.len() {
            if let Some(executor) = chain.executor(level) {
                conditions.push(executor.table().compile_condition(&condition, &params)?);
            }
        }
        Ok(Self {
            shard: if distributed { shard } else { None },
            conditions,
        })
    }

    /// Rebuild the chain once; later calls return a skipped report. Table
    /// reads carry `ctx`.
    pub fn initialise(&self, chain: &mut ExecutorChain, ctx: &ExecutionContext) -> Result<InitReport> {
        if chain.is_initialised() {
            return Ok(InitReport {
                skipped: true,
                ..InitReport::default()
            });
        }
        self.reinitialise(chain, ctx)
    }

    /// Rebuild every executor above the finest from the tables, even if
    /// the chain was initialised before. The chain is live afterwards.
    pub fn reinitialise(&self, chain: &mut ExecutorChain, ctx: &ExecutionContext) -> Result<InitReport> {
        let granularities = chain.granularities();
        let mut report = InitReport::default();
        let Some(coarsest) = granularities.len().checked_sub(1) else {
            return Ok(report);
        };

        // End of the latest bucket already persisted at the coarsest level
        let mut boundary = self
            .read(chain, coarsest, None, ctx)?
            .iter()
            .filter_map(timestamp_of)
            .max()
            .map(|latest| granularities[coarsest].next_bucket_start(latest));

        for level in (1..=coarsest).rev() {
            let mut rows = self.read(chain, level - 1, boundary, ctx)?;
            rows.sort_by_key(|row| timestamp_of(row).unwrap_or(Timestamp::MIN));
            let latest = rows.iter().filter_map(timestamp_of).max();
            let replayed = rows.len();

            if let Some(executor) = chain.executor_mut(level) {
                executor.reset();
                executor.set_live(false);
                executor.set_sealed_until(boundary);
                let mut sealed = Vec::new();
                executor.process(rows, &mut sealed)?;
            }
            debug!(
                granularity = %granularities[level],
                from = ?boundary,
                rows = replayed,
                "Replayed finer rows"
            );
            report.replayed.push((granularities[level], replayed));

            if let Some(latest) = latest {
                boundary = Some(granularities[level - 1].next_bucket_start(latest));
            }
        }

        if let Some(root) = chain.executor_mut(0) {
            let sealed_until = match (root.sealed_until(), boundary) {
                (Some(current), Some(boundary)) => Some(current.max(boundary)),
                (current, boundary) => current.or(boundary),
            };
            root.set_sealed_until(sealed_until);
        }
        chain.set_live(true);
        chain.set_initialised(true);
        report.resume_from = chain.executor(0).and_then(|root| root.sealed_until());

        info!(
            aggregation = chain.layout().name(),
            shard = ?self.shard,
            resume_from = ?report.resume_from,
            replayed = report.replayed.iter().map(|(_, n)| n).sum::<usize>(),
            "Initialised executors"
        );
        Ok(report)
    }

    fn read(
        &self,
        chain: &ExecutorChain,
        level: usize,
        from: Option<Timestamp>,
        ctx: &ExecutionContext,
    ) -> Result<Vec<Row>> {
        let (Some(executor), Some(condition)) = (chain.executor(level), self.conditions.get(level)) else {
            return Ok(Vec::new());
        };
        let mut params = vec![Value::Int(from.unwrap_or(Timestamp::MIN))];
        if let Some(shard) = &self.shard {
            params.push(Value::from(shard.as_str()));
        }
        Ok(executor
            .table()
            .find(&params, condition.as_ref(), ctx)?)
    }
}

fn timestamp_of(row: &Row) -> Option<Timestamp> {
    row.first().and_then(Value::as_i64)
}
