//! Retention purger
//!
//! Deletes sealed buckets that ended before `watermark - retention`. The
//! delete condition `AGG_TIMESTAMP < _PURGE_CUTOFF` is compiled once per
//! table; every run only supplies the cutoff. A failing table is reported
//! and skipped so the other granularities are still purged.

use crate::error::Result;
use crate::policy::RetentionPolicy;
use std::fmt;
use std::sync::Arc;
use strata_core::{columns, Attribute, AttributeType, Expr, Granularity, PerGranularity, Schema, Timestamp, Value};
use strata_storage::{CompiledCondition, Table};
use tracing::{debug, info, warn};

struct PurgeTarget {
    table: Arc<dyn Table>,
    condition: Box<dyn CompiledCondition>,
}

/// Outcome of one purge run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub watermark: Timestamp,
    /// Rows removed per purged granularity, finest first
    pub removed: Vec<(Granularity, usize)>,
    /// Granularities whose delete failed, with the error message
    pub failures: Vec<(Granularity, String)>,
}

impl PurgeReport {
    pub fn total_removed(&self) -> usize {
        self.removed.iter().map(|(_, count)| count).sum()
    }

    pub fn removed_for(&self, granularity: Granularity) -> usize {
        self.removed
            .iter()
            .find(|(g, _)| *g == granularity)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Deletes expired buckets from the per-granularity tables
pub struct RetentionPurger {
    policy: RetentionPolicy,
    targets: PerGranularity<PurgeTarget>,
}

impl fmt::Debug for RetentionPurger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetentionPurger")
            .field("policy", &self.policy)
            .field("granularities", &self.targets.granularities())
            .finish()
    }
}

impl RetentionPurger {
    /// Compile delete conditions for every granularity with a finite retention
    pub fn new(policy: RetentionPolicy, tables: &PerGranularity<Arc<dyn Table>>) -> Result<Self> {
        let params = Self::params_schema()?;
        let condition = Expr::aggregate(columns::AGG_TIMESTAMP).lt(Expr::param(columns::PURGE_CUTOFF));
        let mut targets = PerGranularity::new();
        if policy.is_enabled() {
            for granularity in policy.purged_granularities() {
                let Some(table) = tables.get(granularity) else {
                    continue;
                };
                let compiled = table.compile_condition(&condition, &params)?;
                targets.insert(
                    granularity,
                    PurgeTarget {
                        table: Arc::clone(table),
                        condition: compiled,
                    },
                );
            }
        }
        Ok(Self { policy, targets })
    }

    fn params_schema() -> Result<Schema> {
        Ok(Schema::new(vec![Attribute::new(columns::PURGE_CUTOFF, AttributeType::Int)])?)
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Delete every bucket that ended before `watermark - retention`
    pub fn purge(&self, watermark: Timestamp) -> PurgeReport {
        let mut report = PurgeReport {
            watermark,
            ..PurgeReport::default()
        };
        for (granularity, target) in self.targets.iter() {
            let Some(cutoff) = self.policy.cutoff(granularity, watermark) else {
                continue;
            };
            match target.table.delete(&[Value::Int(cutoff)], target.condition.as_ref()) {
                Ok(count) => {
                    debug!(
                        granularity = %granularity,
                        table = target.table.name(),
                        cutoff,
                        removed = count,
                        "Purged expired buckets"
                    );
                    report.removed.push((granularity, count));
                }
                Err(e) => {
                    warn!(
                        granularity = %granularity,
                        table = target.table.name(),
                        error = %e,
                        "Purge failed"
                    );
                    report.failures.push((granularity, e.to_string()));
                }
            }
        }
        info!(
            watermark,
            removed = report.total_removed(),
            failures = report.failures.len(),
            "Retention purge completed"
        );
        report
    }
}
