//! Join condition rewriting
//!
//! The `on` condition of a lookup is split at its top-level conjunctions.
//! A conjunct that only reads stored dimension columns (group-by or plain
//! attributes) and constants can be evaluated by the storage engine and the
//! in-memory scan; anything touching the triggering stream or an aggregate
//! output is deferred until retrieved rows have been finalized.

use strata_aggregation::AggregationLayout;
use strata_core::{columns, Expr, Source};

/// A join condition split into its storage-side and deferred parts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitCondition {
    pub pushable: Vec<Expr>,
    pub deferred: Vec<Expr>,
}

impl SplitCondition {
    /// Range filter on bucket start followed by the pushable conjuncts
    pub fn storage_condition(&self) -> Expr {
        self.pushable.iter().cloned().fold(range_condition(), Expr::and)
    }

    /// Conjunction of the deferred parts, if any
    pub fn post_filter(&self) -> Option<Expr> {
        Expr::conjunction(self.deferred.iter().cloned())
    }
}

/// `AGG_TIMESTAMP >= _START AND AGG_TIMESTAMP < _END`
pub fn range_condition() -> Expr {
    Expr::aggregate(columns::AGG_TIMESTAMP)
        .ge(Expr::param(columns::START))
        .and(Expr::aggregate(columns::AGG_TIMESTAMP).lt(Expr::param(columns::END)))
}

/// Split `on` into pushable and deferred conjuncts; literal `true` is dropped
pub fn split_condition(on: &Expr, layout: &AggregationLayout) -> SplitCondition {
    let mut split = SplitCondition::default();
    for conjunct in on.conjuncts() {
        if conjunct.is_truth() {
            continue;
        }
        let pushable = conjunct
            .columns()
            .iter()
            .all(|(source, name)| *source == Source::Aggregate && layout.dimension_column(name).is_some());
        if pushable {
            split.pushable.push(conjunct.clone());
        } else {
            split.deferred.push(conjunct.clone());
        }
    }
    split
}
