//! Re-aggregating selector
//!
//! Rows retrieved for a lookup come from several granularities, shards and
//! open buckets. They are merged on stored-layout base columns with the same
//! rules used during ingestion, keyed by bucket start plus the effective
//! group-by. When the lookup groups by a different set of dimensions than
//! the aggregation stores, dimensions outside the key keep their last value.

use strata_aggregation::{AggregationLayout, ColumnKeyGenerator, GroupKey, GroupKeyGenerator};
use strata_core::{Expr, MergeFunction, MergedRow, Row, RowMerger};
use strata_storage::SelectionSpec;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Selector {
    keys: ColumnKeyGenerator,
    merger: RowMerger,
    regrouped: bool,
}

impl Selector {
    /// `group_by` names that are not dimensions of the aggregation are ignored
    pub fn new(layout: &AggregationLayout, group_by: &[String]) -> Self {
        let mut requested: Vec<usize> = group_by
            .iter()
            .filter_map(|name| layout.dimension_column(name))
            .collect();
        requested.sort_unstable();
        requested.dedup();

        let mut stored = layout.group_by_columns().to_vec();
        stored.sort_unstable();
        let regrouped = !requested.is_empty() && requested != stored;
        let key_group = if regrouped { requested } else { stored };

        let mut functions = layout.merge_functions();
        if let Some(shard) = layout.shard_column() {
            functions[shard] = Some(MergeFunction::Max);
        }
        for &column in layout.group_by_columns().iter().chain(layout.attribute_columns()) {
            functions[column] = if key_group.contains(&column) {
                None
            } else {
                Some(MergeFunction::Last)
            };
        }

        let key_columns = std::iter::once(layout.timestamp_column()).chain(key_group).collect();
        Self {
            keys: ColumnKeyGenerator::new(key_columns),
            merger: RowMerger::identity(&functions, Some(layout.last_timestamp_column())),
            regrouped,
        }
    }

    /// Whether lookups group differently from the stored group-by
    pub fn is_regrouped(&self) -> bool {
        self.regrouped
    }

    /// Stored columns forming the merge key, bucket start first
    pub fn key_columns(&self) -> &[usize] {
        self.keys.columns()
    }

    pub fn merger(&self) -> &RowMerger {
        &self.merger
    }

    /// Push-down request producing rows in stored layout
    pub fn selection_spec(&self, filter: Expr) -> SelectionSpec {
        SelectionSpec {
            filter,
            group_by: self.keys.columns().to_vec(),
            items: self.merger.items().to_vec(),
            recency: self.merger.recency(),
        }
    }

    /// Merge rows sharing a key, keeping first-seen order
    pub fn merge(&self, rows: Vec<Row>) -> Vec<Row> {
        let mut positions: HashMap<GroupKey, usize> = HashMap::new();
        let mut groups: Vec<MergedRow> = Vec::new();
        for row in rows {
            let key = self.keys.key(&row);
            match positions.get(&key) {
                Some(&position) => self.merger.merge(&mut groups[position], &row),
                None => {
                    positions.insert(key, groups.len());
                    groups.push(self.merger.start(&row));
                }
            }
        }
        groups.into_iter().map(|merged| merged.values).collect()
    }
}
