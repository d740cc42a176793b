//! Incremental merge rules shared by ingestion and query-time re-aggregation

use crate::types::{Row, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How two partial values of one column combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeFunction {
    Sum,
    Min,
    Max,
    /// Value of the most recent row, ordered by the merger's recency column
    Last,
}

impl MergeFunction {
    pub fn name(&self) -> &'static str {
        match self {
            MergeFunction::Sum => "sum",
            MergeFunction::Min => "min",
            MergeFunction::Max => "max",
            MergeFunction::Last => "last",
        }
    }
}

/// One output column of a merging selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectItem {
    /// Copy a grouping column from the first row of the group
    Column(usize),
    /// Combine a source column across every row of the group
    Aggregate { function: MergeFunction, column: usize },
}

impl SelectItem {
    pub fn column(&self) -> usize {
        match self {
            SelectItem::Column(column) | SelectItem::Aggregate { column, .. } => *column,
        }
    }
}

/// Accumulated output row together with its recency watermark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRow {
    pub values: Row,
    pub recency: Value,
}

/// Applies a list of [`SelectItem`]s to fold source rows into one output row
#[derive(Debug, Clone, PartialEq)]
pub struct RowMerger {
    items: Vec<SelectItem>,
    recency: Option<usize>,
}

impl RowMerger {
    /// `recency` names the source column ordering rows for `Last`
    pub fn new(items: Vec<SelectItem>, recency: Option<usize>) -> Self {
        Self { items, recency }
    }

    /// Identity layout: column `i` of the output is column `i` of the source
    pub fn identity(functions: &[Option<MergeFunction>], recency: Option<usize>) -> Self {
        let items = functions
            .iter()
            .enumerate()
            .map(|(column, function)| match function {
                Some(function) => SelectItem::Aggregate {
                    function: *function,
                    column,
                },
                None => SelectItem::Column(column),
            })
            .collect();
        Self::new(items, recency)
    }

    pub fn items(&self) -> &[SelectItem] {
        &self.items
    }

    /// Source column ordering rows for `Last`
    pub fn recency(&self) -> Option<usize> {
        self.recency
    }

    /// Width of the produced rows
    pub fn width(&self) -> usize {
        self.items.len()
    }

    fn recency_of(&self, source: &[Value]) -> Value {
        self.recency
            .and_then(|index| source.get(index))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Open a new accumulator from the first row of a group
    pub fn start(&self, source: &[Value]) -> MergedRow {
        let values = self
            .items
            .iter()
            .map(|item| source.get(item.column()).cloned().unwrap_or(Value::Null))
            .collect();
        MergedRow {
            values,
            recency: self.recency_of(source),
        }
    }

    /// Fold one more source row into an accumulator
    pub fn merge(&self, acc: &mut MergedRow, source: &[Value]) {
        let recency = self.recency_of(source);
        let newer = acc.recency.is_null() || recency.compare(&acc.recency) != Some(Ordering::Less);

        for (slot, item) in acc.values.iter_mut().zip(&self.items) {
            let SelectItem::Aggregate { function, column } = item else {
                continue;
            };
            let incoming = source.get(*column).unwrap_or(&Value::Null);
            match function {
                MergeFunction::Sum => *slot = slot.add(incoming),
                MergeFunction::Min => {
                    if replaces(slot, incoming, Ordering::Less) {
                        *slot = incoming.clone();
                    }
                }
                MergeFunction::Max => {
                    if replaces(slot, incoming, Ordering::Greater) {
                        *slot = incoming.clone();
                    }
                }
                MergeFunction::Last => {
                    if newer {
                        *slot = incoming.clone();
                    }
                }
            }
        }
        if newer && !recency.is_null() {
            acc.recency = recency;
        }
    }

    /// Fold a whole group; None when `rows` is empty
    pub fn merge_all<'a>(&self, rows: impl IntoIterator<Item = &'a [Value]>) -> Option<MergedRow> {
        let mut rows = rows.into_iter();
        let mut acc = self.start(rows.next()?);
        for row in rows {
            self.merge(&mut acc, row);
        }
        Some(acc)
    }
}

fn replaces(current: &Value, incoming: &Value, wanted: Ordering) -> bool {
    if incoming.is_null() {
        return false;
    }
    current.is_null() || incoming.compare(current) == Some(wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    // key, value, last-ts, sum, min, max
    fn merger() -> RowMerger {
        RowMerger::identity(
            &[
                None,
                Some(MergeFunction::Last),
                Some(MergeFunction::Max),
                Some(MergeFunction::Sum),
                Some(MergeFunction::Min),
                Some(MergeFunction::Max),
            ],
            Some(2),
        )
    }

    fn row(key: &str, value: &str, ts: i64, x: f64) -> Row {
        vec![
            Value::from(key),
            Value::from(value),
            Value::Int(ts),
            Value::Float(x),
            Value::Float(x),
            Value::Float(x),
        ]
    }

    #[test]
    fn test_merge_functions() {
        let merger = merger();
        let rows = [
            row("A", "first", 10, 3.0),
            row("A", "third", 30, 1.0),
            row("A", "second", 20, 5.0),
        ];
        let merged = merger.merge_all(rows.iter().map(|r| r.as_slice())).unwrap();
        assert_eq!(merged.values[0], Value::from("A"));
        assert_eq!(merged.values[1], Value::from("third"));
        assert_eq!(merged.values[2], Value::Int(30));
        assert_eq!(merged.values[3], Value::Float(9.0));
        assert_eq!(merged.values[4], Value::Float(1.0));
        assert_eq!(merged.values[5], Value::Float(5.0));
        assert_eq!(merged.recency, Value::Int(30));
    }

    #[test]
    fn test_last_ties_prefer_later_row() {
        let merger = merger();
        let mut acc = merger.start(&row("A", "old", 10, 1.0));
        merger.merge(&mut acc, &row("A", "new", 10, 1.0));
        assert_eq!(acc.values[1], Value::from("new"));
    }

    #[test]
    fn test_nulls_are_ignored_by_min_max_and_sum() {
        let merger = merger();
        let mut acc = merger.start(&row("A", "v", 10, 2.0));
        let mut nulls = row("A", "v", 5, 0.0);
        nulls[3] = Value::Null;
        nulls[4] = Value::Null;
        nulls[5] = Value::Null;
        merger.merge(&mut acc, &nulls);
        assert_eq!(acc.values[3], Value::Float(2.0));
        assert_eq!(acc.values[4], Value::Float(2.0));
        assert_eq!(acc.values[5], Value::Float(2.0));
        // older row does not move the recency or the last value
        assert_eq!(acc.recency, Value::Int(10));
    }

    #[test]
    fn test_projection_with_select_items() {
        let merger = RowMerger::new(
            vec![
                SelectItem::Column(0),
                SelectItem::Aggregate {
                    function: MergeFunction::Sum,
                    column: 3,
                },
            ],
            None,
        );
        assert_eq!(merger.width(), 2);
        let rows = [row("A", "x", 1, 1.5), row("A", "y", 2, 2.5)];
        let merged = merger.merge_all(rows.iter().map(|r| r.as_slice())).unwrap();
        assert_eq!(merged.values, vec![Value::from("A"), Value::Float(4.0)]);
        assert!(merger.merge_all(std::iter::empty()).is_none());
    }
}
