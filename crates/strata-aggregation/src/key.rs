//! Group-by key generation shared by ingestion and lookups

use std::fmt::Debug;
use strata_core::Value;

/// Grouping key of a row
pub type GroupKey = Vec<Value>;

/// Derives the grouping key of a row
pub trait GroupKeyGenerator: Send + Sync + Debug {
    fn key(&self, row: &[Value]) -> GroupKey;
}

/// Key made of the values at fixed column positions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnKeyGenerator {
    columns: Vec<usize>,
}

impl ColumnKeyGenerator {
    pub fn new(columns: Vec<usize>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }
}

impl GroupKeyGenerator for ColumnKeyGenerator {
    fn key(&self, row: &[Value]) -> GroupKey {
        self.columns
            .iter()
            .map(|&column| row.get(column).cloned().unwrap_or(Value::Null))
            .collect()
    }
}
