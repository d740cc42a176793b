//! Parallel lookup configuration.
//!
//! A lookup decomposes its time range into segments served by different
//! granularity tables; these settings control when the segments are
//! fetched in parallel.

use serde::{Deserialize, Serialize};

/// Configuration for parallel segment retrieval during lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Minimum number of segments before fetching them in parallel.
    /// Default: 2
    pub segment_threshold: usize,

    /// Master switch for parallel retrieval.
    /// Default: true
    pub enabled: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            segment_threshold: 2,
            enabled: true,
        }
    }
}

impl ParallelConfig {
    /// Creates a new ParallelConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that always runs sequentially.
    pub fn sequential() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Returns true if segment retrieval should run in parallel.
    pub fn should_parallelize_segments(&self, segment_count: usize) -> bool {
        self.enabled && segment_count >= self.segment_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ParallelConfig::default();
        assert_eq!(config.segment_threshold, 2);
        assert!(config.enabled);
    }

    #[test]
    fn test_should_parallelize() {
        let config = ParallelConfig::default();
        assert!(!config.should_parallelize_segments(1));
        assert!(config.should_parallelize_segments(2));
        assert!(!ParallelConfig::sequential().should_parallelize_segments(10));
    }
}
