//! Runtime configuration
//!
//! One validated value describing an aggregation runtime. Loaded from YAML:
//!
//! ```yaml
//! definition:
//!   name: trades
//!   stream:
//!     - { name: symbol, type: string }
//!     - { name: price, type: float }
//!   group_by: [symbol]
//!   aggregates:
//!     - { function: sum, attribute: price, as: total }
//!   granularities: [SECONDS, MINUTES, HOURS]
//! ingest:
//!   buffer_count: 1
//!   late_events: drop
//! retention:
//!   periods:
//!     SECONDS: 10m
//! shard_id: node-1
//! logging:
//!   level: debug
//! ```

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use strata_aggregation::{AggregationDefinition, IngestConfig};
use strata_core::ParallelConfig;
use strata_retention::{RetentionConfig, RetentionPolicy};
use tracing::Level;

/// Aggregation runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// What to aggregate and at which granularities
    pub definition: AggregationDefinition,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    /// Parallel segment retrieval during lookups
    #[serde(default)]
    pub parallel: ParallelConfig,

    #[serde(default)]
    pub lookup: LookupSettings,

    /// Shard identifier; setting it makes the aggregation distributed
    #[serde(default)]
    pub shard_id: Option<String>,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Lookup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupSettings {
    /// Push grouping and filtering down to tables that support it
    /// Default: true
    pub optimised: bool,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self { optimised: true }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Include target in logs
    pub show_target: bool,
    /// Include thread IDs in logs
    pub show_thread_ids: bool,
    /// Include file and line numbers
    pub show_location: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_target: true,
            show_thread_ids: false,
            show_location: false,
        }
    }
}

impl LoggingSettings {
    /// Parse log level string to tracing Level
    pub fn log_level(&self) -> Level {
        match self.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

impl RuntimeConfig {
    /// Configuration with default settings around a definition
    pub fn new(definition: AggregationDefinition) -> Self {
        Self {
            definition,
            ingest: IngestConfig::default(),
            retention: RetentionConfig::default(),
            parallel: ParallelConfig::default(),
            lookup: LookupSettings::default(),
            shard_id: None,
            logging: LoggingSettings::default(),
        }
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: RuntimeConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn with_ingest(mut self, ingest: IngestConfig) -> Self {
        self.ingest = ingest;
        self
    }

    pub fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_parallel(mut self, parallel: ParallelConfig) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_optimised_lookup(mut self, optimised: bool) -> Self {
        self.lookup.optimised = optimised;
        self
    }

    pub fn with_shard_id(mut self, shard_id: impl Into<String>) -> Self {
        self.shard_id = Some(shard_id.into());
        self
    }

    pub fn is_distributed(&self) -> bool {
        self.shard_id.is_some()
    }

    /// Parse log level string to tracing Level
    pub fn log_level(&self) -> Level {
        self.logging.log_level()
    }

    /// Validate the definition, the shard id and the retention periods
    pub fn validate(&self) -> Result<RetentionPolicy> {
        self.definition.validate()?;
        if let Some(shard) = &self.shard_id {
            if shard.trim().is_empty() {
                return Err(EngineError::Config("shard_id must not be empty".to_string()));
            }
        }
        let policy = RetentionPolicy::from_config(&self.retention, &self.definition.granularities)?;
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_aggregation::LatePolicy;
    use strata_core::Granularity;

    const MINIMAL: &str = r#"
definition:
  name: trades
  stream:
    - { name: symbol, type: string }
    - { name: price, type: float }
  group_by: [symbol]
  aggregates:
    - { function: sum, attribute: price, as: total }
  granularities: [SECONDS, MINUTES, HOURS]
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = RuntimeConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.ingest, IngestConfig::default());
        assert!(config.retention.enabled);
        assert!(config.parallel.enabled);
        assert!(config.lookup.optimised);
        assert!(!config.is_distributed());
        assert_eq!(config.log_level(), Level::INFO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let yaml = format!(
            "{}{}",
            MINIMAL,
            r#"
ingest:
  buffer_count: 2
  late_events: reject
retention:
  periods:
    SECONDS: 10m
    HOURS: forever
parallel:
  segment_threshold: 3
lookup:
  optimised: false
shard_id: node-1
logging:
  level: DEBUG
  show_location: true
"#
        );
        let config = RuntimeConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.ingest.buffer_count, 2);
        assert_eq!(config.ingest.late_events, LatePolicy::Reject);
        assert_eq!(config.parallel.segment_threshold, 3);
        assert!(config.parallel.enabled);
        assert!(!config.lookup.optimised);
        assert_eq!(config.shard_id.as_deref(), Some("node-1"));
        assert_eq!(config.log_level(), Level::DEBUG);
        assert!(config.logging.show_target);

        let policy = config.validate().unwrap();
        assert_eq!(policy.retention(Granularity::Seconds), Some(600_000));
        assert_eq!(policy.retention(Granularity::Hours), None);
    }

    #[test]
    fn test_validation_failures() {
        let base = RuntimeConfig::from_yaml(MINIMAL).unwrap();
        assert!(matches!(
            base.clone().with_shard_id("  ").validate(),
            Err(EngineError::Config(_))
        ));

        let mut retention = RetentionConfig::default();
        retention.periods.insert(Granularity::Minutes, "soon".to_string());
        assert!(matches!(
            base.clone().with_retention(retention).validate(),
            Err(EngineError::Retention(_))
        ));

        let mut empty = base;
        empty.definition.aggregates.clear();
        assert!(matches!(empty.validate(), Err(EngineError::Aggregation(_))));
    }

    #[test]
    fn test_missing_definition_is_rejected() {
        assert!(matches!(
            RuntimeConfig::from_yaml("shard_id: a\n"),
            Err(EngineError::Yaml(_))
        ));
    }
}
