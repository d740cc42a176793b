//! Retention policy per granularity

use crate::error::{Result, RetentionError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strata_core::{Granularity, PerGranularity, Timestamp};

/// Keyword for a granularity whose buckets are never purged
pub const KEEP_FOREVER: &str = "forever";

/// Retention configuration as written in the runtime config file
///
/// ```yaml
/// retention:
///   enabled: true
///   periods:
///     SECONDS: 10m
///     MONTHS: 5y
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Master switch for purging
    /// Default: true
    pub enabled: bool,

    /// Overrides of the default retention per granularity
    /// (duration strings such as "120s", "24h", "30d", "1w", or "forever")
    pub periods: BTreeMap<Granularity, String>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            periods: BTreeMap::new(),
        }
    }
}

/// Default retention in milliseconds; None keeps buckets forever
pub fn default_retention(granularity: Granularity) -> Option<i64> {
    match granularity {
        Granularity::Seconds => Some(120 * 1_000),
        Granularity::Minutes => Some(24 * 3600 * 1_000),
        Granularity::Hours => Some(30 * 86400 * 1_000),
        Granularity::Days => Some(365 * 86400 * 1_000),
        Granularity::Months | Granularity::Years => None,
    }
}

/// Validated retention per configured granularity
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    enabled: bool,
    retention: PerGranularity<Option<i64>>,
}

impl RetentionPolicy {
    /// Resolve the configuration for the given granularities
    pub fn from_config(config: &RetentionConfig, granularities: &[Granularity]) -> Result<Self> {
        if let Some(unused) = config.periods.keys().find(|g| !granularities.contains(*g)) {
            return Err(RetentionError::InvalidPolicy(format!(
                "retention set for {} which is not an aggregated granularity",
                unused
            )));
        }
        let retention = PerGranularity::from_fn::<RetentionError>(granularities, |granularity| {
            let retention = match config.periods.get(&granularity) {
                Some(period) if period.trim().eq_ignore_ascii_case(KEEP_FOREVER) => None,
                Some(period) => Some(parse_duration(period)?),
                None => default_retention(granularity),
            };
            if let Some(retention_ms) = retention {
                if retention_ms < granularity.min_millis() {
                    return Err(RetentionError::RetentionTooShort {
                        granularity,
                        retention_ms,
                    });
                }
            }
            Ok(retention)
        })?;
        Ok(Self {
            enabled: config.enabled,
            retention,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Retention in milliseconds; None when kept forever or not aggregated
    pub fn retention(&self, granularity: Granularity) -> Option<i64> {
        self.retention.get(granularity).copied().flatten()
    }

    /// Granularities that have a finite retention, finest first
    pub fn purged_granularities(&self) -> Vec<Granularity> {
        self.retention
            .iter()
            .filter(|(_, retention)| retention.is_some())
            .map(|(g, _)| g)
            .collect()
    }

    /// First bucket start that survives a purge at `watermark`; every bucket
    /// starting before it ends before `watermark - retention`
    pub fn cutoff(&self, granularity: Granularity, watermark: Timestamp) -> Option<Timestamp> {
        let retention = self.retention(granularity)?;
        let threshold = watermark.saturating_sub(retention);
        Some(granularity.bucket_start(threshold.saturating_sub(1)))
    }
}

/// Parse duration string to milliseconds
pub fn parse_duration(s: &str) -> Result<i64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(RetentionError::InvalidPolicy("Empty duration".to_string()));
    }

    let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = s.strip_suffix('s') {
        (num, "s")
    } else if let Some(num) = s.strip_suffix('m') {
        (num, "m")
    } else if let Some(num) = s.strip_suffix('h') {
        (num, "h")
    } else if let Some(num) = s.strip_suffix('d') {
        (num, "d")
    } else if let Some(num) = s.strip_suffix('w') {
        (num, "w")
    } else if let Some(num) = s.strip_suffix('y') {
        (num, "y")
    } else {
        return Err(RetentionError::InvalidPolicy(format!("Invalid duration unit: {}", s)));
    };

    let num: i64 = num_str
        .trim()
        .parse()
        .map_err(|_| RetentionError::InvalidPolicy(format!("Invalid number: {}", num_str)))?;
    if num <= 0 {
        return Err(RetentionError::InvalidPolicy(format!("Duration must be positive: {}", s)));
    }

    let unit_millis: i64 = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60 * 1_000,
        "h" => 3600 * 1_000,
        "d" => 86400 * 1_000,
        "w" => 604800 * 1_000,
        _ => 365 * 86400 * 1_000,
    };

    num.checked_mul(unit_millis)
        .ok_or_else(|| RetentionError::InvalidPolicy(format!("Duration overflows: {}", s)))
}
