//! Time granularities and bucket boundary arithmetic
//!
//! All boundaries are computed in UTC. Seconds through days are fixed-width
//! buckets; months and years follow the calendar.

use crate::error::{CoreError, Result};
use crate::types::{TimeRange, Timestamp};
use chrono::{DateTime, Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SECOND_MILLIS: i64 = 1_000;
const MINUTE_MILLIS: i64 = 60 * SECOND_MILLIS;
const HOUR_MILLIS: i64 = 60 * MINUTE_MILLIS;
const DAY_MILLIS: i64 = 24 * HOUR_MILLIS;

/// One level of the bucket hierarchy, ordered finest to coarsest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Granularity {
    Seconds,
    Minutes,
    Hours,
    Days,
    Months,
    Years,
}

impl Granularity {
    /// Number of granularities
    pub const COUNT: usize = 6;

    /// All granularities, finest first
    pub const ALL: [Granularity; Granularity::COUNT] = [
        Granularity::Seconds,
        Granularity::Minutes,
        Granularity::Hours,
        Granularity::Days,
        Granularity::Months,
        Granularity::Years,
    ];

    /// Position in the hierarchy (0 = finest)
    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            Granularity::Seconds => "SECONDS",
            Granularity::Minutes => "MINUTES",
            Granularity::Hours => "HOURS",
            Granularity::Days => "DAYS",
            Granularity::Months => "MONTHS",
            Granularity::Years => "YEARS",
        }
    }

    /// Bucket width for fixed-width granularities
    pub fn fixed_millis(&self) -> Option<i64> {
        match self {
            Granularity::Seconds => Some(SECOND_MILLIS),
            Granularity::Minutes => Some(MINUTE_MILLIS),
            Granularity::Hours => Some(HOUR_MILLIS),
            Granularity::Days => Some(DAY_MILLIS),
            Granularity::Months | Granularity::Years => None,
        }
    }

    /// Shortest possible bucket width
    pub fn min_millis(&self) -> i64 {
        match self {
            Granularity::Months => 28 * DAY_MILLIS,
            Granularity::Years => 365 * DAY_MILLIS,
            fixed => fixed.fixed_millis().unwrap_or(DAY_MILLIS),
        }
    }

    /// Start of the bucket containing `ts`
    pub fn bucket_start(&self, ts: Timestamp) -> Timestamp {
        if let Some(width) = self.fixed_millis() {
            return ts.div_euclid(width) * width;
        }
        let Some(datetime) = DateTime::from_timestamp_millis(ts) else {
            return ts;
        };
        match self {
            Granularity::Months => month_start(datetime.year(), datetime.month()).unwrap_or(ts),
            _ => month_start(datetime.year(), 1).unwrap_or(ts),
        }
    }

    /// End (exclusive) of the bucket containing `ts`
    pub fn next_bucket_start(&self, ts: Timestamp) -> Timestamp {
        if let Some(width) = self.fixed_millis() {
            return self.bucket_start(ts).saturating_add(width);
        }
        let Some(datetime) = DateTime::from_timestamp_millis(ts) else {
            return i64::MAX;
        };
        let next = match self {
            Granularity::Months if datetime.month() == 12 => month_start(datetime.year() + 1, 1),
            Granularity::Months => month_start(datetime.year(), datetime.month() + 1),
            _ => month_start(datetime.year() + 1, 1),
        };
        next.unwrap_or(i64::MAX)
    }

    /// The bucket containing `ts`
    pub fn bucket_range(&self, ts: Timestamp) -> TimeRange {
        TimeRange::new(self.bucket_start(ts), self.next_bucket_start(ts))
    }

    /// First bucket boundary at or after `ts`
    pub fn ceil(&self, ts: Timestamp) -> Timestamp {
        let start = self.bucket_start(ts);
        if start == ts {
            ts
        } else {
            self.next_bucket_start(ts)
        }
    }

    /// Whether `ts` is a bucket boundary
    pub fn is_aligned(&self, ts: Timestamp) -> bool {
        self.bucket_start(ts) == ts
    }
}

fn month_start(year: i32, month: u32) -> Option<Timestamp> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc().timestamp_millis())
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Granularity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sec" | "secs" | "second" | "seconds" => Ok(Granularity::Seconds),
            "min" | "mins" | "minute" | "minutes" => Ok(Granularity::Minutes),
            "hour" | "hours" => Ok(Granularity::Hours),
            "day" | "days" => Ok(Granularity::Days),
            "month" | "months" => Ok(Granularity::Months),
            "year" | "years" => Ok(Granularity::Years),
            _ => Err(CoreError::UnknownGranularity(s.to_string())),
        }
    }
}

/// Fixed-size table of values indexed by granularity ordinal
#[derive(Debug, Clone)]
pub struct PerGranularity<T> {
    slots: [Option<T>; Granularity::COUNT],
}

impl<T> PerGranularity<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Build a table with a value for each of the given granularities
    pub fn from_fn<E>(
        granularities: &[Granularity],
        mut f: impl FnMut(Granularity) -> std::result::Result<T, E>,
    ) -> std::result::Result<Self, E> {
        let mut table = Self::new();
        for &granularity in granularities {
            table.insert(granularity, f(granularity)?);
        }
        Ok(table)
    }

    pub fn insert(&mut self, granularity: Granularity, value: T) -> Option<T> {
        self.slots[granularity.ordinal()].replace(value)
    }

    pub fn get(&self, granularity: Granularity) -> Option<&T> {
        self.slots[granularity.ordinal()].as_ref()
    }

    pub fn get_mut(&mut self, granularity: Granularity) -> Option<&mut T> {
        self.slots[granularity.ordinal()].as_mut()
    }

    pub fn contains(&self, granularity: Granularity) -> bool {
        self.slots[granularity.ordinal()].is_some()
    }

    /// Present entries, finest first
    pub fn iter(&self) -> impl Iterator<Item = (Granularity, &T)> {
        Granularity::ALL
            .iter()
            .zip(self.slots.iter())
            .filter_map(|(g, slot)| slot.as_ref().map(|v| (*g, v)))
    }

    /// Present granularities, finest first
    pub fn granularities(&self) -> Vec<Granularity> {
        self.iter().map(|(g, _)| g).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for PerGranularity<T> {
    fn default() -> Self {
        Self::new()
    }
}
