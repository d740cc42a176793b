//! Wall-clock abstraction used for processing-time aggregation

use crate::types::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current time in milliseconds since Unix epoch
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> Timestamp;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Timestamp {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for tests and replay
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
