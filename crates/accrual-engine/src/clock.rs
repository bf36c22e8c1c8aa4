//! Time sources
//!
//! Accrual only moves forward: a clock handed to the engine must never return
//! a smaller timestamp than one it returned before.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic source of unix timestamps in seconds
pub trait TimeSource: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall clock, clamped so it never runs backwards
#[derive(Debug, Default)]
pub struct SystemClock {
    high_water: AtomicU64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> u64 {
        let wall = chrono::Utc::now().timestamp().max(0) as u64;
        let previous = self.high_water.fetch_max(wall, Ordering::AcqRel);
        previous.max(wall)
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    /// Move to `ts`; earlier timestamps are ignored
    pub fn set(&self, ts: u64) {
        self.now.fetch_max(ts, Ordering::AcqRel);
    }

    pub fn advance(&self, secs: u64) -> u64 {
        self.now.fetch_add(secs, Ordering::AcqRel) + secs
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}
