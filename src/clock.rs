//! Time source abstraction.
//!
//! Window slots and TTL expiry are all derived from epoch reads through the
//! [`Clock`] trait, so the limiter and stores can be driven by a manual
//! clock in tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// A source of wall-clock epoch time.
pub trait Clock: Send + Sync {
    /// Current time as whole seconds since the Unix epoch.
    fn epoch_secs(&self) -> u64;

    /// Current time as milliseconds since the Unix epoch.
    fn epoch_ms(&self) -> i64;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_secs(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }

    fn epoch_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A manually advanced clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    /// Create a manual clock starting at the given epoch second.
    pub fn new(epoch_secs: u64) -> Self {
        Self {
            now_ms: AtomicI64::new(epoch_secs as i64 * 1000),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn epoch_secs(&self) -> u64 {
        (self.now_ms.load(Ordering::SeqCst) / 1000).max(0) as u64
    }

    fn epoch_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
