//! Time source injected into the engine.

use crate::error::{CoreError, CoreResult};
use crate::types::Timestamp;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Supplies the current time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
///
/// Session expiry, cache TTLs and usage-stat day boundaries are tested
/// against this.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Creates a clock reading `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_millis(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Converts a duration to whole milliseconds, saturating.
#[must_use]
pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Renders a timestamp as a `YYYY-MM-DD` UTC day.
///
/// # Errors
///
/// Returns a validation error if the timestamp lies outside the range
/// `chrono` can represent.
pub fn day_of(timestamp: Timestamp) -> CoreResult<String> {
    DateTime::from_timestamp_millis(timestamp)
        .map(|at| at.format("%Y-%m-%d").to_string())
        .ok_or_else(|| CoreError::validation(format!("timestamp {timestamp} is out of range")))
}
