//! Time sources
//!
//! The limiter works on monotonic instants while task and audit records carry
//! wall-clock UTC timestamps. Both come from a [`Clock`] so tests can drive
//! time explicitly with [`ManualClock`].

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Source of the current time
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant used for rate-limit windows
    fn now(&self) -> Instant;

    /// Wall-clock time used for task and audit timestamps
    fn utc_now(&self) -> DateTime<Utc>;
}

/// Clock backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock
///
/// Clones share the same underlying time, so advancing one advances all.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualTime>>,
}

#[derive(Debug)]
struct ManualTime {
    instant: Instant,
    utc: DateTime<Utc>,
}

impl ManualClock {
    /// Start at the current system time
    pub fn new() -> Self {
        Self::starting_at(Instant::now(), Utc::now())
    }

    /// Start at explicit instants
    pub fn starting_at(instant: Instant, utc: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualTime { instant, utc })),
        }
    }

    /// Move both time sources forward
    pub fn advance(&self, by: Duration) {
        let mut time = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        time.instant += by;
        time.utc += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .instant
    }

    fn utc_now(&self) -> DateTime<Utc> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).utc
    }
}
