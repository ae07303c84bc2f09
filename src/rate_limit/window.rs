//! Window Counters and the Admission Rule
//!
//! Each identity owns two independent fixed windows. A window resets the first
//! time it is evaluated after strictly more than its duration has elapsed since
//! its own last reset; the short and long windows never share a reset time.

use serde::Serialize;
use std::time::{Duration, Instant};

use super::config::RateLimitConfig;

/// Capacity and length of one window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub limit: u32,
    pub duration: Duration,
}

/// Policy for both windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterPolicy {
    pub short: WindowPolicy,
    pub long: WindowPolicy,
}

impl From<&RateLimitConfig> for LimiterPolicy {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            short: WindowPolicy {
                limit: config.short_window_limit,
                duration: config.short_window_duration(),
            },
            long: WindowPolicy {
                limit: config.long_window_limit,
                duration: config.long_window_duration(),
            },
        }
    }
}

impl Default for LimiterPolicy {
    fn default() -> Self {
        Self::from(&RateLimitConfig::default())
    }
}

/// Count of admissions since a window origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounter {
    pub count: u32,
    pub started_at: Instant,
}

impl WindowCounter {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            started_at: now,
        }
    }

    /// Reset if the window has run out; returns whether it did
    fn roll(&mut self, policy: &WindowPolicy, now: Instant) -> bool {
        if now.saturating_duration_since(self.started_at) > policy.duration {
            self.count = 0;
            self.started_at = now;
            return true;
        }
        false
    }

    fn has_room(&self, policy: &WindowPolicy) -> bool {
        self.count < policy.limit
    }

    fn remaining(&self, policy: &WindowPolicy) -> u32 {
        policy.limit.saturating_sub(self.count)
    }

    /// Time until the next evaluation would reset this window
    fn resets_in(&self, policy: &WindowPolicy, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.started_at);
        policy.duration.saturating_sub(elapsed) + Duration::from_millis(1)
    }
}

/// Which window caused a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedBy {
    Short,
    Long,
    Both,
}

/// Outcome of one admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Admitted; counters have already been incremented
    Admit {
        short_remaining: u32,
        long_remaining: u32,
    },
    /// Rejected; counters are unchanged
    Reject {
        retry_after: Duration,
        blocked_by: BlockedBy,
    },
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit { .. })
    }
}

/// Per-identity limiter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub short: WindowCounter,
    pub long: WindowCounter,
}

impl WindowState {
    /// Fresh state created lazily on an identity's first submission
    pub fn new(now: Instant) -> Self {
        Self {
            short: WindowCounter::new(now),
            long: WindowCounter::new(now),
        }
    }

    /// Apply due resets, then admit iff both windows have room
    pub fn decide(&mut self, policy: &LimiterPolicy, now: Instant) -> Decision {
        self.short.roll(&policy.short, now);
        self.long.roll(&policy.long, now);

        let short_ok = self.short.has_room(&policy.short);
        let long_ok = self.long.has_room(&policy.long);

        if short_ok && long_ok {
            self.short.count += 1;
            self.long.count += 1;
            return Decision::Admit {
                short_remaining: self.short.remaining(&policy.short),
                long_remaining: self.long.remaining(&policy.long),
            };
        }

        let (retry_after, blocked_by) = match (short_ok, long_ok) {
            (false, true) => (self.short.resets_in(&policy.short, now), BlockedBy::Short),
            (true, false) => (self.long.resets_in(&policy.long, now), BlockedBy::Long),
            _ => (
                self.short
                    .resets_in(&policy.short, now)
                    .max(self.long.resets_in(&policy.long, now)),
                BlockedBy::Both,
            ),
        };

        Decision::Reject {
            retry_after,
            blocked_by,
        }
    }

    pub fn usage(&self) -> WindowUsage {
        WindowUsage {
            short_count: self.short.count,
            long_count: self.long.count,
        }
    }
}

/// Read-only view of an identity's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowUsage {
    pub short_count: u32,
    pub long_count: u32,
}
