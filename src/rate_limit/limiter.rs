//! Rate Limiter
//!
//! Per-identity admission decisions over the short and long windows.

use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::config::RateLimitConfig;
use super::store::{InMemoryWindowStore, WindowStore};
use super::window::{Decision, LimiterPolicy, WindowState, WindowUsage};
use crate::identity::Identity;

/// Rate limiter
///
/// Cheap to clone; clones share the injected store.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    policy: LimiterPolicy,
    store: Arc<dyn WindowStore>,
}

impl RateLimiter {
    /// Create a limiter over an existing store
    pub fn new(config: &RateLimitConfig, store: Arc<dyn WindowStore>) -> Self {
        Self {
            policy: LimiterPolicy::from(config),
            store,
        }
    }

    /// Create a limiter with its own in-process store
    pub fn in_memory(config: &RateLimitConfig) -> Self {
        Self::new(config, Arc::new(InMemoryWindowStore::new()))
    }

    /// Decide whether `identity` may submit at `now`
    ///
    /// On admit, both window counters are incremented under the identity's
    /// lock before returning; on reject they are left unchanged.
    pub fn decide(&self, identity: &Identity, now: Instant) -> Decision {
        let policy = self.policy;
        let decision = self
            .store
            .transact(identity, now, &mut |state: &mut WindowState| {
                state.decide(&policy, now)
            });

        debug!(identity = %identity, ?decision, "Rate limit decision");
        decision
    }

    /// Current counters for an identity, if it has submitted before
    pub fn usage(&self, identity: &Identity) -> Option<WindowUsage> {
        self.store.usage(identity)
    }

    /// Number of identities the store is tracking
    pub fn tracked_identities(&self) -> usize {
        self.store.len()
    }

    pub fn policy(&self) -> &LimiterPolicy {
        &self.policy
    }
}
