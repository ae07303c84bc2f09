//! Window Store
//!
//! Owns per-identity [`WindowState`]. The store is injected into the limiter,
//! and every limiter built on clones of the same store enforces one logical
//! limit. Contention is scoped to a single identity: the map lock is only held
//! to find or create an entry, and each entry has its own mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use super::window::{Decision, WindowState, WindowUsage};
use crate::identity::Identity;

/// Storage for per-identity window state
///
/// `transact` must run `apply` with exclusive access to the identity's state,
/// creating it with [`WindowState::new`] if it does not exist yet. A shared
/// external store implements this as an atomic read-modify-write.
pub trait WindowStore: Send + Sync + std::fmt::Debug {
    fn transact(
        &self,
        identity: &Identity,
        now: Instant,
        apply: &mut dyn FnMut(&mut WindowState) -> Decision,
    ) -> Decision;

    fn usage(&self, identity: &Identity) -> Option<WindowUsage>;

    /// Number of identities with state
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type Entry = Arc<Mutex<WindowState>>;

/// In-process window store
#[derive(Debug, Clone, Default)]
pub struct InMemoryWindowStore {
    entries: Arc<RwLock<HashMap<Identity, Entry>>>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, identity: &Identity, now: Instant) -> Entry {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(identity) {
                return Arc::clone(entry);
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            entries
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(Mutex::new(WindowState::new(now)))),
        )
    }
}

impl WindowStore for InMemoryWindowStore {
    fn transact(
        &self,
        identity: &Identity,
        now: Instant,
        apply: &mut dyn FnMut(&mut WindowState) -> Decision,
    ) -> Decision {
        let entry = self.entry(identity, now);
        let mut state = entry.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut state)
    }

    fn usage(&self, identity: &Identity) -> Option<WindowUsage> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(identity)
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).usage())
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::window::LimiterPolicy;

    fn id(raw: &str) -> Identity {
        Identity::parse(raw).unwrap()
    }

    #[test]
    fn test_store_creation() {
        let store = InMemoryWindowStore::new();
        assert!(store.is_empty());
        assert!(store.usage(&id("user-123")).is_none());
    }

    #[test]
    fn test_lazy_creation_on_transact() {
        let store = InMemoryWindowStore::new();
        let policy = LimiterPolicy::default();
        let now = Instant::now();

        let mut decide = |state: &mut WindowState| state.decide(&policy, now);

        let decision = store.transact(&id("user-123"), now, &mut decide);
        assert!(decision.is_admit());
        assert_eq!(store.len(), 1);
        assert_eq!(store.usage(&id("user-123")).unwrap().long_count, 1);
    }

    #[test]
    fn test_clones_share_state() {
        let store = InMemoryWindowStore::new();
        let other = store.clone();
        let policy = LimiterPolicy::default();
        let now = Instant::now();

        let mut decide = |state: &mut WindowState| state.decide(&policy, now);

        store.transact(&id("u1"), now, &mut decide);
        let second = other.transact(&id("u1"), now, &mut decide);

        assert!(!second.is_admit());
        assert_eq!(other.len(), 1);
    }
}
