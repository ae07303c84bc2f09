// Dead letter queue for tasks whose handler failed
//
// Keeps the explicit failure record for each task that reached a failed
// terminal outcome so operators can inspect it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use super::Task;
use crate::identity::Identity;

/// Default number of entries kept before the oldest are dropped
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 10_000;

/// Dead letter entry for a failed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Task that failed
    pub task_id: Uuid,
    /// Submitter of the task
    pub identity: Identity,
    /// Delivery attempt on which it failed
    pub attempt_count: u32,
    /// When the failure was recorded
    pub timestamp: DateTime<Utc>,
    /// Failure reason reported by the worker
    pub last_error: String,
}

impl DeadLetterEntry {
    pub fn new(task: &Task, attempt_count: u32, last_error: impl Into<String>) -> Self {
        Self {
            task_id: task.id,
            identity: task.identity.clone(),
            attempt_count,
            timestamp: Utc::now(),
            last_error: last_error.into(),
        }
    }
}

/// Bounded, oldest-first dead letter list
#[derive(Debug, Clone)]
pub struct DeadLetterQueue {
    entries: VecDeque<DeadLetterEntry>,
    capacity: usize,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_DEAD_LETTER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Add an entry, dropping the oldest one when full
    pub fn add(&mut self, entry: DeadLetterEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn get(&self, task_id: &Uuid) -> Option<&DeadLetterEntry> {
        self.entries.iter().find(|e| &e.task_id == task_id)
    }

    /// Entries for one submitter
    pub fn for_identity(&self, identity: &Identity) -> Vec<DeadLetterEntry> {
        self.entries
            .iter()
            .filter(|e| &e.identity == identity)
            .cloned()
            .collect()
    }

    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new()
    }
}
