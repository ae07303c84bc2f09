//! Task Queue
//!
//! Decouples admission from execution. Admitted tasks are enqueued here and
//! claimed by worker units.
//!
//! Delivery contract:
//! - at-least-once: a claimed task that is never acknowledged becomes
//!   redeliverable, both after its lease expires and after a restart
//! - FIFO in enqueue order for a single producer
//! - no rate limiting or deduplication
//!
//! [`LocalQueue`] is the provided implementation, either purely in memory or
//! backed by an append-only journal on disk.

pub mod dead_letter;
pub mod journal;
pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::identity::Identity;

pub use dead_letter::{DeadLetterEntry, DeadLetterQueue};
pub use local::LocalQueue;

/// Work item created on admission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub identity: Identity,
    pub enqueued_at: DateTime<Utc>,
}

impl Task {
    pub fn new(identity: Identity, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            enqueued_at,
        }
    }
}

/// A claimed task, owned by one worker until acked or failed
#[derive(Debug, Clone)]
pub struct Delivery {
    pub task: Task,
    /// 1 on first delivery, incremented on every redelivery within this process
    pub attempt: u32,
    pub claimed_at: Instant,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

/// Point-in-time queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
    pub redelivered: u64,
}

/// Queue errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Journal could not be read or written
    #[error("Queue storage error: {0}")]
    Io(#[from] std::io::Error),

    /// Journal record could not be encoded or decoded
    #[error("Queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The queue no longer accepts or hands out work
    #[error("Queue is closed")]
    Closed,

    /// Ack or fail for a task the queue does not hold
    #[error("Unknown delivery for task {0}")]
    UnknownDelivery(Uuid),
}

/// Durable work queue shared by all worker units
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Persist a task; on `Ok` the task will eventually be delivered
    async fn enqueue(&self, task: Task) -> Result<(), QueueError>;

    /// Claim the oldest pending task, waiting until one is available
    ///
    /// Must be cancel-safe: dropping the future never loses a task.
    async fn dequeue(&self) -> Result<Delivery, QueueError>;

    /// Mark a delivery as completed
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Record an explicit terminal failure for a delivery
    async fn fail(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;

    /// Return claims older than `lease` to the front of the queue
    async fn requeue_expired(&self, lease: Duration) -> Result<usize, QueueError>;

    async fn stats(&self) -> QueueStats;

    /// Stop handing out work; blocked and future `dequeue` calls return [`QueueError::Closed`]
    async fn close(&self);
}
