//! In-process task queue with optional journal persistence

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::journal::{Journal, JournalRecord};
use super::{
    DeadLetterEntry, DeadLetterQueue, Delivery, QueueError, QueueStats, Task, TaskQueue,
};
use crate::metrics;

/// Default number of terminal records between journal compactions
pub const DEFAULT_COMPACT_AFTER: usize = 1000;

/// FIFO queue shared by all worker units of this process
///
/// Built with [`LocalQueue::in_memory`] it is volatile; built with
/// [`LocalQueue::open`] every enqueue and terminal outcome is journaled
/// before it takes effect.
#[derive(Debug)]
pub struct LocalQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    closed: AtomicBool,
}

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<Task>,
    in_flight: HashMap<Uuid, Delivery>,
    attempts: HashMap<Uuid, u32>,
    dead_letters: DeadLetterQueue,
    journal: Option<Journal>,
    compact_after: usize,
    terminal_since_compaction: usize,
    completed: u64,
    failed: u64,
    redelivered: u64,
}

impl QueueState {
    fn new(journal: Option<Journal>, compact_after: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            attempts: HashMap::new(),
            dead_letters: DeadLetterQueue::new(),
            journal,
            compact_after: compact_after.max(1),
            terminal_since_compaction: 0,
            completed: 0,
            failed: 0,
            redelivered: 0,
        }
    }

    fn claim(&mut self, task: Task) -> Delivery {
        let attempt = self.attempts.entry(task.id).or_insert(0);
        *attempt += 1;
        let delivery = Delivery {
            task,
            attempt: *attempt,
            claimed_at: Instant::now(),
        };
        self.in_flight.insert(delivery.task.id, delivery.clone());
        delivery
    }

    /// Remove a task that is either claimed or was requeued after its lease expired
    fn take(&mut self, task_id: &Uuid) -> Option<Task> {
        if let Some(delivery) = self.in_flight.remove(task_id) {
            return Some(delivery.task);
        }
        let index = self.pending.iter().position(|t| &t.id == task_id)?;
        self.pending.remove(index)
    }

    fn holds(&self, task_id: &Uuid) -> bool {
        self.in_flight.contains_key(task_id) || self.pending.iter().any(|t| &t.id == task_id)
    }

    /// Another claim of the same task is running under a newer attempt
    fn superseded(&self, delivery: &Delivery) -> bool {
        self.in_flight
            .get(&delivery.task.id)
            .is_some_and(|current| current.attempt != delivery.attempt)
    }

    async fn journal(&mut self, record: JournalRecord) -> Result<(), QueueError> {
        match self.journal.as_mut() {
            Some(journal) => journal.append(&record).await,
            None => Ok(()),
        }
    }

    async fn record_terminal(&mut self) -> Result<(), QueueError> {
        self.terminal_since_compaction += 1;
        if self.terminal_since_compaction < self.compact_after {
            return Ok(());
        }
        let Some(journal) = self.journal.as_mut() else {
            return Ok(());
        };

        let mut claimed: Vec<&Delivery> = self.in_flight.values().collect();
        claimed.sort_by_key(|d| d.claimed_at);
        let live = claimed
            .into_iter()
            .map(|d| &d.task)
            .chain(self.pending.iter());
        journal.compact(live).await?;
        self.terminal_since_compaction = 0;
        Ok(())
    }

    fn publish_gauges(&self) {
        metrics::QUEUE_DEPTH.set(self.pending.len() as i64);
        metrics::TASKS_IN_FLIGHT.set(self.in_flight.len() as i64);
    }
}

impl LocalQueue {
    /// Volatile queue, lost on restart
    pub fn in_memory() -> Self {
        Self::from_state(QueueState::new(None, DEFAULT_COMPACT_AFTER))
    }

    /// Durable queue journaled under `endpoint`
    ///
    /// Tasks that were enqueued but never acked or failed, including ones that
    /// were claimed by a worker that crashed, are pending again.
    pub async fn open(endpoint: impl AsRef<Path>, compact_after: usize) -> Result<Self, QueueError> {
        let (journal, replay) = Journal::open(endpoint).await?;
        let mut state = QueueState::new(Some(journal), compact_after);
        state.pending.extend(replay.pending);
        for entry in replay.dead_letters {
            state.dead_letters.add(entry);
        }
        if !state.pending.is_empty() {
            info!("Recovered {} unfinished tasks from journal", state.pending.len());
        }
        state.publish_gauges();
        Ok(Self::from_state(state))
    }

    fn from_state(state: QueueState) -> Self {
        Self {
            state: Mutex::new(state),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Failure records for tasks that reached a failed terminal outcome
    pub async fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.state.lock().await.dead_letters.entries()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskQueue for LocalQueue {
    async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }

        let mut state = self.state.lock().await;
        state
            .journal(JournalRecord::Enqueued { task: task.clone() })
            .await?;
        debug!(task_id = %task.id, identity = %task.identity, "Task enqueued");
        state.pending.push_back(task);
        state.publish_gauges();
        drop(state);

        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> Result<Delivery, QueueError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Err(QueueError::Closed);
            }

            {
                let mut state = self.state.lock().await;
                if let Some(task) = state.pending.pop_front() {
                    let delivery = state.claim(task);
                    if !state.pending.is_empty() {
                        // hand the wakeup on to another waiting unit
                        self.notify.notify_one();
                    }
                    state.publish_gauges();
                    return Ok(delivery);
                }
            }

            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let task_id = delivery.task.id;
        let mut state = self.state.lock().await;
        if !state.holds(&task_id) {
            return Err(QueueError::UnknownDelivery(task_id));
        }

        state.journal(JournalRecord::Acked { task_id }).await?;
        state.take(&task_id);
        state.attempts.remove(&task_id);
        state.completed += 1;
        state.publish_gauges();
        state.record_terminal().await
    }

    async fn fail(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let task_id = delivery.task.id;
        let mut state = self.state.lock().await;
        if !state.holds(&task_id) {
            return Err(QueueError::UnknownDelivery(task_id));
        }
        // a failure from an expired lease must not end the redelivered run
        if state.superseded(delivery) {
            warn!(
                %task_id,
                attempt = delivery.attempt,
                "Ignoring failure from a superseded claim"
            );
            return Err(QueueError::UnknownDelivery(task_id));
        }

        state
            .journal(JournalRecord::Failed {
                task_id,
                attempt: delivery.attempt,
                reason: reason.to_string(),
            })
            .await?;
        if let Some(task) = state.take(&task_id) {
            state
                .dead_letters
                .add(DeadLetterEntry::new(&task, delivery.attempt, reason));
        }
        state.attempts.remove(&task_id);
        state.failed += 1;
        state.publish_gauges();
        state.record_terminal().await
    }

    async fn requeue_expired(&self, lease: Duration) -> Result<usize, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let mut expired: Vec<Delivery> = state
            .in_flight
            .values()
            .filter(|d| now.saturating_duration_since(d.claimed_at) >= lease)
            .cloned()
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        // newest first, so the oldest claim ends up at the very front
        expired.sort_by_key(|d| std::cmp::Reverse(d.claimed_at));
        let count = expired.len();
        for delivery in expired {
            warn!(
                task_id = %delivery.task.id,
                attempt = delivery.attempt,
                "Lease expired, task will be redelivered"
            );
            state.in_flight.remove(&delivery.task.id);
            state.pending.push_front(delivery.task);
        }
        state.redelivered += count as u64;
        metrics::TASKS_REDELIVERED_TOTAL.inc_by(count as u64);
        state.publish_gauges();
        drop(state);

        self.notify.notify_one();
        Ok(count)
    }

    async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats {
            pending: state.pending.len(),
            in_flight: state.in_flight.len(),
            completed: state.completed,
            failed: state.failed,
            redelivered: state.redelivered,
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}
