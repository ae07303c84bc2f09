//! Worker Pool
//!
//! A fixed number of worker units, each running its own loop against the
//! shared [`TaskQueue`]:
//!
//! ```text
//! Idle -> Claiming -> Executing -> Acking -> Idle
//!            |
//!            +-- shutdown --> Stopped
//! ```
//!
//! Units are independent: tasks for the same identity may finish out of
//! submission order when claimed by different units. A failing or panicking
//! handler never stops a unit.

pub mod handler;

pub use handler::{AuditHandler, HandlerError, TaskHandler};

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkersConfig;
use crate::metrics;
use crate::queue::{Delivery, QueueError, TaskQueue};

/// Pause after a dequeue error before trying again
const DEQUEUE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Lifecycle state of one worker unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnitState {
    Idle = 0,
    Claiming = 1,
    Executing = 2,
    Acking = 3,
    Stopped = 4,
}

impl From<u8> for UnitState {
    fn from(value: u8) -> Self {
        match value {
            0 => UnitState::Idle,
            1 => UnitState::Claiming,
            2 => UnitState::Executing,
            3 => UnitState::Acking,
            _ => UnitState::Stopped,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(UnitState::Idle as u8))
    }

    fn set(&self, state: UnitState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    fn get(&self) -> UnitState {
        UnitState::from(self.0.load(Ordering::SeqCst))
    }
}

/// Running pool of worker units plus the lease sweeper
pub struct WorkerPool {
    units: Vec<JoinHandle<()>>,
    sweeper: JoinHandle<()>,
    states: Vec<Arc<StateCell>>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawn `config.worker_count` units on the current tokio runtime
    pub fn spawn(
        config: &WorkersConfig,
        queue: Arc<dyn TaskQueue>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let count = config.worker_count.max(1);
        info!("Starting worker pool with {} units", count);

        let mut units = Vec::with_capacity(count);
        let mut states = Vec::with_capacity(count);
        for id in 0..count {
            let state = Arc::new(StateCell::new());
            states.push(Arc::clone(&state));
            units.push(tokio::spawn(run_unit(
                id,
                Arc::clone(&queue),
                Arc::clone(&handler),
                state,
                shutdown_rx.clone(),
            )));
        }

        let sweeper = tokio::spawn(run_sweeper(
            queue,
            config.lease_timeout(),
            config.lease_sweep_interval(),
            shutdown_rx,
        ));

        Self {
            units,
            sweeper,
            states,
            shutdown,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.units.len()
    }

    /// Current state of every unit, by unit id
    pub fn states(&self) -> Vec<UnitState> {
        self.states.iter().map(|s| s.get()).collect()
    }

    /// Signal every unit to stop and wait for them
    ///
    /// A unit finishes the task it is executing before it stops; a unit
    /// blocked on an empty queue stops immediately.
    pub async fn shutdown(self) {
        info!("Stopping worker pool");
        let _ = self.shutdown.send(true);

        for (id, unit) in self.units.into_iter().enumerate() {
            if let Err(e) = unit.await {
                error!(worker = id, "Worker unit ended abnormally: {}", e);
            }
        }
        if let Err(e) = self.sweeper.await {
            error!("Lease sweeper ended abnormally: {}", e);
        }
        info!("Worker pool stopped");
    }
}

async fn run_unit(
    id: usize,
    queue: Arc<dyn TaskQueue>,
    handler: Arc<dyn TaskHandler>,
    state: Arc<StateCell>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(worker = id, "Worker unit started");
    metrics::ACTIVE_WORKERS.inc();

    loop {
        if *shutdown.borrow() {
            break;
        }

        state.set(UnitState::Claiming);
        let claimed = tokio::select! {
            _ = shutdown.changed() => break,
            claimed = queue.dequeue() => claimed,
        };

        let delivery = match claimed {
            Ok(delivery) => delivery,
            Err(QueueError::Closed) => break,
            Err(e) => {
                error!(worker = id, "Failed to claim task: {}", e);
                state.set(UnitState::Idle);
                tokio::time::sleep(DEQUEUE_RETRY_DELAY).await;
                continue;
            }
        };

        state.set(UnitState::Executing);
        let outcome = execute(&handler, &delivery).await;

        state.set(UnitState::Acking);
        finish(id, queue.as_ref(), handler.as_ref(), &delivery, outcome).await;

        state.set(UnitState::Idle);
    }

    state.set(UnitState::Stopped);
    metrics::ACTIVE_WORKERS.dec();
    info!(worker = id, "Worker unit stopped");
}

/// Run the handler in its own task so a panic is contained
async fn execute(handler: &Arc<dyn TaskHandler>, delivery: &Delivery) -> Result<(), String> {
    let started = Instant::now();
    let handler = Arc::clone(handler);
    let task = delivery.task.clone();

    let result = tokio::spawn(async move { handler.handle(&task).await }).await;
    metrics::TASK_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) if e.is_panic() => Err("task handler panicked".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// What the queue accepted for a finished delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Completed,
    Failed,
    /// The queue refused the outcome; the task stays redeliverable
    Unsettled,
}

async fn finish(
    id: usize,
    queue: &dyn TaskQueue,
    handler: &dyn TaskHandler,
    delivery: &Delivery,
    outcome: Result<(), String>,
) -> Settled {
    let task_id = delivery.task.id;
    let settled = match outcome {
        Ok(()) => match queue.ack(delivery).await {
            Ok(()) => {
                debug!(worker = id, %task_id, attempt = delivery.attempt, "Task acknowledged");
                Settled::Completed
            }
            Err(e) => {
                // the task stays claimed and is redelivered once its lease expires
                warn!(worker = id, %task_id, "Failed to acknowledge task: {}", e);
                Settled::Unsettled
            }
        },
        Err(reason) => {
            warn!(worker = id, %task_id, "Task handler failed: {}", reason);
            handler.on_failure(&delivery.task, &reason).await;
            match queue.fail(delivery, &reason).await {
                Ok(()) => Settled::Failed,
                Err(e) => {
                    warn!(worker = id, %task_id, "Failed to record task failure: {}", e);
                    Settled::Unsettled
                }
            }
        }
    };

    match settled {
        Settled::Completed => metrics::TASKS_COMPLETED_TOTAL.inc(),
        Settled::Failed => metrics::TASKS_FAILED_TOTAL.inc(),
        Settled::Unsettled => {}
    }
    settled
}

async fn run_sweeper(
    queue: Arc<dyn TaskQueue>,
    lease: Duration,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        match queue.requeue_expired(lease).await {
            Ok(0) => {}
            Ok(n) => info!("Requeued {} tasks with expired leases", n),
            Err(e) => error!("Lease sweep failed: {}", e),
        }
    }
}
