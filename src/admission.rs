//! Admission
//!
//! Boundary between submitters and the pipeline: validate the identity,
//! consult the rate limiter, and hand admitted tasks to the queue.
//!
//! Counters consumed by an admission are kept even when the enqueue then
//! fails; the caller sees `QueueUnavailable` and must retry within its
//! normal allowance.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

use crate::clock::Clock;
use crate::identity::{Identity, IdentityError};
use crate::metrics::{self, outcome};
use crate::queue::{QueueError, Task, TaskQueue};
use crate::rate_limit::{BlockedBy, Decision, RateLimiter};

/// Result of one submission
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Admitted and durably enqueued
    Admitted {
        task_id: Uuid,
        short_remaining: u32,
        long_remaining: u32,
    },
    /// Over the rate limit; retry after the hint
    Rejected {
        retry_after: Duration,
        blocked_by: BlockedBy,
    },
    /// No usable identity; the limiter and queue were not touched
    InvalidRequest(IdentityError),
    /// Admitted by the limiter but the queue refused the task
    QueueUnavailable(QueueError),
}

impl SubmitOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, SubmitOutcome::Admitted { .. })
    }
}

/// Admission endpoint
#[derive(Clone)]
pub struct Admission {
    limiter: RateLimiter,
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
}

impl Admission {
    pub fn new(limiter: RateLimiter, queue: Arc<dyn TaskQueue>, clock: Arc<dyn Clock>) -> Self {
        Self {
            limiter,
            queue,
            clock,
        }
    }

    /// Submit a task for `identity`
    pub async fn submit(&self, identity: Option<&str>) -> SubmitOutcome {
        let identity = match Identity::from_optional(identity) {
            Ok(identity) => identity,
            Err(e) => {
                metrics::record_submission(outcome::INVALID);
                return SubmitOutcome::InvalidRequest(e);
            }
        };

        match self.limiter.decide(&identity, self.clock.now()) {
            Decision::Admit {
                short_remaining,
                long_remaining,
            } => {
                let task = Task::new(identity, self.clock.utc_now());
                let task_id = task.id;
                match self.queue.enqueue(task).await {
                    Ok(()) => {
                        metrics::record_submission(outcome::ADMITTED);
                        debug!(%task_id, "Task admitted");
                        SubmitOutcome::Admitted {
                            task_id,
                            short_remaining,
                            long_remaining,
                        }
                    }
                    Err(e) => {
                        metrics::record_submission(outcome::QUEUE_UNAVAILABLE);
                        error!(%task_id, "Failed to enqueue admitted task: {}", e);
                        SubmitOutcome::QueueUnavailable(e)
                    }
                }
            }
            Decision::Reject {
                retry_after,
                blocked_by,
            } => {
                metrics::record_submission(outcome::REJECTED);
                debug!(identity = %identity, ?blocked_by, "Submission rejected");
                SubmitOutcome::Rejected {
                    retry_after,
                    blocked_by,
                }
            }
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::queue::{Delivery, LocalQueue, QueueStats};
    use crate::rate_limit::RateLimitConfig;
    use async_trait::async_trait;

    /// Queue whose storage is unreachable
    struct UnavailableQueue;

    #[async_trait]
    impl TaskQueue for UnavailableQueue {
        async fn enqueue(&self, _task: Task) -> Result<(), QueueError> {
            Err(QueueError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "store unreachable",
            )))
        }
        async fn dequeue(&self) -> Result<Delivery, QueueError> {
            Err(QueueError::Closed)
        }
        async fn ack(&self, d: &Delivery) -> Result<(), QueueError> {
            Err(QueueError::UnknownDelivery(d.task.id))
        }
        async fn fail(&self, d: &Delivery, _reason: &str) -> Result<(), QueueError> {
            Err(QueueError::UnknownDelivery(d.task.id))
        }
        async fn requeue_expired(&self, _lease: Duration) -> Result<usize, QueueError> {
            Ok(0)
        }
        async fn stats(&self) -> QueueStats {
            QueueStats::default()
        }
        async fn close(&self) {}
    }

    fn admission(queue: Arc<dyn TaskQueue>) -> (Admission, ManualClock) {
        let clock = ManualClock::new();
        let admission = Admission::new(
            RateLimiter::in_memory(&RateLimitConfig::default()),
            queue,
            Arc::new(clock.clone()),
        );
        (admission, clock)
    }

    #[tokio::test]
    async fn test_admitted_task_is_enqueued() {
        let queue = Arc::new(LocalQueue::in_memory());
        let (admission, _) = admission(queue.clone());

        let SubmitOutcome::Admitted { task_id, .. } = admission.submit(Some("user-123")).await
        else {
            panic!("expected admission");
        };

        let delivery = queue.dequeue().await.unwrap();
        assert_eq!(delivery.task.id, task_id);
        assert_eq!(delivery.task.identity.as_str(), "user-123");
    }

    #[tokio::test]
    async fn test_rejected_within_short_window() {
        let queue = Arc::new(LocalQueue::in_memory());
        let (admission, clock) = admission(queue.clone());

        assert!(admission.submit(Some("u1")).await.is_admitted());
        clock.advance(Duration::from_millis(200));
        assert!(matches!(
            admission.submit(Some("u1")).await,
            SubmitOutcome::Rejected {
                blocked_by: BlockedBy::Short,
                ..
            }
        ));
        clock.advance(Duration::from_millis(900));
        assert!(admission.submit(Some("u1")).await.is_admitted());

        assert_eq!(queue.stats().await.pending, 2);
    }

    #[tokio::test]
    async fn test_invalid_identity_touches_nothing() {
        let queue = Arc::new(LocalQueue::in_memory());
        let (admission, _) = admission(queue.clone());

        assert!(matches!(
            admission.submit(None).await,
            SubmitOutcome::InvalidRequest(IdentityError::Missing)
        ));
        assert!(matches!(
            admission.submit(Some("")).await,
            SubmitOutcome::InvalidRequest(IdentityError::Empty)
        ));

        assert_eq!(admission.limiter().tracked_identities(), 0);
        assert_eq!(queue.stats().await.pending, 0);
    }

    #[tokio::test]
    async fn test_queue_failure_is_distinct_and_keeps_counters() {
        let (admission, clock) = admission(Arc::new(UnavailableQueue));

        assert!(matches!(
            admission.submit(Some("u1")).await,
            SubmitOutcome::QueueUnavailable(_)
        ));

        let identity = Identity::parse("u1").unwrap();
        let usage = admission.limiter().usage(&identity).unwrap();
        assert_eq!(usage.long_count, 1);

        clock.advance(Duration::from_millis(100));
        assert!(matches!(
            admission.submit(Some("u1")).await,
            SubmitOutcome::Rejected { .. }
        ));
    }
}
