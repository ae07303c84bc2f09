//! Task handlers

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::audit::{completion_record, failure_record, AuditError, AuditLog};
use crate::clock::Clock;
use crate::queue::Task;

/// Handler failures; never fatal to the worker unit
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("{0}")]
    Failed(String),
}

/// Work executed for each claimed task
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError>;

    /// Called once a delivery has failed terminally
    async fn on_failure(&self, _task: &Task, _reason: &str) {}
}

/// Records each completed task in the audit log
#[derive(Debug)]
pub struct AuditHandler<A: ?Sized> {
    audit: Arc<A>,
    clock: Arc<dyn Clock>,
}

impl<A: AuditLog + ?Sized> AuditHandler<A> {
    pub fn new(audit: Arc<A>, clock: Arc<dyn Clock>) -> Self {
        Self { audit, clock }
    }
}

#[async_trait]
impl<A: AuditLog + ?Sized> TaskHandler for AuditHandler<A> {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError> {
        let line = completion_record(&task.identity, self.clock.utc_now());
        self.audit.append(&line).await?;
        info!(task_id = %task.id, "{}", line);
        Ok(())
    }

    async fn on_failure(&self, task: &Task, reason: &str) {
        let line = failure_record(&task.identity, self.clock.utc_now(), reason);
        if let Err(e) = self.audit.append(&line).await {
            tracing::error!(task_id = %task.id, "Failed to record task failure: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{iso8601, MemoryAuditLog};
    use crate::clock::ManualClock;
    use crate::identity::Identity;

    #[tokio::test]
    async fn test_audit_handler_records_completion() {
        let audit = Arc::new(MemoryAuditLog::new());
        let clock = ManualClock::new();
        let handler = AuditHandler::new(Arc::clone(&audit), Arc::new(clock.clone()));
        let task = Task::new(Identity::parse("user-123").unwrap(), clock.utc_now());

        handler.handle(&task).await.unwrap();

        assert_eq!(
            audit.lines(),
            vec![format!(
                "user-123-task completed at-{}",
                iso8601(clock.utc_now())
            )]
        );
    }

    #[tokio::test]
    async fn test_audit_handler_records_failure() {
        let audit = Arc::new(MemoryAuditLog::new());
        let clock = ManualClock::new();
        let handler = AuditHandler::new(Arc::clone(&audit), Arc::new(clock.clone()));
        let task = Task::new(Identity::parse("u1").unwrap(), clock.utc_now());

        handler.on_failure(&task, "boom").await;

        let lines = audit.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("u1-task failed at-"));
        assert!(lines[0].ends_with(": boom"));
    }
}
