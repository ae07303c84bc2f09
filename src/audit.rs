//! Audit Log
//!
//! Append-only record of task outcomes. The completion line format is a
//! compatibility contract and must stay byte-for-byte stable:
//!
//! ```text
//! <identity>-task completed at-<ISO8601 timestamp>
//! ```
//!
//! Timestamps use millisecond precision and a `Z` suffix
//! (`2024-05-01T12:30:00.123Z`). Line breaks inside an identity or failure
//! reason are written as `\n` / `\r` escapes.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::{Mutex as StdMutex, PoisonError};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::identity::Identity;

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Audit log write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Format a timestamp the way audit records carry it
pub fn iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Line recorded when a task completes
pub fn completion_record(identity: &Identity, at: DateTime<Utc>) -> String {
    format!(
        "{}-task completed at-{}",
        single_line(identity.as_str()),
        iso8601(at)
    )
}

/// Line recorded when a task fails terminally
pub fn failure_record(identity: &Identity, at: DateTime<Utc>, reason: &str) -> String {
    format!(
        "{}-task failed at-{}: {}",
        single_line(identity.as_str()),
        iso8601(at),
        single_line(reason)
    )
}

/// Escape line breaks so one record stays on one line
fn single_line(value: &str) -> Cow<'_, str> {
    if !value.contains(['\n', '\r']) {
        return Cow::Borrowed(value);
    }
    Cow::Owned(value.replace('\r', "\\r").replace('\n', "\\n"))
}

/// Append-only sink for audit lines
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, line: &str) -> Result<(), AuditError>;
}

/// Audit log written to a file, one record per line
#[derive(Debug)]
pub struct FileAuditLog {
    path: PathBuf,
    file: Mutex<File>,
    echo_stdout: bool,
}

impl FileAuditLog {
    /// Open `path` for appending, creating parent directories as needed
    pub async fn open(path: impl AsRef<Path>, echo_stdout: bool) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            echo_stdout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditLog for FileAuditLog {
    async fn append(&self, line: &str) -> Result<(), AuditError> {
        let mut file = self.file.lock().await;
        file.write_all(format!("{line}\n").as_bytes()).await?;
        file.flush().await?;

        if self.echo_stdout {
            println!("{line}");
        }
        Ok(())
    }
}

/// Audit log kept in memory
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    lines: StdMutex<Vec<String>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, line: &str) -> Result<(), AuditError> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap() + chrono::Duration::milliseconds(123)
    }

    #[test]
    fn test_completion_record_format() {
        let identity = Identity::parse("user-123").unwrap();
        assert_eq!(
            completion_record(&identity, at()),
            "user-123-task completed at-2024-05-01T12:30:00.123Z"
        );
    }

    #[test]
    fn test_iso8601_always_has_millis() {
        let whole = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(iso8601(whole), "2024-01-02T03:04:05.000Z");
    }

    #[test]
    fn test_failure_record_format() {
        let identity = Identity::parse("u1").unwrap();
        assert_eq!(
            failure_record(&identity, at(), "disk full"),
            "u1-task failed at-2024-05-01T12:30:00.123Z: disk full"
        );
    }

    #[test]
    fn test_line_breaks_in_identity_stay_on_one_line() {
        let identity = Identity::parse("mallory\nadmin-task completed at-2024-01-01T00:00:00.000Z").unwrap();
        let line = completion_record(&identity, at());

        assert_eq!(line.lines().count(), 1);
        assert_eq!(
            line,
            "mallory\\nadmin-task completed at-2024-01-01T00:00:00.000Z-task completed at-2024-05-01T12:30:00.123Z"
        );
    }

    #[test]
    fn test_failure_reason_stays_on_one_line() {
        let identity = Identity::parse("u1").unwrap();
        let line = failure_record(&identity, at(), "line one\r\nline two");
        assert_eq!(line.lines().count(), 1);
        assert!(line.ends_with(": line one\\r\\nline two"));
    }

    #[tokio::test]
    async fn test_file_audit_log_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("task_logs.log");

        {
            let log = FileAuditLog::open(&path, false).await.unwrap();
            log.append("first").await.unwrap();
        }
        let log = FileAuditLog::open(&path, false).await.unwrap();
        log.append("second").await.unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_memory_audit_log() {
        let log = MemoryAuditLog::new();
        log.append("a").await.unwrap();
        log.append("b").await.unwrap();
        assert_eq!(log.lines(), vec!["a".to_string(), "b".to_string()]);
    }
}
