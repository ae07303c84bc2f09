//! Queue Journal
//!
//! Append-only JSON-lines file recording every enqueue and every terminal
//! outcome. Claims are not journaled: on replay, any task without a terminal
//! record is pending again, which is what makes an unacknowledged claim
//! redeliverable after a restart.
//!
//! Only `\n`-terminated lines count as written. A partial record left at the
//! tail by a crash or a failed write is truncated away before the next append,
//! so a new record never shares a line with a fragment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DeadLetterEntry, QueueError, Task};

/// Journal file name inside the queue endpoint directory
pub const JOURNAL_FILE: &str = "queue.journal";

/// One journal line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalRecord {
    Enqueued { task: Task },
    Acked { task_id: Uuid },
    Failed { task_id: Uuid, attempt: u32, reason: String },
}

/// State rebuilt from the journal on open
#[derive(Debug, Default)]
pub struct Replay {
    /// Live tasks in enqueue order
    pub pending: Vec<Task>,
    /// Failure records whose task is still known to the journal
    pub dead_letters: Vec<DeadLetterEntry>,
    /// Complete lines that could not be parsed
    pub skipped: usize,
    /// Bytes of an unterminated record dropped from the tail
    pub truncated: u64,
}

/// Open handle on the journal file
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
    /// Length of the journal up to the last complete record
    committed: u64,
    /// A write failed part-way; the tail must be cut back to `committed`
    dirty: bool,
}

impl Journal {
    /// Open (or create) the journal in `dir` and replay it
    pub async fn open(dir: impl AsRef<Path>) -> Result<(Self, Replay), QueueError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let path = dir.join(JOURNAL_FILE);

        let (replay, committed) = match fs::read(&path).await {
            Ok(content) => replay(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Replay::default(), 0),
            Err(e) => return Err(e.into()),
        };

        if replay.skipped > 0 {
            warn!(
                "Skipped {} unreadable journal lines in {:?}",
                replay.skipped, path
            );
        }

        let file = open_append(&path).await?;
        if replay.truncated > 0 {
            warn!(
                "Dropping {} bytes of a torn record at the end of {:?}",
                replay.truncated, path
            );
            file.set_len(committed).await?;
            file.sync_all().await?;
        }

        info!(
            "Opened queue journal {:?} with {} pending tasks",
            path,
            replay.pending.len()
        );

        Ok((
            Self {
                path,
                file,
                committed,
                dirty: false,
            },
            replay,
        ))
    }

    /// Durably append one record
    ///
    /// On failure the partially written bytes are cut off before the next
    /// append.
    pub async fn append(&mut self, record: &JournalRecord) -> Result<(), QueueError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        if self.dirty {
            self.repair().await?;
        }

        self.dirty = true;
        self.file.write_all(&line).await?;
        self.file.flush().await?;
        self.file.sync_data().await?;
        self.dirty = false;
        self.committed += line.len() as u64;
        Ok(())
    }

    /// Cut the file back to the last complete record
    async fn repair(&mut self) -> Result<(), QueueError> {
        warn!(
            "Truncating {:?} to {} bytes after a failed write",
            self.path, self.committed
        );
        // drop whatever the failed write left buffered in the handle
        self.file = open_append(&self.path).await?;
        self.file.set_len(self.committed).await?;
        self.file.sync_all().await?;
        self.dirty = false;
        Ok(())
    }

    /// Rewrite the journal so it only holds the given live tasks
    pub async fn compact<'a>(
        &mut self,
        live: impl Iterator<Item = &'a Task>,
    ) -> Result<(), QueueError> {
        let tmp = self.path.with_extension("journal.tmp");
        let mut buffer = Vec::new();
        let mut count = 0usize;
        for task in live {
            serde_json::to_writer(&mut buffer, &JournalRecord::Enqueued { task: task.clone() })?;
            buffer.push(b'\n');
            count += 1;
        }

        let mut file = File::create(&tmp).await?;
        file.write_all(&buffer).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &self.path).await?;
        self.file = open_append(&self.path).await?;
        self.committed = buffer.len() as u64;
        self.dirty = false;

        debug!("Compacted queue journal to {} live tasks", count);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn open_append(path: &Path) -> Result<File, QueueError> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

/// Rebuild queue state from raw journal bytes
///
/// Returns the replayed state and the length of the prefix made of complete
/// lines.
fn replay(content: &[u8]) -> (Replay, u64) {
    let mut order: Vec<Uuid> = Vec::new();
    let mut live: HashMap<Uuid, Task> = HashMap::new();
    let mut result = Replay::default();

    let committed = content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |last| last + 1);
    result.truncated = (content.len() - committed) as u64;

    for line in content[..committed].split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let record = match serde_json::from_slice::<JournalRecord>(line) {
            Ok(record) => record,
            Err(_) => {
                result.skipped += 1;
                continue;
            }
        };

        match record {
            JournalRecord::Enqueued { task } => {
                if live.insert(task.id, task.clone()).is_none() {
                    order.push(task.id);
                }
            }
            JournalRecord::Acked { task_id } => {
                live.remove(&task_id);
            }
            JournalRecord::Failed {
                task_id,
                attempt,
                reason,
            } => {
                if let Some(task) = live.remove(&task_id) {
                    result
                        .dead_letters
                        .push(DeadLetterEntry::new(&task, attempt, reason));
                }
            }
        }
    }

    result.pending = order
        .into_iter()
        .filter_map(|id| live.remove(&id))
        .collect();
    (result, committed as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use chrono::Utc;
    use tempfile::TempDir;

    fn task(identity: &str) -> Task {
        Task::new(Identity::parse(identity).unwrap(), Utc::now())
    }

    #[tokio::test]
    async fn test_open_empty_dir() {
        let dir = TempDir::new().unwrap();
        let (journal, replay) = Journal::open(dir.path()).await.unwrap();

        assert!(replay.pending.is_empty());
        assert!(journal.path().ends_with(JOURNAL_FILE));
    }

    #[tokio::test]
    async fn test_replay_keeps_unfinished_tasks_in_order() {
        let dir = TempDir::new().unwrap();
        let (a, b, c) = (task("a"), task("b"), task("c"));
        {
            let (mut journal, _) = Journal::open(dir.path()).await.unwrap();
            for t in [&a, &b, &c] {
                journal
                    .append(&JournalRecord::Enqueued { task: t.clone() })
                    .await
                    .unwrap();
            }
            journal
                .append(&JournalRecord::Acked { task_id: b.id })
                .await
                .unwrap();
        }

        let (_, replay) = Journal::open(dir.path()).await.unwrap();
        assert_eq!(replay.pending, vec![a, c]);
    }

    #[tokio::test]
    async fn test_replay_collects_failures() {
        let dir = TempDir::new().unwrap();
        let failed = task("user-1");
        {
            let (mut journal, _) = Journal::open(dir.path()).await.unwrap();
            journal
                .append(&JournalRecord::Enqueued {
                    task: failed.clone(),
                })
                .await
                .unwrap();
            journal
                .append(&JournalRecord::Failed {
                    task_id: failed.id,
                    attempt: 1,
                    reason: "boom".to_string(),
                })
                .await
                .unwrap();
        }

        let (_, replay) = Journal::open(dir.path()).await.unwrap();
        assert!(replay.pending.is_empty());
        assert_eq!(replay.dead_letters.len(), 1);
        assert_eq!(replay.dead_letters[0].last_error, "boom");
    }

    #[tokio::test]
    async fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let kept = task("kept");
        {
            let (mut journal, _) = Journal::open(dir.path()).await.unwrap();
            journal
                .append(&JournalRecord::Enqueued { task: kept.clone() })
                .await
                .unwrap();
        }
        let path = dir.path().join(JOURNAL_FILE);
        let intact = std::fs::read(&path).unwrap();
        let mut content = intact.clone();
        content.extend_from_slice(b"{\"op\":\"enqueued\",\"task\":{\"id\"");
        std::fs::write(&path, content).unwrap();

        let (_, replay) = Journal::open(dir.path()).await.unwrap();
        assert_eq!(replay.pending, vec![kept]);
        assert_eq!(replay.skipped, 0);
        assert!(replay.truncated > 0);
        assert_eq!(std::fs::read(&path).unwrap(), intact);
    }

    #[tokio::test]
    async fn test_append_after_torn_tail_is_replayed() {
        let dir = TempDir::new().unwrap();
        let (a, b) = (task("a"), task("b"));
        {
            let (mut journal, _) = Journal::open(dir.path()).await.unwrap();
            journal
                .append(&JournalRecord::Enqueued { task: a.clone() })
                .await
                .unwrap();
        }
        let path = dir.path().join(JOURNAL_FILE);
        let mut content = std::fs::read(&path).unwrap();
        content.extend_from_slice(b"{\"op\":\"enqueued\",\"task\":{\"id\"");
        std::fs::write(&path, content).unwrap();

        {
            let (mut journal, _) = Journal::open(dir.path()).await.unwrap();
            journal
                .append(&JournalRecord::Enqueued { task: b.clone() })
                .await
                .unwrap();
        }

        let (_, replay) = Journal::open(dir.path()).await.unwrap();
        assert_eq!(replay.pending, vec![a, b]);
        assert_eq!(replay.skipped, 0);
    }

    #[tokio::test]
    async fn test_split_utf8_tail_still_opens() {
        let dir = TempDir::new().unwrap();
        let kept = task("kept");
        {
            let (mut journal, _) = Journal::open(dir.path()).await.unwrap();
            journal
                .append(&JournalRecord::Enqueued { task: kept.clone() })
                .await
                .unwrap();
        }
        let path = dir.path().join(JOURNAL_FILE);
        let mut content = std::fs::read(&path).unwrap();
        // first two bytes of a three-byte character
        content.extend_from_slice(b"{\"op\":\"enqueued\",\"task\":{\"identity\":\"\xe2\x82");
        std::fs::write(&path, content).unwrap();

        let (_, replay) = Journal::open(dir.path()).await.unwrap();
        assert_eq!(replay.pending, vec![kept]);
    }

    #[tokio::test]
    async fn test_corrupt_complete_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        let (a, b) = (task("a"), task("b"));
        let (mut journal, _) = Journal::open(dir.path()).await.unwrap();
        journal
            .append(&JournalRecord::Enqueued { task: a.clone() })
            .await
            .unwrap();
        drop(journal);

        let path = dir.path().join(JOURNAL_FILE);
        let mut content = std::fs::read(&path).unwrap();
        content.extend_from_slice(b"not a record\n");
        std::fs::write(&path, content).unwrap();

        let (mut journal, _) = Journal::open(dir.path()).await.unwrap();
        journal
            .append(&JournalRecord::Enqueued { task: b.clone() })
            .await
            .unwrap();
        drop(journal);

        let (_, replay) = Journal::open(dir.path()).await.unwrap();
        assert_eq!(replay.pending, vec![a, b]);
        assert_eq!(replay.skipped, 1);
    }

    #[tokio::test]
    async fn test_compact_keeps_only_live_tasks() {
        let dir = TempDir::new().unwrap();
        let (a, b) = (task("a"), task("b"));
        let (mut journal, _) = Journal::open(dir.path()).await.unwrap();
        for t in [&a, &b] {
            journal
                .append(&JournalRecord::Enqueued { task: t.clone() })
                .await
                .unwrap();
        }
        journal
            .append(&JournalRecord::Acked { task_id: a.id })
            .await
            .unwrap();

        journal.compact([&b].into_iter()).await.unwrap();
        let c = task("c");
        journal
            .append(&JournalRecord::Enqueued { task: c.clone() })
            .await
            .unwrap();
        drop(journal);

        let content = std::fs::read_to_string(dir.path().join(JOURNAL_FILE)).unwrap();
        assert_eq!(content.lines().count(), 2);

        let (_, replay) = Journal::open(dir.path()).await.unwrap();
        assert_eq!(replay.pending, vec![b, c]);
    }
}
