//! Outcome stores
//!
//! - `MemoryOutcomeStore` keeps rows in process memory
//! - `FileOutcomeStore` appends one JSON line per committed batch and keeps
//!   a bounded in-memory window of the newest rows for queries

use super::OutcomeStore;
use crate::error::StorageError;
use crate::models::{PingOutcome, ProbeOutcome, TracerouteOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default number of rows the file store keeps in memory (the log keeps all)
pub const DEFAULT_RETAINED_ROWS: usize = 50_000;

fn select_ping<'a>(
    rows: impl DoubleEndedIterator<Item = &'a ProbeOutcome>,
    target_id: Option<i64>,
    limit: usize,
) -> Vec<PingOutcome> {
    let mut selected: Vec<&PingOutcome> = rows
        .rev()
        .filter_map(|row| match row {
            ProbeOutcome::Ping(p) if target_id.map_or(true, |id| p.target_id == id) => Some(p),
            _ => None,
        })
        .collect();
    selected.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    selected.truncate(limit);
    selected.into_iter().cloned().collect()
}

fn select_traceroute<'a>(
    rows: impl DoubleEndedIterator<Item = &'a ProbeOutcome>,
    target_id: Option<i64>,
    limit: usize,
) -> Vec<TracerouteOutcome> {
    let mut selected: Vec<&TracerouteOutcome> = rows
        .rev()
        .filter_map(|row| match row {
            ProbeOutcome::Traceroute(t) if target_id.map_or(true, |id| t.target_id == id) => {
                Some(t)
            }
            _ => None,
        })
        .collect();
    selected.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    selected.truncate(limit);
    selected.into_iter().cloned().collect()
}

/// Outcome store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryOutcomeStore {
    rows: RwLock<Vec<ProbeOutcome>>,
}

impl MemoryOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored rows
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Copy of every stored row in insertion order
    pub async fn all(&self) -> Vec<ProbeOutcome> {
        self.rows.read().await.clone()
    }
}

#[async_trait]
impl OutcomeStore for MemoryOutcomeStore {
    async fn save_batch(&self, outcomes: Vec<ProbeOutcome>) -> Result<(), StorageError> {
        self.rows.write().await.extend(outcomes);
        Ok(())
    }

    async fn ping_outcomes(
        &self,
        target_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PingOutcome>, StorageError> {
        Ok(select_ping(self.rows.read().await.iter(), target_id, limit))
    }

    async fn traceroute_outcomes(
        &self,
        target_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<TracerouteOutcome>, StorageError> {
        Ok(select_traceroute(self.rows.read().await.iter(), target_id, limit))
    }
}

/// One line of the outcome log
#[derive(Debug, Serialize, Deserialize)]
struct BatchRecord {
    committed_at: DateTime<Utc>,
    outcomes: Vec<ProbeOutcome>,
}

/// Handle the outcome log is appended through
#[async_trait]
trait LogFile: AsyncWrite + Unpin + Send {
    async fn sync(&mut self) -> io::Result<()>;
}

#[async_trait]
impl LogFile for tokio::fs::File {
    async fn sync(&mut self) -> io::Result<()> {
        self.sync_all().await
    }
}

/// Write errors from a tokio `File` only surface on flush
async fn write_synced<F: LogFile>(file: &mut F, line: &[u8]) -> io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync().await
}

async fn truncate_to(path: &Path, len: u64) -> io::Result<()> {
    let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.set_len(len).await?;
    file.sync_all().await
}

/// Drop the oldest rows beyond `max_rows`; returns how many were dropped
fn evict_oldest(rows: &mut VecDeque<ProbeOutcome>, max_rows: usize) -> usize {
    let excess = rows.len().saturating_sub(max_rows);
    rows.drain(..excess);
    excess
}

#[derive(Debug, Default)]
struct LogState {
    /// Newest rows, oldest first
    rows: VecDeque<ProbeOutcome>,
    /// Log length up to the end of the last committed batch
    committed_len: u64,
}

/// Append-only JSON lines outcome log
///
/// Each batch is written as a single line and synced before it becomes
/// visible to queries. A failed append is cut back off the log, and so is a
/// trailing partial line left by a crash when the log is opened. Only the
/// newest `max_rows` rows stay in memory; the file keeps every batch.
#[derive(Debug)]
pub struct FileOutcomeStore {
    path: PathBuf,
    max_rows: usize,
    log: RwLock<LogState>,
}

impl FileOutcomeStore {
    /// Open (or create) the log at `path` and load existing batches
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::open_with_retention(path, DEFAULT_RETAINED_ROWS)
    }

    /// Open the log keeping at most `max_rows` of the newest rows in memory
    pub fn open_with_retention(
        path: impl Into<PathBuf>,
        max_rows: usize,
    ) -> Result<Self, StorageError> {
        let path = path.into();
        let max_rows = max_rows.max(1);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let log = if path.exists() {
            Self::load(&path, max_rows)?
        } else {
            LogState::default()
        };

        info!(
            path = %path.display(),
            rows = log.rows.len(),
            max_rows,
            "Opened outcome log"
        );

        Ok(Self {
            path,
            max_rows,
            log: RwLock::new(log),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Number of rows held in memory
    pub async fn len(&self) -> usize {
        self.log.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.log.read().await.rows.is_empty()
    }

    fn load(path: &Path, max_rows: usize) -> Result<LogState, StorageError> {
        let content = std::fs::read(path)?;

        let complete = match content.iter().rposition(|b| *b == b'\n') {
            Some(pos) => pos + 1,
            None => 0,
        };
        if complete < content.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = content.len() - complete,
                "Truncating incomplete trailing batch"
            );
            let file = std::fs::OpenOptions::new().write(true).open(path)?;
            file.set_len(complete as u64)?;
            file.sync_all()?;
        }

        let mut rows = VecDeque::new();
        let mut evicted = 0;
        for (index, line) in content[..complete].split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<BatchRecord>(line) {
                Ok(record) => {
                    rows.extend(record.outcomes);
                    evicted += evict_oldest(&mut rows, max_rows);
                }
                Err(e) => {
                    warn!(path = %path.display(), line = index + 1, error = %e, "Skipping unreadable batch");
                }
            }
        }
        if evicted > 0 {
            debug!(path = %path.display(), evicted, "Older rows left on disk only");
        }

        Ok(LogState {
            rows,
            committed_len: complete as u64,
        })
    }

    /// Open the log for appending, cutting off anything past the last commit
    async fn open_for_append(&self, log: &mut LogState) -> Result<tokio::fs::File, StorageError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let len = file.metadata().await?.len();
        if len > log.committed_len {
            warn!(
                path = %self.path.display(),
                stray_bytes = len - log.committed_len,
                "Cutting uncommitted bytes off outcome log"
            );
            file.set_len(log.committed_len).await?;
        } else if len < log.committed_len {
            warn!(
                path = %self.path.display(),
                expected = log.committed_len,
                found = len,
                "Outcome log shrank outside the agent"
            );
            log.committed_len = len;
        }

        Ok(file)
    }

    /// Write one batch line, cutting the log back to the last commit on failure
    async fn append_line<F: LogFile>(
        &self,
        log: &mut LogState,
        file: &mut F,
        line: &[u8],
    ) -> Result<(), StorageError> {
        if let Err(e) = write_synced(file, line).await {
            if let Err(truncate_err) = truncate_to(&self.path, log.committed_len).await {
                // open_for_append retries the cut before the next batch
                warn!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "Failed to roll back partial batch"
                );
            }
            return Err(e.into());
        }

        log.committed_len += line.len() as u64;
        Ok(())
    }
}

#[async_trait]
impl OutcomeStore for FileOutcomeStore {
    async fn save_batch(&self, outcomes: Vec<ProbeOutcome>) -> Result<(), StorageError> {
        let record = BatchRecord {
            committed_at: Utc::now(),
            outcomes,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        // Holding the write lock serialises appends
        let mut log = self.log.write().await;

        let mut file = self.open_for_append(&mut log).await?;
        self.append_line(&mut log, &mut file, &line).await?;

        debug!(
            path = %self.path.display(),
            rows = record.outcomes.len(),
            bytes = line.len(),
            "Batch appended to outcome log"
        );
        log.rows.extend(record.outcomes);
        let evicted = evict_oldest(&mut log.rows, self.max_rows);
        if evicted > 0 {
            debug!(evicted, max_rows = self.max_rows, "Evicted oldest rows from memory");
        }
        Ok(())
    }

    async fn ping_outcomes(
        &self,
        target_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PingOutcome>, StorageError> {
        Ok(select_ping(self.log.read().await.rows.iter(), target_id, limit))
    }

    async fn traceroute_outcomes(
        &self,
        target_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<TracerouteOutcome>, StorageError> {
        Ok(select_traceroute(self.log.read().await.rows.iter(), target_id, limit))
    }
}
