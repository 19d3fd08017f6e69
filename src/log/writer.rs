//! Single-writer, append-only segment writer.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::event::{ConfirmSource, ConfirmationMarker, EventRecord, LogEntry};

use super::frame;
use super::query::{LogSnapshot, UnfinishedExecutions, UnsentAndUnfinished};
use super::reader::LogReader;
use super::segment::segment_path;
use super::{EventLogConfig, LogError, Result};

struct OpenSegment {
    id: u64,
    path: PathBuf,
    file: File,
    bytes: u64,
    opened_at: Instant,
}

#[derive(Default)]
struct WriterState {
    current: Option<OpenSegment>,
    /// Set by the first failed write. The writer never recovers from it.
    failure: Option<String>,
    closed: bool,
    /// Off until the owner has read the segments left by earlier processes.
    retention: bool,
}

/// Append-only writer over a directory of segments.
///
/// All writes go through one mutex, so concurrent appends are queued and
/// frames never interleave. Opening a writer always starts a fresh segment;
/// everything written by earlier processes is in closed segments.
///
/// Retention is off after `open` so nothing an earlier process wrote is
/// deleted before it has been read; call [`LogWriter::enable_retention`]
/// once startup reconciliation is done.
pub struct LogWriter {
    config: EventLogConfig,
    reader: LogReader,
    state: Mutex<WriterState>,
    /// First segment written by this writer.
    session_start: u64,
}

impl LogWriter {
    /// Open the log directory and start a new segment.
    pub async fn open(config: EventLogConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir).await?;

        let mut writer = Self {
            reader: LogReader::from_config(&config),
            config,
            state: Mutex::new(WriterState::default()),
            session_start: 0,
        };

        let mut state = writer.state.lock().await;
        let first_segment = writer.rotate_locked(&mut state).await?;
        drop(state);
        writer.session_start = first_segment;

        Ok(writer)
    }

    /// Start deleting segments beyond `keep_segments`, beginning now.
    pub async fn enable_retention(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.retention = true;
        match state.current.as_ref().map(|s| s.id) {
            Some(current_id) => self.prune(current_id).await,
            None => Ok(()),
        }
    }

    /// Id of the first segment this writer opened. Lower ids were written by
    /// earlier processes.
    pub fn session_start_segment(&self) -> u64 {
        self.session_start
    }

    pub fn config(&self) -> &EventLogConfig {
        &self.config
    }

    pub fn reader(&self) -> &LogReader {
        &self.reader
    }

    /// Path of the segment currently receiving writes.
    pub async fn current_segment(&self) -> Option<PathBuf> {
        self.state.lock().await.current.as_ref().map(|s| s.path.clone())
    }

    /// Whether a write has failed. A failed writer rejects all further writes.
    pub async fn is_failed(&self) -> bool {
        self.state.lock().await.failure.is_some()
    }

    /// Append one record. Returns after the frame is written (and synced when
    /// `fsync` is on).
    ///
    /// If the frame was written but the rotation that follows fails, the
    /// record is on disk and replayable, yet the call returns the rotation
    /// error and the writer is failed. Callers must not re-append the record
    /// under a new id.
    pub async fn append(&self, record: &EventRecord) -> Result<()> {
        self.write_entry(&LogEntry::Record(record.clone())).await
    }

    /// Append a confirmation marker for `message_id`.
    pub async fn mark_confirmed(&self, message_id: Uuid, source: &ConfirmSource) -> Result<()> {
        self.write_entry(&LogEntry::Confirm(ConfirmationMarker::new(message_id, source)))
            .await
    }

    /// Close the current segment and continue in a new one.
    pub async fn rotate(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::check_writable(&state)?;
        self.rotate_locked(&mut state).await.map(|_| ())
    }

    /// Flush and release the current segment. Later writes fail with
    /// [`LogError::Closed`]. Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        if let Some(mut segment) = state.current.take() {
            segment.file.flush().await?;
            segment.file.sync_all().await?;
            info!(segment = %segment.path.display(), "Event log closed");
        }
        Ok(())
    }

    fn check_writable(state: &WriterState) -> Result<()> {
        if let Some(reason) = &state.failure {
            return Err(LogError::WriterFailed(reason.clone()));
        }
        if state.closed {
            return Err(LogError::Closed);
        }
        Ok(())
    }

    async fn write_entry(&self, entry: &LogEntry) -> Result<()> {
        // Encoding happens outside the lock and a bad entry does not poison
        // the writer.
        let bytes = frame::encode(entry)?;

        let mut state = self.state.lock().await;
        Self::check_writable(&state)?;

        let Some(segment) = state.current.as_mut() else {
            return Err(LogError::Closed);
        };

        if let Err(e) = Self::write_frame(segment, &bytes, self.config.fsync).await {
            error!(
                segment = %segment.path.display(),
                error = %e,
                "Event log write failed, writer is no longer usable"
            );
            state.failure = Some(e.to_string());
            return Err(LogError::Io(e));
        }

        if self.should_rotate(segment) {
            if let Err(e) = self.rotate_locked(&mut state).await {
                error!(error = %e, "Segment rotation failed, writer is no longer usable");
                state.failure = Some(e.to_string());
                return Err(e);
            }
        }

        Ok(())
    }

    async fn write_frame(segment: &mut OpenSegment, bytes: &[u8], fsync: bool) -> std::io::Result<()> {
        segment.file.write_all(bytes).await?;
        segment.file.flush().await?;
        if fsync {
            segment.file.sync_data().await?;
        }
        segment.bytes += bytes.len() as u64;
        Ok(())
    }

    fn should_rotate(&self, segment: &OpenSegment) -> bool {
        if segment.bytes >= self.config.max_segment_bytes {
            return true;
        }
        self.config.max_segment_age_secs > 0
            && segment.opened_at.elapsed() >= Duration::from_secs(self.config.max_segment_age_secs)
    }

    /// Returns the id of the new segment.
    async fn rotate_locked(&self, state: &mut WriterState) -> Result<u64> {
        if let Some(mut previous) = state.current.take() {
            previous.file.flush().await?;
            previous.file.sync_all().await?;
            debug!(segment = %previous.path.display(), bytes = previous.bytes, "Segment closed");
        }

        let segments = self.reader.segments().await?;
        let next_id = segments.last().map(|s| s.id + 1).unwrap_or(1);
        let path = segment_path(&self.config.dir, self.reader.base(), next_id);

        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .await?;

        info!(segment = %path.display(), "Event log segment opened");

        state.current = Some(OpenSegment {
            id: next_id,
            path,
            file,
            bytes: 0,
            opened_at: Instant::now(),
        });

        if state.retention {
            self.prune(next_id).await?;
        }
        Ok(next_id)
    }

    /// Delete the oldest segments beyond `keep_segments`. The current segment
    /// is never deleted.
    async fn prune(&self, current_id: u64) -> Result<()> {
        let keep = self.config.keep_segments.max(1);
        let segments = self.reader.segments().await?;
        if segments.len() <= keep {
            return Ok(());
        }

        let excess = segments.len() - keep;
        for segment in segments.iter().take(excess) {
            if segment.id == current_id {
                continue;
            }
            match fs::remove_file(&segment.path).await {
                Ok(()) => debug!(segment = %segment.path.display(), "Pruned old segment"),
                Err(e) => warn!(
                    segment = %segment.path.display(),
                    error = %e,
                    "Failed to prune old segment"
                ),
            }
        }
        Ok(())
    }

    // Queries delegate to the reader; they never take the write lock.

    pub async fn snapshot(&self) -> Result<LogSnapshot> {
        self.reader.snapshot().await
    }

    pub async fn query_all(&self) -> Result<Vec<EventRecord>> {
        self.reader.query_all().await
    }

    pub async fn query_sent(&self) -> Result<Vec<EventRecord>> {
        self.reader.query_sent().await
    }

    pub async fn query_unsent(&self) -> Result<Vec<EventRecord>> {
        self.reader.query_unsent().await
    }

    pub async fn query_by_execution_id(
        &self,
        execution_id: &str,
        history_depth: usize,
    ) -> Result<Vec<EventRecord>> {
        self.reader
            .query_by_execution_id(execution_id, history_depth)
            .await
    }

    pub async fn query_unfinished_executions(&self) -> Result<UnfinishedExecutions> {
        self.reader.query_unfinished_executions().await
    }

    pub async fn query_unsent_and_unfinished(&self) -> Result<UnsentAndUnfinished> {
        self.reader.query_unsent_and_unfinished().await
    }

    /// Startup reconciliation input: every unsent record, and the unfinished
    /// executions that have records from an earlier process. Executions that
    /// only appear in this writer's segments are still running.
    pub async fn query_recoverable(&self) -> Result<UnsentAndUnfinished> {
        let full = self.reader.snapshot().await?;
        let earlier = self.reader.snapshot_before(self.session_start).await?;

        let mut result = full.unsent_and_unfinished();
        result
            .unfinished_executions
            .retain(|execution_id, _| earlier.has_execution(execution_id));
        Ok(result)
    }

    /// Id of the segment currently receiving writes.
    pub async fn current_segment_id(&self) -> Option<u64> {
        self.state.lock().await.current.as_ref().map(|s| s.id)
    }
}
