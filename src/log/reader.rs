//! Read-only access to the segment directory.

use std::path::{Path, PathBuf};

use crate::event::EventRecord;

use super::query::{LogSnapshot, UnfinishedExecutions, UnsentAndUnfinished};
use super::segment::{self, SegmentFile};
use super::{EventLogConfig, Result};

/// Replays segments without ever writing to them.
///
/// Safe to use alongside a live [`LogWriter`](super::LogWriter): a frame that
/// is half-written at read time shows up as a truncated tail and is ignored.
#[derive(Debug, Clone)]
pub struct LogReader {
    dir: PathBuf,
    base: String,
}

impl LogReader {
    pub fn new(dir: impl Into<PathBuf>, base: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base: base.into(),
        }
    }

    pub fn from_config(config: &EventLogConfig) -> Self {
        Self::new(config.dir.clone(), config.file_base_name.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn base(&self) -> &str {
        &self.base
    }

    pub(crate) async fn segments(&self) -> Result<Vec<SegmentFile>> {
        segment::list_segments(&self.dir, &self.base).await
    }

    /// Snapshot of every retained segment.
    pub async fn snapshot(&self) -> Result<LogSnapshot> {
        let segments = self.segments().await?;
        self.snapshot_of(&segments).await
    }

    /// Snapshot of the newest segment plus `history_depth` before it.
    pub async fn recent_snapshot(&self, history_depth: usize) -> Result<LogSnapshot> {
        let segments = self.segments().await?;
        let skip = segments.len().saturating_sub(history_depth.saturating_add(1));
        self.snapshot_of(&segments[skip..]).await
    }

    /// Snapshot of the segments with an id lower than `segment_id`.
    pub async fn snapshot_before(&self, segment_id: u64) -> Result<LogSnapshot> {
        let mut segments = self.segments().await?;
        segments.retain(|s| s.id < segment_id);
        self.snapshot_of(&segments).await
    }

    async fn snapshot_of(&self, segments: &[SegmentFile]) -> Result<LogSnapshot> {
        let mut entries = Vec::new();
        for segment in segments {
            entries.extend(segment::read_segment(segment).await?.entries);
        }
        Ok(LogSnapshot::from_entries(entries))
    }

    pub async fn query_all(&self) -> Result<Vec<EventRecord>> {
        Ok(self.snapshot().await?.all())
    }

    pub async fn query_sent(&self) -> Result<Vec<EventRecord>> {
        Ok(self.snapshot().await?.sent())
    }

    pub async fn query_unsent(&self) -> Result<Vec<EventRecord>> {
        Ok(self.snapshot().await?.unsent())
    }

    /// Records of one execution, limited to the newest `history_depth + 1`
    /// segments so the lookup cost stays bounded.
    pub async fn query_by_execution_id(
        &self,
        execution_id: &str,
        history_depth: usize,
    ) -> Result<Vec<EventRecord>> {
        Ok(self
            .recent_snapshot(history_depth)
            .await?
            .by_execution_id(execution_id))
    }

    pub async fn query_unfinished_executions(&self) -> Result<UnfinishedExecutions> {
        Ok(self.snapshot().await?.unfinished_executions())
    }

    /// Unsent records and unfinished executions from a single scan.
    pub async fn query_unsent_and_unfinished(&self) -> Result<UnsentAndUnfinished> {
        Ok(self.snapshot().await?.unsent_and_unfinished())
    }
}
