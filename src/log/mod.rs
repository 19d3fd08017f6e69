//! Durable, append-only event log.
//!
//! The log is a directory of numbered segment files. Every entry (an
//! [`EventRecord`](crate::event::EventRecord) or a
//! [`ConfirmationMarker`](crate::event::ConfirmationMarker)) is written as one
//! checksummed frame and synced before the append returns.
//!
//! ```text
//! {dir}/
//!   {base}.00000001.log   <- closed segment
//!   {base}.00000002.log   <- closed segment
//!   {base}.00000003.log   <- current segment (writer)
//! ```
//!
//! Nothing is ever rewritten in place. "Sent" status is derived by scanning
//! for confirmation markers, so a crash between append and confirm simply
//! leaves the record unsent and it is retried later.

use std::path::PathBuf;

use serde::Deserialize;

mod frame;
mod query;
mod reader;
mod segment;
mod writer;

pub use query::{LogSnapshot, UnfinishedExecutions, UnsentAndUnfinished};
pub use reader::LogReader;
pub use writer::LogWriter;

/// Result type for log operations.
pub type Result<T> = std::result::Result<T, LogError>;

/// Errors raised by the event log. Any I/O failure while writing is fatal to
/// the writer.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Log writer failed earlier and no longer accepts writes: {0}")]
    WriterFailed(String),

    #[error("Log writer is closed")]
    Closed,

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),
}

/// Event log configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    /// Directory holding the segment files.
    pub dir: PathBuf,
    /// Segment file name prefix.
    pub file_base_name: String,
    /// Rotate once the current segment reaches this many bytes.
    pub max_segment_bytes: u64,
    /// Rotate once the current segment is this old. 0 disables age rotation.
    pub max_segment_age_secs: u64,
    /// Number of segments retained, current one included.
    pub keep_segments: usize,
    /// Sync file data after every frame.
    pub fsync: bool,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/eventlog"),
            file_base_name: "events".to_string(),
            max_segment_bytes: 10 * 1024 * 1024,
            max_segment_age_secs: 0,
            keep_segments: 3,
            fsync: true,
        }
    }
}

impl EventLogConfig {
    /// Config rooted at `dir` with defaults for everything else.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn with_max_segment_bytes(mut self, bytes: u64) -> Self {
        self.max_segment_bytes = bytes;
        self
    }

    pub fn with_keep_segments(mut self, keep: usize) -> Self {
        self.keep_segments = keep;
        self
    }
}
