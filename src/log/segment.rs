//! Segment file naming and discovery.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use super::frame::{self, DecodedSegment, Tail};
use super::Result;

const SEGMENT_EXTENSION: &str = "log";

/// A segment file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SegmentFile {
    pub id: u64,
    pub path: PathBuf,
}

pub(crate) fn segment_path(dir: &Path, base: &str, id: u64) -> PathBuf {
    dir.join(format!("{}.{:08}.{}", base, id, SEGMENT_EXTENSION))
}

/// Parse `{base}.{id}.log` back into its id.
fn parse_segment_id(file_name: &str, base: &str) -> Option<u64> {
    let rest = file_name.strip_prefix(base)?.strip_prefix('.')?;
    let digits = rest.strip_suffix(SEGMENT_EXTENSION)?.strip_suffix('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// List segments in ascending id order. A missing directory has no segments.
pub(crate) async fn list_segments(dir: &Path, base: &str) -> Result<Vec<SegmentFile>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut segments = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(id) = parse_segment_id(name, base) {
            segments.push(SegmentFile {
                id,
                path: entry.path(),
            });
        }
    }

    segments.sort_by_key(|s| s.id);
    Ok(segments)
}

/// Read and decode one segment, logging any torn or corrupt tail.
pub(crate) async fn read_segment(segment: &SegmentFile) -> Result<DecodedSegment> {
    let bytes = match fs::read(&segment.path).await {
        Ok(bytes) => bytes,
        // Pruned between listing and reading.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(DecodedSegment {
                entries: Vec::new(),
                tail: Tail::Clean,
            })
        }
        Err(e) => return Err(e.into()),
    };

    let decoded = frame::decode_segment(&bytes);
    match decoded.tail {
        Tail::Clean => {}
        Tail::Truncated { offset } => debug!(
            segment = %segment.path.display(),
            offset,
            "Segment ends in an incomplete frame, ignoring tail"
        ),
        Tail::Corrupt { offset } => warn!(
            segment = %segment.path.display(),
            offset,
            "Segment frame failed checksum, ignoring remainder"
        ),
    }
    Ok(decoded)
}
