//! Frame encoding for log entries.
//!
//! ```text
//! [len: u32 LE][crc32(payload): u32 LE][payload: len bytes of JSON]
//! ```
//!
//! A frame cut short by a crash fails either the length check or the
//! checksum, so the reader can tell a torn tail from valid data.

use tracing::warn;

use super::{LogError, Result};
use crate::event::LogEntry;

pub(crate) const HEADER_LEN: usize = 8;

/// Upper bound on a single payload. Guards against reading a garbage length.
pub(crate) const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// How a segment's bytes ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tail {
    /// Every byte belonged to a complete, valid frame.
    Clean,
    /// The last frame is incomplete (crash mid-write or concurrent append).
    Truncated { offset: usize },
    /// A frame failed its checksum. Nothing after it can be trusted.
    Corrupt { offset: usize },
}

/// Decoded contents of one segment.
#[derive(Debug)]
pub(crate) struct DecodedSegment {
    pub entries: Vec<LogEntry>,
    pub tail: Tail,
}

pub(crate) fn encode(entry: &LogEntry) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(entry)?;
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(LogError::FrameTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub(crate) fn decode_segment(bytes: &[u8]) -> DecodedSegment {
    let mut entries = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let remaining = &bytes[offset..];
        if remaining.len() < HEADER_LEN {
            return DecodedSegment {
                entries,
                tail: Tail::Truncated { offset },
            };
        }

        let len = u32::from_le_bytes([remaining[0], remaining[1], remaining[2], remaining[3]]) as usize;
        let checksum = u32::from_le_bytes([remaining[4], remaining[5], remaining[6], remaining[7]]);

        if len > MAX_PAYLOAD_LEN {
            return DecodedSegment {
                entries,
                tail: Tail::Corrupt { offset },
            };
        }
        if remaining.len() < HEADER_LEN + len {
            return DecodedSegment {
                entries,
                tail: Tail::Truncated { offset },
            };
        }

        let payload = &remaining[HEADER_LEN..HEADER_LEN + len];
        if crc32fast::hash(payload) != checksum {
            return DecodedSegment {
                entries,
                tail: Tail::Corrupt { offset },
            };
        }

        // A checksummed frame we cannot parse is skipped, not fatal: its
        // boundaries are known, so the following frames are still readable.
        match serde_json::from_slice::<LogEntry>(payload) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(offset, error = %e, "Skipping unparseable log frame"),
        }

        offset += HEADER_LEN + len;
    }

    DecodedSegment {
        entries,
        tail: Tail::Clean,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ConfirmSource, ConfirmationMarker, EventRecord};

    fn record_entry(name: &str) -> LogEntry {
        LogEntry::Record(EventRecord::generic(name))
    }

    #[test]
    fn test_decode_concatenated_frames() {
        let mut bytes = encode(&record_entry("a")).unwrap();
        bytes.extend(encode(&record_entry("b")).unwrap());
        let marker = ConfirmationMarker::new(uuid::Uuid::new_v4(), &ConfirmSource::bus());
        bytes.extend(encode(&LogEntry::Confirm(marker)).unwrap());

        let decoded = decode_segment(&bytes);

        assert_eq!(decoded.entries.len(), 3);
        assert_eq!(decoded.tail, Tail::Clean);
    }

    #[test]
    fn test_truncated_tail_is_detected() {
        let first = encode(&record_entry("a")).unwrap();
        let second = encode(&record_entry("b")).unwrap();
        let mut bytes = first.clone();
        bytes.extend_from_slice(&second[..second.len() - 3]);

        let decoded = decode_segment(&bytes);

        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.tail, Tail::Truncated { offset: first.len() });
    }

    #[test]
    fn test_partial_header_is_truncation() {
        let mut bytes = encode(&record_entry("a")).unwrap();
        bytes.extend_from_slice(&[1, 2, 3]);

        let decoded = decode_segment(&bytes);

        assert_eq!(decoded.entries.len(), 1);
        assert!(matches!(decoded.tail, Tail::Truncated { .. }));
    }

    #[test]
    fn test_checksum_mismatch_is_corruption() {
        let mut bytes = encode(&record_entry("a")).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0xFF;

        let decoded = decode_segment(&bytes);

        assert!(decoded.entries.is_empty());
        assert_eq!(decoded.tail, Tail::Corrupt { offset: 0 });
    }

    #[test]
    fn test_unparseable_frame_is_skipped() {
        let garbage = b"{not json";
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(garbage.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&crc32fast::hash(garbage).to_le_bytes());
        bytes.extend_from_slice(garbage);
        bytes.extend(encode(&record_entry("after")).unwrap());

        let decoded = decode_segment(&bytes);

        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.tail, Tail::Clean);
    }
}
