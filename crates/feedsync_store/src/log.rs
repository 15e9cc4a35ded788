//! Log record framing and replay.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The CRC covers everything before it. Payloads are CBOR.
//!
//! ## Recovery Policy
//!
//! Tolerated (treated as a clean end of log):
//! - fewer than a full header's worth of trailing bytes
//! - a header whose declared length runs past the end of the log
//!
//! Both are the signature of a crash in the middle of an append. The torn
//! tail is reported so the store can truncate it before writing again.
//!
//! Fatal:
//! - wrong magic on a complete header
//! - unknown record type
//! - CRC mismatch on a complete record
//! - undecodable payload

use crate::backend::StorageBackend;
use crate::error::{StoreError, StoreResult};
use crate::migration::{self, SchemaVersion};
use crate::types::{Mutation, StoreState};

/// Magic bytes opening every log record.
pub(crate) const RECORD_MAGIC: [u8; 4] = *b"FSLG";

/// magic (4) + type (1) + length (4)
const RECORD_HEADER_SIZE: usize = 9;

const CRC_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordType {
    /// One transaction worth of mutations.
    Commit = 1,
    /// A full image of the store, written by compaction.
    Image = 2,
}

impl RecordType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Commit),
            2 => Some(Self::Image),
            _ => None,
        }
    }
}

/// A decoded log record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LogRecord {
    Commit(Vec<Mutation>),
    Image(StoreState),
}

impl LogRecord {
    #[cfg(test)]
    fn encode(&self) -> StoreResult<Vec<u8>> {
        match self {
            Self::Commit(mutations) => encode_commit(mutations),
            Self::Image(state) => encode_image(state),
        }
    }

    fn decode(record_type: RecordType, payload: &[u8], offset: u64) -> StoreResult<Self> {
        let decoded = match record_type {
            RecordType::Commit => ciborium::from_reader(payload).map(Self::Commit),
            RecordType::Image => ciborium::from_reader(payload).map(Self::Image),
        };
        decoded.map_err(|e| StoreError::corrupted(offset, format!("undecodable payload: {e}")))
    }
}

/// Encodes a commit record without taking ownership of the mutations.
pub(crate) fn encode_commit(mutations: &[Mutation]) -> StoreResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(mutations, &mut payload).map_err(StoreError::encode)?;
    frame(RecordType::Commit, &payload)
}

/// Encodes an image record holding the full store content.
pub(crate) fn encode_image(state: &StoreState) -> StoreResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(state, &mut payload).map_err(StoreError::encode)?;
    frame(RecordType::Image, &payload)
}

fn frame(record_type: RecordType, payload: &[u8]) -> StoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| StoreError::encode("log record payload exceeds 4 GiB"))?;

    let mut data = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&RECORD_MAGIC);
    data.push(record_type as u8);
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(payload);
    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Result of replaying a log.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    pub state: StoreState,
    pub commits: usize,
    pub images: usize,
    /// Offset just past the last complete record.
    pub valid_end: u64,
    /// Bytes after `valid_end` belonging to a torn record.
    pub torn_bytes: u64,
}

/// Replays records in `bytes` starting at `start`.
pub(crate) fn replay(bytes: &[u8], start: usize) -> StoreResult<Replay> {
    let mut out = Replay {
        valid_end: start as u64,
        ..Replay::default()
    };
    let mut pos = start;

    while pos < bytes.len() {
        let offset = pos as u64;
        let remaining = bytes.len() - pos;

        if remaining < RECORD_HEADER_SIZE {
            out.torn_bytes = remaining as u64;
            break;
        }

        let header = &bytes[pos..pos + RECORD_HEADER_SIZE];
        if header[0..4] != RECORD_MAGIC {
            return Err(StoreError::corrupted(offset, "invalid record magic"));
        }

        let type_byte = header[4];
        let len = u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize;
        let total = RECORD_HEADER_SIZE + len + CRC_SIZE;
        if remaining < total {
            out.torn_bytes = remaining as u64;
            break;
        }

        let body_end = pos + RECORD_HEADER_SIZE + len;
        let stored = u32::from_le_bytes([
            bytes[body_end],
            bytes[body_end + 1],
            bytes[body_end + 2],
            bytes[body_end + 3],
        ]);
        let computed = compute_crc32(&bytes[pos..body_end]);
        if stored != computed {
            return Err(StoreError::ChecksumMismatch {
                offset,
                expected: stored,
                actual: computed,
            });
        }

        let record_type = RecordType::from_byte(type_byte).ok_or_else(|| {
            StoreError::corrupted(offset, format!("unknown record type {type_byte}"))
        })?;

        match LogRecord::decode(record_type, &bytes[pos + RECORD_HEADER_SIZE..body_end], offset)?
        {
            LogRecord::Commit(mutations) => {
                for mutation in &mutations {
                    out.state.apply(mutation);
                }
                out.commits += 1;
            }
            LogRecord::Image(state) => {
                out.state = state;
                out.images += 1;
            }
        }

        pos += total;
        out.valid_end = pos as u64;
    }

    Ok(out)
}

/// Summary of a log produced by [`verify_log`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSummary {
    /// Schema version from the header.
    pub schema_version: SchemaVersion,
    /// Number of commit records.
    pub commits: usize,
    /// Number of compaction image records.
    pub images: usize,
    /// Bytes covered by complete records (including the header).
    pub valid_bytes: u64,
    /// Trailing bytes of a torn record.
    pub torn_bytes: u64,
    /// Number of distinct tables holding rows.
    pub tables: usize,
    /// Total rows across all tables.
    pub rows: usize,
    /// Number of metadata entries.
    pub meta_entries: usize,
}

/// Replays a log without modifying it and summarizes what it holds.
///
/// # Errors
///
/// Returns an error on corruption, checksum mismatch or unsupported schema.
pub fn verify_log(backend: &dyn StorageBackend) -> StoreResult<LogSummary> {
    let bytes = backend.read_all()?;
    let schema_version = match migration::read_header(&bytes)? {
        Some(version) => version,
        None => {
            return Ok(LogSummary {
                schema_version: SchemaVersion::EMPTY,
                commits: 0,
                images: 0,
                valid_bytes: 0,
                torn_bytes: bytes.len() as u64,
                tables: 0,
                rows: 0,
                meta_entries: 0,
            })
        }
    };

    let replayed = replay(&bytes, migration::HEADER_SIZE)?;
    Ok(LogSummary {
        schema_version,
        commits: replayed.commits,
        images: replayed.images,
        valid_bytes: replayed.valid_end,
        torn_bytes: replayed.torn_bytes,
        tables: replayed.state.tables.len(),
        rows: replayed.state.tables.values().map(|rows| rows.len()).sum(),
        meta_entries: replayed.state.meta.len(),
    })
}

/// Computes a CRC-32 (IEEE polynomial) checksum.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut n = 0;
        while n < 256 {
            let mut c = n as u32;
            let mut k = 0;
            while k < 8 {
                c = if c & 1 != 0 {
                    0xEDB8_8320 ^ (c >> 1)
                } else {
                    c >> 1
                };
                k += 1;
            }
            table[n] = c;
            n += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize] ^ (crc >> 8)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(table: &str, id: &str) -> LogRecord {
        LogRecord::Commit(vec![Mutation::Upsert {
            table: table.into(),
            id: id.into(),
            data: format!("{{\"id\":\"{id}\"}}"),
        }])
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn replay_applies_records_in_order() {
        let mut bytes = Vec::new();
        bytes.extend(commit("t", "1").encode().unwrap());
        bytes.extend(commit("t", "2").encode().unwrap());
        bytes.extend(
            LogRecord::Commit(vec![Mutation::Delete {
                table: "t".into(),
                id: "1".into(),
            }])
            .encode()
            .unwrap(),
        );

        let replayed = replay(&bytes, 0).unwrap();
        assert_eq!(replayed.commits, 3);
        assert_eq!(replayed.valid_end, bytes.len() as u64);
        assert_eq!(replayed.torn_bytes, 0);
        assert!(replayed.state.contains("t", "2"));
        assert!(!replayed.state.contains("t", "1"));
    }

    #[test]
    fn image_replaces_state() {
        let mut image = StoreState::default();
        image
            .meta
            .insert("sync_cursor:acme".into(), "c9".into());

        let mut bytes = Vec::new();
        bytes.extend(commit("t", "1").encode().unwrap());
        bytes.extend(LogRecord::Image(image.clone()).encode().unwrap());

        let replayed = replay(&bytes, 0).unwrap();
        assert_eq!(replayed.images, 1);
        assert_eq!(replayed.state, image);
    }

    #[test]
    fn torn_tail_is_tolerated() {
        let first = commit("t", "1").encode().unwrap();
        let second = commit("t", "2").encode().unwrap();

        for cut in [1, RECORD_HEADER_SIZE - 1, RECORD_HEADER_SIZE + 2, second.len() - 1] {
            let mut bytes = first.clone();
            bytes.extend_from_slice(&second[..cut]);

            let replayed = replay(&bytes, 0).unwrap();
            assert_eq!(replayed.commits, 1, "cut at {cut}");
            assert_eq!(replayed.valid_end, first.len() as u64);
            assert_eq!(replayed.torn_bytes, cut as u64);
            assert!(!replayed.state.contains("t", "2"));
        }
    }

    #[test]
    fn flipped_payload_bit_is_fatal() {
        let mut bytes = commit("t", "1").encode().unwrap();
        bytes[RECORD_HEADER_SIZE + 3] ^= 0x40;

        assert!(matches!(
            replay(&bytes, 0),
            Err(StoreError::ChecksumMismatch { offset: 0, .. })
        ));
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut bytes = commit("t", "1").encode().unwrap();
        bytes.extend(commit("t", "2").encode().unwrap());
        let second = commit("t", "1").encode().unwrap().len();
        bytes[second] = b'X';

        let err = replay(&bytes, 0).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn replay_from_offset() {
        let prefix = b"FSDB\x01\x00\x00\x00";
        let mut bytes = prefix.to_vec();
        bytes.extend(commit("t", "1").encode().unwrap());

        let replayed = replay(&bytes, prefix.len()).unwrap();
        assert_eq!(replayed.commits, 1);

        let empty = replay(prefix, prefix.len()).unwrap();
        assert_eq!(empty.valid_end, prefix.len() as u64);
    }
}
