//! Error types for the local store.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error from the underlying file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log contains a structurally invalid record.
    #[error("store corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Offset of the offending record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A complete record failed its checksum.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the offending record.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// The on-disk schema is newer than this build understands.
    #[error("unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedSchema {
        /// Version found on disk.
        found: u16,
        /// Highest version this build supports.
        supported: u16,
    },

    /// Another handle holds the store lock.
    #[error("store locked: {path:?} is held by another handle")]
    Locked {
        /// Path of the lock file.
        path: PathBuf,
    },

    /// A record or log entry could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// A stored record or log entry could not be deserialized.
    #[error("decode error: {0}")]
    Decode(String),

    /// A read was attempted past the end of the backend.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Current size.
        size: u64,
    },
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            message: message.into(),
        }
    }

    /// Creates an encode error.
    pub fn encode(message: impl ToString) -> Self {
        Self::Encode(message.to_string())
    }

    /// Creates a decode error.
    pub fn decode(message: impl ToString) -> Self {
        Self::Decode(message.to_string())
    }

    /// Returns true if the error means the on-disk data cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StoreError::Corrupted { .. } | StoreError::ChecksumMismatch { .. }
        )
    }
}
