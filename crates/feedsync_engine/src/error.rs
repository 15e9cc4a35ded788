//! Error types for the sync engine.

use feedsync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server answered with a failure status.
    #[error("server responded with status {status}")]
    Http {
        /// HTTP status code.
        status: u16,
    },

    /// The server rejected the request as carrying an invalid cursor even
    /// though the feed was already being rebuilt from scratch.
    #[error("cursor rejected during full resync")]
    CursorRejected,

    /// The attempt exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The attempt was cancelled by the caller.
    #[error("sync cancelled")]
    Cancelled,

    /// Local store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A sync for this tenant is already running.
    #[error("sync already in progress for tenant {tenant}")]
    AlreadyInProgress {
        /// Tenant identifier.
        tenant: String,
    },

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a later attempt may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Http { status } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true for local storage failures.
    ///
    /// These abort an attempt and propagate to the caller; every other
    /// attempt-level error is reported through a failed
    /// [`SyncReport`](crate::SyncReport).
    pub fn is_storage(&self) -> bool {
        matches!(self, SyncError::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::Http { status: 503 }.is_retryable());
        assert!(SyncError::Http { status: 429 }.is_retryable());
        assert!(!SyncError::Http { status: 401 }.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn storage_errors_are_distinct() {
        let err = SyncError::from(StoreError::corrupted(8, "bad magic"));
        assert!(err.is_storage());
        assert!(!err.is_retryable());
        assert!(!SyncError::Timeout.is_storage());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::Cancelled.to_string(), "sync cancelled");
        assert!(SyncError::Http { status: 502 }.to_string().contains("502"));
        assert!(SyncError::AlreadyInProgress {
            tenant: "acme".into()
        }
        .to_string()
        .contains("acme"));
    }
}
