//! Store statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for store activity.
///
/// All counters are atomic and monotonically increasing for the lifetime of
/// the [`crate::LocalStore`], across close and re-open.
#[derive(Debug, Default)]
pub struct StoreStats {
    commits: AtomicU64,
    rows_written: AtomicU64,
    rows_deleted: AtomicU64,
    bytes_appended: AtomicU64,
    compactions: AtomicU64,
    opens: AtomicU64,
    torn_tails: AtomicU64,
}

impl StoreStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_commit(&self, written: u64, deleted: u64, bytes: u64) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.rows_written.fetch_add(written, Ordering::Relaxed);
        self.rows_deleted.fetch_add(deleted, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_open(&self, torn_tail: bool) {
        self.opens.fetch_add(1, Ordering::Relaxed);
        if torn_tail {
            self.torn_tails.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Takes a point-in-time copy of the counters.
    pub fn snapshot(&self) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            rows_deleted: self.rows_deleted.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            opens: self.opens.load(Ordering::Relaxed),
            torn_tails: self.torn_tails.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStatsSnapshot {
    /// Committed transactions (one per log record).
    pub commits: u64,
    /// Rows inserted or replaced.
    pub rows_written: u64,
    /// Rows removed by delete operations.
    pub rows_deleted: u64,
    /// Bytes appended to the log.
    pub bytes_appended: u64,
    /// Log rewrites.
    pub compactions: u64,
    /// Times the log was opened.
    pub opens: u64,
    /// Opens that found and discarded a torn record.
    pub torn_tails: u64,
}

impl StoreStatsSnapshot {
    /// Counter deltas since an earlier snapshot.
    #[must_use]
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            commits: self.commits.saturating_sub(earlier.commits),
            rows_written: self.rows_written.saturating_sub(earlier.rows_written),
            rows_deleted: self.rows_deleted.saturating_sub(earlier.rows_deleted),
            bytes_appended: self.bytes_appended.saturating_sub(earlier.bytes_appended),
            compactions: self.compactions.saturating_sub(earlier.compactions),
            opens: self.opens.saturating_sub(earlier.opens),
            torn_tails: self.torn_tails.saturating_sub(earlier.torn_tails),
        }
    }
}
