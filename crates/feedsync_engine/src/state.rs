//! Sync state, statistics and per-attempt reports.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Engine is idle, no attempt has run yet.
    Idle,
    /// Engine is warming up the tenant session.
    Bootstrapping,
    /// Engine is deciding whether to skip, resume or start over.
    Deciding,
    /// Engine is consuming the change feed.
    Streaming,
    /// Engine wiped local state and is rebuilding it.
    Resetting,
    /// The last attempt succeeded.
    Synced,
    /// The last attempt failed.
    Failed,
}

impl SyncState {
    /// Returns true while an attempt is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Bootstrapping
                | SyncState::Deciding
                | SyncState::Streaming
                | SyncState::Resetting
        )
    }

    /// Returns true if a new attempt may start.
    pub fn can_start_sync(&self) -> bool {
        !self.is_active()
    }
}

/// Statistics about sync attempts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    /// Attempts started.
    pub attempts: u64,
    /// Attempts that reported success, skips included.
    pub successes: u64,
    /// Attempts that failed.
    pub failures: u64,
    /// Attempts skipped because the local copy was fresh.
    pub skips: u64,
    /// Full resets performed.
    pub resets: u64,
    /// Feed messages applied.
    pub messages_applied: u64,
    /// Feed lines skipped as malformed or unknown.
    pub lines_skipped: u64,
    /// Batches of the batched entity committed.
    pub batches_flushed: u64,
    /// Completion time of the last successful attempt.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Outcome of one `bootstrap_and_sync` attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Tables that received at least one write.
    pub touched_tables: BTreeSet<String>,
    /// Error message of a failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether local state was wiped and rebuilt.
    pub full_reset: bool,
}

impl SyncReport {
    /// A successful attempt that touched `tables`.
    pub fn success(tables: BTreeSet<String>) -> Self {
        Self {
            success: true,
            touched_tables: tables,
            error: None,
            full_reset: false,
        }
    }

    /// A successful attempt that did nothing.
    pub fn skipped() -> Self {
        Self::success(BTreeSet::new())
    }

    /// A failed attempt. Tables touched before the failure stay committed.
    pub fn failure(tables: BTreeSet<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            touched_tables: tables,
            error: Some(error.into()),
            full_reset: false,
        }
    }

    /// Returns whether `table` was written.
    pub fn touched(&self, table: &str) -> bool {
        self.touched_tables.contains(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_state_is_active() {
        assert!(!SyncState::Idle.is_active());
        assert!(SyncState::Bootstrapping.is_active());
        assert!(SyncState::Streaming.is_active());
        assert!(SyncState::Resetting.is_active());
        assert!(!SyncState::Synced.is_active());
        assert!(!SyncState::Failed.is_active());
    }

    #[test]
    fn sync_state_can_start() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Synced.can_start_sync());
        assert!(SyncState::Failed.can_start_sync());
        assert!(!SyncState::Deciding.can_start_sync());
    }

    #[test]
    fn report_constructors() {
        let ok = SyncReport::success(["teams".to_string()].into_iter().collect());
        assert!(ok.success && ok.touched("teams") && !ok.full_reset);

        let skipped = SyncReport::skipped();
        assert!(skipped.success && skipped.touched_tables.is_empty());

        let failed = SyncReport::failure(BTreeSet::new(), "boom");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }

    #[test]
    fn report_serializes_as_json() {
        let report = SyncReport::success(["a".to_string()].into_iter().collect());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"success": true, "touched_tables": ["a"], "full_reset": false})
        );
    }
}
