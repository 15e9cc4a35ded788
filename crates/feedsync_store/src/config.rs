//! Store configuration.

use std::path::{Path, PathBuf};

/// Name of the log file inside a store directory.
pub(crate) const LOG_FILE: &str = "store.log";

/// Name of the lock file inside a store directory.
pub(crate) const LOCK_FILE: &str = "LOCK";

/// Configuration for opening a [`crate::LocalStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Store directory. `None` keeps everything in memory.
    pub path: Option<PathBuf>,

    /// Whether to fsync the log after every commit.
    pub sync_on_commit: bool,

    /// Log growth since the last compaction above which the log is
    /// rewritten as a single image. The first commit after open measures
    /// from an empty log.
    pub compact_threshold: u64,

    /// Whether to create the store directory if it is missing.
    pub create_dirs: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            sync_on_commit: true,
            compact_threshold: 16 * 1024 * 1024, // 16 MB
            create_dirs: true,
        }
    }
}

impl StoreConfig {
    /// Configuration for an in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Configuration for a store in the given directory.
    #[must_use]
    pub fn at_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Sets whether to fsync after every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the compaction threshold in bytes.
    #[must_use]
    pub const fn compact_threshold(mut self, bytes: u64) -> Self {
        self.compact_threshold = bytes;
        self
    }

    /// Sets whether missing directories are created.
    #[must_use]
    pub const fn create_dirs(mut self, value: bool) -> Self {
        self.create_dirs = value;
        self
    }

    /// Path of the log file, if the store is on disk.
    pub fn log_path(&self) -> Option<PathBuf> {
        self.path.as_ref().map(|dir| dir.join(LOG_FILE))
    }

    /// Path of the lock file, if the store is on disk.
    pub fn lock_path(&self) -> Option<PathBuf> {
        self.path.as_ref().map(|dir| dir.join(LOCK_FILE))
    }
}
