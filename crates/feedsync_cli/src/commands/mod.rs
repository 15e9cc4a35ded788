//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod reset;
pub mod sync;
pub mod verify;

use feedsync_store::{LocalStore, StoreConfig};
use std::path::Path;

/// Opens an existing store, failing if `path` holds none.
pub fn open_existing(path: &Path) -> Result<LocalStore, Box<dyn std::error::Error>> {
    let config = StoreConfig::at_path(path).create_dirs(false);
    match config.log_path() {
        Some(log) if log.exists() => Ok(LocalStore::open(config)?),
        _ => Err(format!("No store found at {:?}", path).into()),
    }
}
