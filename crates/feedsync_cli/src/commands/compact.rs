//! Compact command implementation.

use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;
    let before = store.log_size()?;
    store.compact()?;
    let after = store.log_size()?;
    store.close()?;

    println!("Compacted {:?}: {} -> {} bytes", path, before, after);
    Ok(())
}
