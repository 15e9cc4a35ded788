//! Reset command implementation.

use std::path::Path;
use tracing::info;

/// Runs the reset command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;
    store.clear_all()?;
    store.close()?;
    info!(path = %path.display(), "store wiped");
    println!("Wiped all rows and metadata in {:?}", path);
    Ok(())
}
