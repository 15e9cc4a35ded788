//! Dump command implementation.

use std::io::{self, Write};
use std::path::Path;

/// Runs the dump command, writing one JSON record per line.
pub fn run(path: &Path, table: &str, limit: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;
    let records = store.get_all(table)?;
    store.close()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for record in records.iter().take(limit.unwrap_or(usize::MAX)) {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
