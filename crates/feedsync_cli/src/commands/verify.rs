//! Verify command implementation.

use feedsync_store::{verify_log, FileBackend, StoreConfig};
use std::path::Path;

/// Runs the verify command.
///
/// Replays the log read-only. A torn tail is reported but is not a
/// failure, since the next open truncates it.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {:?}", path);
    println!();

    let log_path = StoreConfig::at_path(path)
        .log_path()
        .ok_or("Store path required")?;
    if !log_path.exists() {
        return Err(format!("No store found at {:?}", path).into());
    }

    let backend = FileBackend::open_existing(&log_path)?;
    match verify_log(&backend) {
        Ok(summary) => {
            println!("Schema:       {}", summary.schema_version);
            println!("Commits:      {}", summary.commits);
            println!("Images:       {}", summary.images);
            println!("Valid bytes:  {}", summary.valid_bytes);
            if summary.torn_bytes > 0 {
                println!(
                    "Torn tail:    {} bytes (discarded on next open)",
                    summary.torn_bytes
                );
            }
            println!(
                "Contents:     {} rows in {} tables, {} meta entries",
                summary.rows, summary.tables, summary.meta_entries
            );
            println!();
            println!("✓ Store verification passed");
            Ok(())
        }
        Err(e) => {
            println!("Error: {}", e);
            println!();
            println!("✗ Store verification failed");
            Err("Verification failed".into())
        }
    }
}
