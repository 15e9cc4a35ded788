//! Inspect command implementation.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// On-disk schema version.
    pub schema_version: u16,
    /// Log size in bytes.
    pub log_size: u64,
    /// Row counts per table.
    pub tables: BTreeMap<String, usize>,
    /// Sync metadata (cursors, last-sync stamps).
    pub meta: BTreeMap<String, String>,
    /// Whether opening the store discarded a torn record.
    pub recovered_torn_tail: bool,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;
    let result = InspectResult {
        path: path.display().to_string(),
        schema_version: store.schema_version()?.as_u16(),
        log_size: store.log_size()?,
        tables: store.tables()?,
        meta: store.meta_entries()?,
        recovered_torn_tail: store.stats().torn_tails > 0,
    };
    store.close()?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("feedsync Store Inspection");
    println!("=========================");
    println!();
    println!("Path:   {}", result.path);
    println!("Schema: v{}", result.schema_version);
    println!("Log:    {}", format_size(result.log_size));
    if result.recovered_torn_tail {
        println!("        (a torn trailing record was discarded on open)");
    }
    println!();
    println!("Tables:");
    if result.tables.is_empty() {
        println!("  (none)");
    }
    for (table, rows) in &result.tables {
        println!("  {:<24} {} rows", table, rows);
    }
    println!();
    println!("Metadata:");
    if result.meta.is_empty() {
        println!("  (none)");
    }
    for (key, value) in &result.meta {
        println!("  {:<24} {}", key, value);
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
