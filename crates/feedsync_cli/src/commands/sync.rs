//! Sync command implementation.

use feedsync_engine::{tenant_base_url, HttpTransport, SyncConfig, SyncEngine};
use feedsync_store::{LocalStore, StoreConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Options for one sync run.
#[derive(Debug)]
pub struct SyncOptions {
    /// Tenant identifier.
    pub tenant: String,
    /// API host.
    pub host: String,
    /// URL scheme.
    pub protocol: String,
    /// Bearer token.
    pub token: String,
    /// Read the whole body before decoding.
    pub buffered: bool,
    /// Ignore the freshness window.
    pub force: bool,
    /// Stream deadline in seconds.
    pub timeout_secs: u64,
}

impl SyncOptions {
    fn config(&self) -> SyncConfig {
        let base_url = tenant_base_url(&self.protocol, &self.tenant, &self.host);
        let mut config = SyncConfig::new(self.tenant.clone(), base_url)
            .with_streaming(!self.buffered)
            .with_stream_timeout(Duration::from_secs(self.timeout_secs));
        if self.force {
            config = config.with_freshness_window(Duration::ZERO);
        }
        config
    }
}

/// Runs the sync command.
pub fn run(path: &Path, options: &SyncOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = options.config();
    let transport = HttpTransport::new(&config, options.token.clone())?;
    let store = Arc::new(LocalStore::open(StoreConfig::at_path(path))?);
    let engine = SyncEngine::new(config, Arc::clone(&store), transport)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(engine.bootstrap_and_sync())?;
    store.close()?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            if report.success {
                println!("✓ Sync succeeded{}", if report.full_reset { " (full reset)" } else { "" });
            } else {
                println!("✗ Sync failed: {}", report.error.as_deref().unwrap_or("unknown error"));
            }
            if report.touched_tables.is_empty() {
                println!("  No tables changed");
            }
            for table in &report.touched_tables {
                println!("  touched {}", table);
            }
        }
    }

    if report.success {
        Ok(())
    } else {
        Err("Sync failed".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SyncOptions {
        SyncOptions {
            tenant: "acme".into(),
            host: "api.example.com".into(),
            protocol: "https".into(),
            token: "t".into(),
            buffered: false,
            force: false,
            timeout_secs: 120,
        }
    }

    #[test]
    fn config_from_options() {
        let config = options().config();
        assert_eq!(config.base_url, "https://acme.api.example.com/api");
        assert!(config.streaming);
        assert_eq!(config.freshness_window, Duration::from_secs(30));
    }

    #[test]
    fn force_and_buffered() {
        let config = SyncOptions {
            buffered: true,
            force: true,
            timeout_secs: 5,
            ..options()
        }
        .config();
        assert!(!config.streaming);
        assert_eq!(config.freshness_window, Duration::ZERO);
        assert_eq!(config.stream_timeout, Duration::from_secs(5));
    }
}
