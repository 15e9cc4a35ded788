//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;

/// Configuration for one tenant's sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Tenant identifier. Scopes the persisted cursor and last-sync keys.
    pub tenant: String,
    /// API base URL, e.g. `https://acme.api.example.com/api`.
    pub base_url: String,
    /// A sync younger than this is skipped when local data and a cursor exist.
    pub freshness_window: Duration,
    /// Overall deadline for one change-feed request, including the body.
    pub stream_timeout: Duration,
    /// Deadline for the best-effort bootstrap call.
    pub bootstrap_timeout: Duration,
    /// The high-volume entity whose writes are batched.
    pub batched_entity: String,
    /// Pending writes that trigger a batch flush.
    pub batch_size: usize,
    /// Tables probed to decide whether any local data exists.
    pub probe_tables: Vec<String>,
    /// Record field that marks an upsert as a logical delete.
    pub soft_delete_field: String,
    /// Datasets whose `requires_resync` triggers a full reset. Empty means
    /// any non-empty list does.
    pub resync_datasets: Vec<String>,
    /// Status code the server uses to reject a cursor.
    pub invalid_cursor_status: u16,
    /// Decode the body incrementally instead of buffering it first.
    pub streaming: bool,
}

impl SyncConfig {
    /// Creates a configuration with defaults for the given tenant.
    pub fn new(tenant: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            base_url: base_url.into(),
            freshness_window: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(120),
            bootstrap_timeout: Duration::from_secs(30),
            batched_entity: "wh_tasks".into(),
            batch_size: 200,
            probe_tables: vec![
                "wh_workspaces".into(),
                "wh_teams".into(),
                "wh_categories".into(),
            ],
            soft_delete_field: "deleted_at".into(),
            resync_datasets: Vec::new(),
            invalid_cursor_status: 400,
            streaming: true,
        }
    }

    /// Sets the freshness window.
    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }

    /// Sets the change-feed deadline.
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    /// Sets the bootstrap deadline.
    pub fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = timeout;
        self
    }

    /// Sets the batched entity.
    pub fn with_batched_entity(mut self, entity: impl Into<String>) -> Self {
        self.batched_entity = entity.into();
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the probe tables.
    pub fn with_probe_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.probe_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Restricts which `requires_resync` datasets trigger a reset.
    pub fn with_resync_datasets<I, S>(mut self, datasets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resync_datasets = datasets.into_iter().map(Into::into).collect();
        self
    }

    /// Chooses between incremental and buffered body decoding.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Metadata key of the resume cursor.
    pub fn cursor_key(&self) -> String {
        format!("sync_cursor:{}", self.tenant)
    }

    /// Metadata key of the last successful sync time (epoch millis).
    pub fn last_sync_key(&self) -> String {
        format!("sync_last:{}", self.tenant)
    }

    /// Returns whether a `requires_resync` list should force a reset.
    pub fn requires_reset(&self, datasets: &[String]) -> bool {
        if self.resync_datasets.is_empty() {
            !datasets.is_empty()
        } else {
            datasets.iter().any(|d| self.resync_datasets.contains(d))
        }
    }

    /// Checks the configuration for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> SyncResult<()> {
        if self.tenant.trim().is_empty() {
            return Err(SyncError::InvalidConfig("tenant must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(SyncError::InvalidConfig("batch size must be positive".into()));
        }
        if self.batched_entity.is_empty() {
            return Err(SyncError::InvalidConfig(
                "batched entity must not be empty".into(),
            ));
        }
        if self.stream_timeout.is_zero() {
            return Err(SyncError::InvalidConfig(
                "stream timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Builds a tenant API base URL: `{protocol}://{tenant}.{host}/api`.
///
/// An empty tenant yields the landlord URL without a subdomain.
pub fn tenant_base_url(protocol: &str, tenant: &str, host: &str) -> String {
    let host = host.trim_end_matches('/');
    if tenant.is_empty() {
        format!("{protocol}://{host}/api")
    } else {
        format!("{protocol}://{tenant}.{host}/api")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::new("acme", "https://acme.example.com/api");
        assert_eq!(config.freshness_window, Duration::from_secs(30));
        assert_eq!(config.stream_timeout, Duration::from_secs(120));
        assert_eq!(config.batch_size, 200);
        assert_eq!(config.batched_entity, "wh_tasks");
        assert_eq!(config.invalid_cursor_status, 400);
        assert!(config.streaming);
        config.validate().unwrap();
    }

    #[test]
    fn keys_are_tenant_scoped() {
        let a = SyncConfig::new("acme", "");
        let b = SyncConfig::new("globex", "");
        assert_eq!(a.cursor_key(), "sync_cursor:acme");
        assert_eq!(a.last_sync_key(), "sync_last:acme");
        assert_ne!(a.cursor_key(), b.cursor_key());
    }

    #[test]
    fn builder_pattern() {
        let config = SyncConfig::new("acme", "http://localhost/api")
            .with_batch_size(50)
            .with_batched_entity("events")
            .with_probe_tables(["a", "b"])
            .with_streaming(false)
            .with_stream_timeout(Duration::from_secs(5));

        assert_eq!(config.batch_size, 50);
        assert_eq!(config.batched_entity, "events");
        assert_eq!(config.probe_tables, vec!["a".to_string(), "b".to_string()]);
        assert!(!config.streaming);
        assert_eq!(config.stream_timeout, Duration::from_secs(5));
    }

    #[test]
    fn validation() {
        assert!(SyncConfig::new(" ", "").validate().is_err());
        assert!(SyncConfig::new("acme", "")
            .with_batch_size(0)
            .validate()
            .is_err());
        assert!(SyncConfig::new("acme", "")
            .with_stream_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn resync_filter() {
        let any = SyncConfig::new("acme", "");
        assert!(!any.requires_reset(&[]));
        assert!(any.requires_reset(&["teams".into()]));

        let only_visibility = any.with_resync_datasets(["visibility"]);
        assert!(!only_visibility.requires_reset(&["teams".into()]));
        assert!(only_visibility.requires_reset(&["teams".into(), "visibility".into()]));
    }

    #[test]
    fn tenant_urls() {
        assert_eq!(
            tenant_base_url("https", "acme", "api.example.com"),
            "https://acme.api.example.com/api"
        );
        assert_eq!(
            tenant_base_url("http", "", "10.0.2.2:8000/"),
            "http://10.0.2.2:8000/api"
        );
    }
}
