//! The sync orchestrator.
//!
//! One attempt runs through these phases:
//!
//! ```text
//! Init → Bootstrap → Decide ─┬─ Skip ──────────────────────────────┐
//!                            └─ Stream ─┬─ Completed ─────────────┼→ Finalize
//!                                       ├─ InvalidCursor ─ Reset ─┤
//!                                       ├─ requires_resync  Reset ─┤
//!                                       └─ Failed ────────────────┘
//! ```
//!
//! A reset wipes the store and streams once more without a cursor. It is
//! never nested: a second rejection or resync request during the rebuild
//! is not acted on.

use crate::applier::{Control, EventApplier};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::listeners::{ListenerRegistry, Subscription};
use crate::state::{SyncReport, SyncState, SyncStats};
use crate::transport::{FeedResponse, SyncTransport};
use chrono::Utc;
use feedsync_protocol::{DecodeStats, MessageReader, MessageStream};
use feedsync_store::LocalStore;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the Decide phase chose.
#[derive(Debug, PartialEq, Eq)]
enum Plan {
    Skip,
    Stream { cursor: Option<String> },
}

/// How one change-feed request ended.
enum StreamOutcome {
    Completed {
        touched: BTreeSet<String>,
        resync_requested: bool,
    },
    InvalidCursor,
    Failed {
        touched: BTreeSet<String>,
        error: SyncError,
    },
}

enum FeedEnd {
    Finished,
    InvalidCursor,
}

/// Clears the in-flight flag when an attempt ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps one tenant's local store in sync with the server's change feed.
///
/// ```rust,no_run
/// use feedsync_engine::{HttpTransport, SyncConfig, SyncEngine};
/// use feedsync_store::{LocalStore, StoreConfig};
/// use std::sync::Arc;
///
/// # async fn run() -> feedsync_engine::SyncResult<()> {
/// let config = SyncConfig::new("acme", "https://acme.example.com/api");
/// let transport = HttpTransport::new(&config, "token")?;
/// let store = Arc::new(LocalStore::new(StoreConfig::at_path("/var/lib/feedsync/acme")));
///
/// let engine = SyncEngine::new(config, store, transport)?;
/// let report = engine.bootstrap_and_sync().await?;
/// println!("touched: {:?}", report.touched_tables);
/// # Ok(())
/// # }
/// ```
pub struct SyncEngine<T: SyncTransport> {
    config: SyncConfig,
    store: Arc<LocalStore>,
    transport: Arc<T>,
    listeners: ListenerRegistry,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    in_flight: AtomicBool,
}

impl<T: SyncTransport> std::fmt::Debug for SyncEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("tenant", &self.config.tenant)
            .field("state", &self.state())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates a new sync engine.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if `config` does not validate.
    pub fn new(config: SyncConfig, store: Arc<LocalStore>, transport: T) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            transport: Arc::new(transport),
            listeners: ListenerRegistry::default(),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            in_flight: AtomicBool::new(false),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Registers a listener called with the report of every attempt.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncReport) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Returns every stored record of `table`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_all(&self, table: &str) -> SyncResult<Vec<Value>> {
        Ok(self.store.get_all(table)?)
    }

    /// Returns one stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_by_id(&self, table: &str, id: &str) -> SyncResult<Option<Value>> {
        Ok(self.store.get(table, id)?)
    }

    /// Wipes all local data and closes the store.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadyInProgress`] while an attempt is running,
    /// or a store error.
    pub fn logout(&self) -> SyncResult<()> {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            return Err(self.already_in_progress());
        };
        self.store.clear_all()?;
        self.store.close()?;
        *self.state.write() = SyncState::Idle;
        info!(tenant = %self.config.tenant, "local data wiped");
        Ok(())
    }

    /// Runs one sync attempt.
    ///
    /// # Errors
    ///
    /// Local storage failures and concurrent calls return `Err`. Every
    /// other failure is reported through [`SyncReport::error`].
    pub async fn bootstrap_and_sync(&self) -> SyncResult<SyncReport> {
        self.bootstrap_and_sync_with(&CancellationToken::new()).await
    }

    /// Runs one sync attempt that stops early when `cancel` fires.
    ///
    /// Cancellation is reported as a failed attempt. Rows committed before
    /// it stay committed and the persisted cursor never runs ahead of them.
    ///
    /// # Errors
    ///
    /// See [`bootstrap_and_sync`](Self::bootstrap_and_sync).
    pub async fn bootstrap_and_sync_with(
        &self,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncReport> {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            return Err(self.already_in_progress());
        };

        self.stats.write().attempts += 1;
        let started = Instant::now();

        let result = self.run(cancel).await;
        let report = match &result {
            Ok(report) => report.clone(),
            Err(e) => SyncReport::failure(BTreeSet::new(), e.to_string()),
        };

        self.finish_attempt(&report);
        info!(
            tenant = %self.config.tenant,
            success = report.success,
            touched = report.touched_tables.len(),
            full_reset = report.full_reset,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync attempt finished"
        );
        self.listeners.notify(&report);
        result
    }

    async fn run(&self, cancel: &CancellationToken) -> SyncResult<SyncReport> {
        self.set_state(SyncState::Bootstrapping);
        self.store.init()?;
        self.bootstrap(cancel).await;

        self.set_state(SyncState::Deciding);
        let cursor = match self.decide()? {
            Plan::Skip => {
                info!(tenant = %self.config.tenant, "local data is fresh; skipping sync");
                self.stats.write().skips += 1;
                return Ok(SyncReport::skipped());
            }
            Plan::Stream { cursor } => cursor,
        };

        let report = match self.stream_once(cursor.as_deref(), cancel).await? {
            StreamOutcome::Completed {
                touched,
                resync_requested: false,
            } => SyncReport::success(touched),
            StreamOutcome::Completed {
                touched,
                resync_requested: true,
            } => self.reset_and_rebuild(touched, cancel).await?,
            StreamOutcome::InvalidCursor => {
                info!(tenant = %self.config.tenant, "cursor rejected; rebuilding from scratch");
                self.reset_and_rebuild(BTreeSet::new(), cancel).await?
            }
            StreamOutcome::Failed { touched, error } => {
                warn!(tenant = %self.config.tenant, error = %error, "sync stream failed");
                SyncReport::failure(touched, error.to_string())
            }
        };

        if report.success {
            let now = Utc::now().timestamp_millis();
            self.store
                .set_meta(&self.config.last_sync_key(), &now.to_string())?;
        }
        Ok(report)
    }

    /// Best-effort session warm-up. Failures are logged and ignored.
    async fn bootstrap(&self, cancel: &CancellationToken) {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            result = tokio::time::timeout(self.config.bootstrap_timeout, self.transport.bootstrap()) => {
                result.unwrap_or(Err(SyncError::Timeout))
            }
        };
        if let Err(e) = result {
            warn!(tenant = %self.config.tenant, error = %e, "bootstrap failed; continuing");
        }
    }

    fn decide(&self) -> SyncResult<Plan> {
        let cursor_key = self.config.cursor_key();
        let cursor = self
            .store
            .get_meta(&cursor_key)?
            .filter(|c| !c.is_empty());
        let last_sync = self
            .store
            .get_meta(&self.config.last_sync_key())?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let has_local_data = self.has_local_data();

        if !has_local_data {
            if cursor.is_some() {
                info!(tenant = %self.config.tenant, "no local data; discarding stale cursor");
                self.store.delete_meta(&cursor_key)?;
            }
            return Ok(Plan::Stream { cursor: None });
        }

        let window_ms = i64::try_from(self.config.freshness_window.as_millis()).unwrap_or(i64::MAX);
        let age_ms = Utc::now().timestamp_millis() - last_sync;
        if cursor.is_some() && last_sync > 0 && (0..window_ms).contains(&age_ms) {
            return Ok(Plan::Skip);
        }
        debug!(
            tenant = %self.config.tenant,
            resume = cursor.is_some(),
            age_ms,
            "streaming change feed"
        );
        Ok(Plan::Stream { cursor })
    }

    fn has_local_data(&self) -> bool {
        self.config
            .probe_tables
            .iter()
            .any(|table| match self.store.row_count(table) {
                Ok(count) => count > 0,
                Err(e) => {
                    warn!(table = %table, error = %e, "local data probe failed");
                    false
                }
            })
    }

    async fn reset_and_rebuild(
        &self,
        touched_before: BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> SyncResult<SyncReport> {
        self.set_state(SyncState::Resetting);
        self.store.clear_all()?;
        self.stats.write().resets += 1;
        info!(tenant = %self.config.tenant, "local data wiped for full resync");

        let mut report = match self.stream_once(None, cancel).await? {
            StreamOutcome::Completed {
                touched,
                resync_requested,
            } => {
                if resync_requested {
                    warn!(tenant = %self.config.tenant, "ignoring resync request during rebuild");
                }
                SyncReport::success(touched_before.into_iter().chain(touched).collect())
            }
            StreamOutcome::InvalidCursor => {
                SyncReport::failure(touched_before, SyncError::CursorRejected.to_string())
            }
            StreamOutcome::Failed { touched, error } => {
                warn!(tenant = %self.config.tenant, error = %error, "rebuild stream failed");
                SyncReport::failure(
                    touched_before.into_iter().chain(touched).collect(),
                    error.to_string(),
                )
            }
        };
        report.full_reset = true;
        Ok(report)
    }

    async fn stream_once(
        &self,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> SyncResult<StreamOutcome> {
        self.set_state(SyncState::Streaming);
        let mut applier = EventApplier::new(&self.store, &self.config);
        let mut decoded = DecodeStats::default();
        let deadline = tokio::time::Instant::now() + self.config.stream_timeout;

        let driven = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            result = tokio::time::timeout_at(deadline, self.drive(cursor, &mut applier, &mut decoded)) => {
                result.unwrap_or(Err(SyncError::Timeout))
            }
        };

        let outcome = match driven {
            Ok(FeedEnd::InvalidCursor) => StreamOutcome::InvalidCursor,
            Ok(FeedEnd::Finished) => {
                applier.finish()?;
                if !applier.saw_done() {
                    warn!(tenant = %self.config.tenant, "change feed ended without done");
                }
                StreamOutcome::Completed {
                    touched: BTreeSet::new(),
                    resync_requested: applier.resync_requested(),
                }
            }
            Err(e) if e.is_storage() => return Err(e),
            Err(error) => {
                applier.finish()?;
                StreamOutcome::Failed {
                    touched: BTreeSet::new(),
                    error,
                }
            }
        };

        {
            let mut stats = self.stats.write();
            stats.messages_applied += applier.applied();
            stats.batches_flushed += applier.batches_flushed();
            stats.lines_skipped += decoded.skipped();
        }
        if decoded.skipped() > 0 {
            debug!(
                malformed = decoded.malformed,
                unknown = decoded.unknown,
                "skipped feed lines"
            );
        }

        let touched = applier.into_touched();
        Ok(match outcome {
            StreamOutcome::Completed {
                resync_requested, ..
            } => StreamOutcome::Completed {
                touched,
                resync_requested,
            },
            StreamOutcome::Failed { error, .. } => StreamOutcome::Failed { touched, error },
            StreamOutcome::InvalidCursor => StreamOutcome::InvalidCursor,
        })
    }

    async fn drive(
        &self,
        cursor: Option<&str>,
        applier: &mut EventApplier<'_>,
        decoded: &mut DecodeStats,
    ) -> SyncResult<FeedEnd> {
        match self.transport.open_feed(cursor).await? {
            FeedResponse::InvalidCursor => Ok(FeedEnd::InvalidCursor),
            FeedResponse::Buffered(body) => {
                let mut reader = MessageReader::from_bytes(&body);
                for message in reader.by_ref() {
                    if applier.apply(message)? == Control::Stop {
                        break;
                    }
                }
                *decoded = reader.stats();
                Ok(FeedEnd::Finished)
            }
            FeedResponse::Streaming(chunks) => {
                let mut reader = MessageStream::new(chunks);
                // Counts are copied out per message so a timeout or a
                // failed chunk keeps what was decoded so far.
                loop {
                    let next = reader.next_message().await;
                    *decoded = reader.stats();
                    let Some(message) = next else { break };
                    if applier.apply(message?)? == Control::Stop {
                        break;
                    }
                }
                Ok(FeedEnd::Finished)
            }
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn finish_attempt(&self, report: &SyncReport) {
        let mut stats = self.stats.write();
        if report.success {
            stats.successes += 1;
            stats.last_sync_time = Some(Utc::now());
            stats.last_error = None;
        } else {
            stats.failures += 1;
            stats.last_error = report.error.clone();
        }
        drop(stats);
        self.set_state(if report.success {
            SyncState::Synced
        } else {
            SyncState::Failed
        });
    }

    fn already_in_progress(&self) -> SyncError {
        SyncError::AlreadyInProgress {
            tenant: self.config.tenant.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockFeed, MockTransport};
    use feedsync_protocol::StreamMessage;
    use serde_json::json;

    fn engine() -> SyncEngine<MockTransport> {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let config = SyncConfig::new("acme", "http://localhost/api");
        SyncEngine::new(config, store, MockTransport::new()).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let config = SyncConfig::new("acme", "").with_batch_size(0);
        assert!(matches!(
            SyncEngine::new(config, store, MockTransport::new()),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    #[test]
    fn decide_without_local_data_drops_cursor() {
        let engine = engine();
        let key = engine.config().cursor_key();
        engine.store().set_meta(&key, "c1").unwrap();

        assert_eq!(engine.decide().unwrap(), Plan::Stream { cursor: None });
        assert_eq!(engine.store().get_meta(&key).unwrap(), None);
    }

    #[test]
    fn decide_resumes_stale_sync() {
        let engine = engine();
        engine
            .store()
            .upsert("wh_teams", "1", &json!({"id": 1}))
            .unwrap();
        engine
            .store()
            .set_meta(&engine.config().cursor_key(), "c1")
            .unwrap();
        let an_hour_ago = Utc::now().timestamp_millis() - 3_600_000;
        engine
            .store()
            .set_meta(&engine.config().last_sync_key(), &an_hour_ago.to_string())
            .unwrap();

        assert_eq!(
            engine.decide().unwrap(),
            Plan::Stream {
                cursor: Some("c1".into())
            }
        );
    }

    #[test]
    fn decide_skips_fresh_sync() {
        let engine = engine();
        engine
            .store()
            .upsert("wh_categories", "1", &json!({"id": 1}))
            .unwrap();
        engine
            .store()
            .set_meta(&engine.config().cursor_key(), "c1")
            .unwrap();
        let recent = Utc::now().timestamp_millis() - 5_000;
        engine
            .store()
            .set_meta(&engine.config().last_sync_key(), &recent.to_string())
            .unwrap();

        assert_eq!(engine.decide().unwrap(), Plan::Skip);
    }

    #[test]
    fn decide_ignores_future_last_sync() {
        let engine = engine();
        engine
            .store()
            .upsert("wh_teams", "1", &json!({"id": 1}))
            .unwrap();
        engine
            .store()
            .set_meta(&engine.config().cursor_key(), "c1")
            .unwrap();
        let future = Utc::now().timestamp_millis() + 600_000;
        engine
            .store()
            .set_meta(&engine.config().last_sync_key(), &future.to_string())
            .unwrap();

        assert!(matches!(engine.decide().unwrap(), Plan::Stream { .. }));
    }

    #[tokio::test]
    async fn concurrent_attempt_is_rejected() {
        let engine = engine();
        let _held = InFlight::acquire(&engine.in_flight).unwrap();

        assert!(matches!(
            engine.bootstrap_and_sync().await,
            Err(SyncError::AlreadyInProgress { .. })
        ));
        assert!(matches!(
            engine.logout(),
            Err(SyncError::AlreadyInProgress { .. })
        ));
    }

    #[tokio::test]
    async fn state_follows_attempt() {
        let engine = engine();
        assert_eq!(engine.state(), SyncState::Idle);

        engine
            .transport()
            .push_feed(MockFeed::messages(&[StreamMessage::done("c1")]));
        let report = engine.bootstrap_and_sync().await.unwrap();
        assert!(report.success);
        assert_eq!(engine.state(), SyncState::Synced);

        engine
            .transport()
            .push_feed(MockFeed::Error(SyncError::Http { status: 502 }));
        let report = engine.bootstrap_and_sync().await.unwrap();
        assert!(!report.success);
        assert_eq!(engine.state(), SyncState::Failed);

        let stats = engine.stats();
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 1);
        assert!(stats.last_error.unwrap().contains("502"));
    }

    #[tokio::test]
    async fn logout_wipes_and_closes() {
        let engine = engine();
        engine
            .transport()
            .push_feed(MockFeed::messages(&[
                StreamMessage::upsert("wh_teams", "1", json!({"id": 1})),
                StreamMessage::done("c1"),
            ]));
        engine.bootstrap_and_sync().await.unwrap();
        assert_eq!(engine.get_all("wh_teams").unwrap().len(), 1);

        engine.logout().unwrap();
        assert!(!engine.store().is_open());
        assert_eq!(engine.get_by_id("wh_teams", "1").unwrap(), None);
        assert_eq!(
            engine.store().get_meta(&engine.config().cursor_key()).unwrap(),
            None
        );
    }
}
