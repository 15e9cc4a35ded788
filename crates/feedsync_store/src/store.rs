//! The local store.

use crate::backend::{FileBackend, InMemoryBackend, StorageBackend};
use crate::config::{StoreConfig, LOCK_FILE, LOG_FILE};
use crate::error::{StoreError, StoreResult};
use crate::log;
use crate::migration::{self, SchemaVersion, HEADER_SIZE};
use crate::stats::{StoreStats, StoreStatsSnapshot};
use crate::types::{Mutation, RowMutation, StoreState};
use fs2::FileExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

/// An open store: backend, materialized state and the directory lock.
struct StoreHandle {
    backend: Box<dyn StorageBackend>,
    state: StoreState,
    schema: SchemaVersion,
    /// Log size right after the last compaction in this session.
    compacted_len: u64,
    /// Held for exclusive access; released on drop.
    _lock: Option<File>,
}

/// Durable table and metadata storage.
///
/// The store is opened lazily on first use and the same handle is reused
/// until [`close`](Self::close). Every write is one committed log record, so
/// batches are all-or-nothing. Reads are served from memory and only ever
/// observe committed state.
///
/// # Example
///
/// ```rust
/// use feedsync_store::LocalStore;
/// use serde_json::json;
///
/// let store = LocalStore::open_in_memory()?;
/// store.upsert("workspaces", "7", &json!({"id": 7, "name": "Ops"}))?;
/// store.set_meta("sync_cursor:acme", "abc123")?;
///
/// assert_eq!(store.get_all("workspaces")?, vec![json!({"id": 7, "name": "Ops"})]);
/// assert_eq!(store.get_meta("sync_cursor:acme")?.as_deref(), Some("abc123"));
/// # Ok::<(), feedsync_store::StoreError>(())
/// ```
pub struct LocalStore {
    config: StoreConfig,
    /// Bytes of an in-memory store, shared across close and re-open.
    memory: InMemoryBackend,
    handle: Mutex<Option<StoreHandle>>,
    stats: StoreStats,
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore")
            .field("config", &self.config)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl LocalStore {
    /// Creates a store that opens on first use.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            memory: InMemoryBackend::new(),
            handle: Mutex::new(None),
            stats: StoreStats::new(),
        }
    }

    /// Creates and immediately opens a store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened, for example because
    /// another handle holds the lock or the log is corrupted.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let store = Self::new(config);
        store.init()?;
        Ok(store)
    }

    /// Creates and opens an empty in-memory store.
    ///
    /// # Errors
    ///
    /// Infallible in practice; kept fallible for symmetry with [`open`](Self::open).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(StoreConfig::in_memory())
    }

    /// Creates an in-memory store over existing log bytes.
    ///
    /// The backend is shared, so its bytes can be inspected or damaged to
    /// simulate crashes between close and re-open.
    #[must_use]
    pub fn with_memory_backend(backend: InMemoryBackend, config: StoreConfig) -> Self {
        Self {
            config: StoreConfig {
                path: None,
                ..config
            },
            memory: backend,
            handle: Mutex::new(None),
            stats: StoreStats::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Opens the store if it is not open yet.
    ///
    /// Idempotent. Runs schema migration and log recovery on first open.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn init(&self) -> StoreResult<()> {
        self.with_handle(|_| Ok(()))
    }

    /// Closes the handle and releases the directory lock.
    ///
    /// The next operation re-opens the store.
    ///
    /// # Errors
    ///
    /// Returns an error if pending writes cannot be flushed.
    pub fn close(&self) -> StoreResult<()> {
        if let Some(mut handle) = self.handle.lock().take() {
            if !self.config.sync_on_commit {
                handle.backend.sync()?;
            }
            debug!("closed local store");
        }
        Ok(())
    }

    /// Returns whether a handle is currently open.
    pub fn is_open(&self) -> bool {
        self.handle.lock().is_some()
    }

    // ------------------------------------------------------------------
    // Rows
    // ------------------------------------------------------------------

    /// Inserts or replaces one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be committed.
    pub fn upsert(&self, table: &str, id: &str, record: &Value) -> StoreResult<()> {
        let mutation = Mutation::Upsert {
            table: table.to_owned(),
            id: id.to_owned(),
            data: encode_record(record)?,
        };
        self.with_handle(|handle| self.commit(handle, vec![mutation]))
    }

    /// Inserts or replaces many rows in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be committed. No row of the
    /// batch is visible in that case.
    pub fn upsert_batch(&self, table: &str, rows: &[(String, Value)]) -> StoreResult<()> {
        let mutations = rows
            .iter()
            .map(|(id, record)| {
                Ok(Mutation::Upsert {
                    table: table.to_owned(),
                    id: id.clone(),
                    data: encode_record(record)?,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;
        self.with_handle(|handle| self.commit(handle, mutations))
    }

    /// Deletes one row. Returns whether the row existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be committed.
    pub fn delete(&self, table: &str, id: &str) -> StoreResult<bool> {
        self.delete_batch(table, &[id]).map(|removed| removed > 0)
    }

    /// Deletes many rows in one transaction and returns how many existed.
    ///
    /// Absent ids are ignored; if none of the ids exist nothing is written.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be committed.
    pub fn delete_batch<S: AsRef<str>>(&self, table: &str, ids: &[S]) -> StoreResult<usize> {
        self.with_handle(|handle| {
            let present: BTreeSet<&str> = ids
                .iter()
                .map(AsRef::as_ref)
                .filter(|id| handle.state.contains(table, id))
                .collect();
            let mutations: Vec<Mutation> = present
                .iter()
                .map(|id| Mutation::Delete {
                    table: table.to_owned(),
                    id: (*id).to_owned(),
                })
                .collect();
            let removed = mutations.len();
            self.commit(handle, mutations)?;
            Ok(removed)
        })
    }

    /// Applies an ordered sequence of upserts and deletes in one transaction.
    ///
    /// Later mutations of the same id win, exactly as if they had been
    /// applied one by one.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be committed.
    pub fn apply_batch(&self, table: &str, batch: &[RowMutation]) -> StoreResult<()> {
        let mutations = batch
            .iter()
            .map(|mutation| {
                Ok(match mutation {
                    RowMutation::Upsert { id, record } => Mutation::Upsert {
                        table: table.to_owned(),
                        id: id.clone(),
                        data: encode_record(record)?,
                    },
                    RowMutation::Delete { id } => Mutation::Delete {
                        table: table.to_owned(),
                        id: id.clone(),
                    },
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;
        self.with_handle(|handle| self.commit(handle, mutations))
    }

    /// Returns one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or the stored record
    /// cannot be parsed.
    pub fn get(&self, table: &str, id: &str) -> StoreResult<Option<Value>> {
        self.with_handle(|handle| {
            handle
                .state
                .tables
                .get(table)
                .and_then(|rows| rows.get(id))
                .map(|data| serde_json::from_str::<Value>(data).map_err(StoreError::decode))
                .transpose()
        })
    }

    /// Returns all records of a table, ordered by id.
    ///
    /// Records that fail to parse are skipped with a warning; this read
    /// hydrates caches and must not fail on one bad row.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn get_all(&self, table: &str) -> StoreResult<Vec<Value>> {
        self.with_handle(|handle| {
            let Some(rows) = handle.state.tables.get(table) else {
                return Ok(Vec::new());
            };
            Ok(rows
                .iter()
                .filter_map(|(id, data)| match serde_json::from_str::<Value>(data) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!(table, id = %id, error = %e, "skipping unreadable record");
                        None
                    }
                })
                .collect())
        })
    }

    /// Returns the ids stored in a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn get_ids(&self, table: &str) -> StoreResult<BTreeSet<String>> {
        self.with_handle(|handle| {
            Ok(handle
                .state
                .tables
                .get(table)
                .map(|rows| rows.keys().cloned().collect())
                .unwrap_or_default())
        })
    }

    /// Returns the number of rows in a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn row_count(&self, table: &str) -> StoreResult<usize> {
        self.with_handle(|handle| Ok(handle.state.row_count(table)))
    }

    /// Returns every non-empty table with its row count.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn tables(&self) -> StoreResult<BTreeMap<String, usize>> {
        self.with_handle(|handle| {
            Ok(handle
                .state
                .tables
                .iter()
                .map(|(name, rows)| (name.clone(), rows.len()))
                .collect())
        })
    }

    /// Removes every row of a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be committed.
    pub fn clear_table(&self, table: &str) -> StoreResult<()> {
        self.with_handle(|handle| {
            if !handle.state.tables.contains_key(table) {
                return Ok(());
            }
            self.commit(
                handle,
                vec![Mutation::ClearTable {
                    table: table.to_owned(),
                }],
            )
        })
    }

    /// Removes all rows and all metadata, then compacts the log so no wiped
    /// data remains on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset cannot be committed.
    pub fn clear_all(&self) -> StoreResult<()> {
        self.with_handle(|handle| {
            self.commit(handle, vec![Mutation::ClearAll])?;
            self.compact_locked(handle)?;
            info!("cleared local store");
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    /// Returns a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn get_meta(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_handle(|handle| Ok(handle.state.meta.get(key).cloned()))
    }

    /// Sets a metadata value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be committed.
    pub fn set_meta(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_handle(|handle| {
            self.commit(
                handle,
                vec![Mutation::SetMeta {
                    key: key.to_owned(),
                    value: value.to_owned(),
                }],
            )
        })
    }

    /// Removes a metadata value. Absent keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be committed.
    pub fn delete_meta(&self, key: &str) -> StoreResult<()> {
        self.with_handle(|handle| {
            if !handle.state.meta.contains_key(key) {
                return Ok(());
            }
            self.commit(
                handle,
                vec![Mutation::DeleteMeta {
                    key: key.to_owned(),
                }],
            )
        })
    }

    /// Returns all metadata entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn meta_entries(&self) -> StoreResult<BTreeMap<String, String>> {
        self.with_handle(|handle| Ok(handle.state.meta.clone()))
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Rewrites the log as a single image of the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if the new log cannot be written. The old log stays
    /// intact in that case.
    pub fn compact(&self) -> StoreResult<()> {
        self.with_handle(|handle| self.compact_locked(handle))
    }

    /// Returns activity counters.
    pub fn stats(&self) -> StoreStatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the schema version of the open log.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn schema_version(&self) -> StoreResult<SchemaVersion> {
        self.with_handle(|handle| Ok(handle.schema))
    }

    /// Returns the current log size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn log_size(&self) -> StoreResult<u64> {
        self.with_handle(|handle| handle.backend.size())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn with_handle<R>(
        &self,
        f: impl FnOnce(&mut StoreHandle) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut guard = self.handle.lock();
        let handle = match guard.take() {
            Some(handle) => handle,
            None => self.open_handle()?,
        };
        f(guard.insert(handle))
    }

    fn open_handle(&self) -> StoreResult<StoreHandle> {
        let (mut backend, lock): (Box<dyn StorageBackend>, Option<File>) = match &self.config.path
        {
            Some(dir) => {
                let lock = lock_directory(dir, self.config.create_dirs)?;
                let backend: Box<dyn StorageBackend> =
                    Box::new(FileBackend::open(&dir.join(LOG_FILE))?);
                (backend, Some(lock))
            }
            None => {
                let backend: Box<dyn StorageBackend> = Box::new(self.memory.clone());
                (backend, None)
            }
        };

        let outcome = migration::migrate(&mut *backend)?;
        let bytes = backend.read_all()?;
        let replayed = log::replay(&bytes, HEADER_SIZE)?;

        let torn = replayed.torn_bytes > 0;
        if torn {
            warn!(
                offset = replayed.valid_end,
                bytes = replayed.torn_bytes,
                "discarding torn record at end of store log"
            );
            backend.truncate(replayed.valid_end)?;
        }
        self.stats.record_open(torn);

        debug!(
            schema = %outcome.to,
            commits = replayed.commits,
            tables = replayed.state.tables.len(),
            "opened local store"
        );

        Ok(StoreHandle {
            backend,
            state: replayed.state,
            schema: outcome.to,
            compacted_len: 0,
            _lock: lock,
        })
    }

    /// Appends one record for `mutations`, then applies them in memory.
    fn commit(&self, handle: &mut StoreHandle, mutations: Vec<Mutation>) -> StoreResult<()> {
        if mutations.is_empty() {
            return Ok(());
        }

        let record = log::encode_commit(&mutations)?;
        let start = handle.backend.size()?;
        if let Err(err) = self.append_durably(handle, &record) {
            if let Err(rollback) = handle.backend.truncate(start) {
                warn!(error = %rollback, "failed to roll back partial log append");
            }
            return Err(err);
        }

        let mut written = 0;
        let mut deleted = 0;
        for mutation in &mutations {
            match mutation {
                Mutation::Upsert { .. } => written += 1,
                Mutation::Delete { table, id } if handle.state.contains(table, id) => deleted += 1,
                _ => {}
            }
            handle.state.apply(mutation);
        }
        self.stats.record_commit(written, deleted, record.len() as u64);

        let growth = handle.backend.size()?.saturating_sub(handle.compacted_len);
        if growth > self.config.compact_threshold {
            // The commit is already durable; a failed rewrite leaves the old log in place.
            if let Err(e) = self.compact_locked(handle) {
                warn!(error = %e, "store compaction failed");
            }
        }
        Ok(())
    }

    fn append_durably(&self, handle: &mut StoreHandle, record: &[u8]) -> StoreResult<()> {
        handle.backend.append(record)?;
        if self.config.sync_on_commit {
            handle.backend.sync()?;
        }
        Ok(())
    }

    fn compact_locked(&self, handle: &mut StoreHandle) -> StoreResult<()> {
        let before = handle.backend.size()?;
        let mut image = migration::encode_header(handle.schema).to_vec();
        image.extend(log::encode_image(&handle.state)?);
        handle.backend.replace_all(&image)?;
        handle.compacted_len = image.len() as u64;
        self.stats.record_compaction();
        info!(before, after = image.len(), "compacted store log");
        Ok(())
    }
}

fn encode_record(record: &Value) -> StoreResult<String> {
    serde_json::to_string(record).map_err(StoreError::encode)
}

/// Creates the store directory if allowed and takes its exclusive lock.
fn lock_directory(dir: &Path, create: bool) -> StoreResult<File> {
    if !dir.exists() {
        if !create {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("store directory does not exist: {}", dir.display()),
            )));
        }
        fs::create_dir_all(dir)?;
    }

    let lock_path = dir.join(LOCK_FILE);
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;

    if lock_file.try_lock_exclusive().is_err() {
        return Err(StoreError::Locked { path: lock_path });
    }
    Ok(lock_file)
}
