//! Applies decoded feed messages to the local store.

use crate::config::SyncConfig;
use feedsync_protocol::StreamMessage;
use feedsync_store::{LocalStore, RowMutation, StoreResult};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::mem;
use tracing::{debug, info};

/// Whether the caller should keep reading the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Continue,
    Stop,
}

/// Per-attempt application state.
///
/// Writes to the batched entity are queued in arrival order and committed
/// as one store transaction per batch. Everything else is written as it
/// arrives. The queue is flushed before any cursor is persisted, before a
/// snapshot window of the batched entity closes, and when the feed ends.
pub(crate) struct EventApplier<'a> {
    store: &'a LocalStore,
    config: &'a SyncConfig,
    cursor_key: String,
    batch: Vec<RowMutation>,
    snapshots: HashMap<String, HashSet<String>>,
    touched: BTreeSet<String>,
    resync_requested: bool,
    done: bool,
    applied: u64,
    batches_flushed: u64,
}

impl<'a> EventApplier<'a> {
    pub(crate) fn new(store: &'a LocalStore, config: &'a SyncConfig) -> Self {
        Self {
            store,
            config,
            cursor_key: config.cursor_key(),
            batch: Vec::with_capacity(config.batch_size),
            snapshots: HashMap::new(),
            touched: BTreeSet::new(),
            resync_requested: false,
            done: false,
            applied: 0,
            batches_flushed: 0,
        }
    }

    /// Applies one message.
    pub(crate) fn apply(&mut self, message: StreamMessage) -> StoreResult<Control> {
        self.applied += 1;
        match message {
            StreamMessage::Meta { requires_resync } => {
                if self.config.requires_reset(&requires_resync) {
                    info!(datasets = ?requires_resync, "server requested a full resync");
                    self.resync_requested = true;
                }
            }
            StreamMessage::Checkpoint { cursor } => {
                if !cursor.is_empty() {
                    self.flush()?;
                    self.store.set_meta(&self.cursor_key, &cursor)?;
                }
            }
            StreamMessage::Done { next_cursor } => {
                self.flush()?;
                if let Some(cursor) = next_cursor.filter(|c| !c.is_empty()) {
                    self.store.set_meta(&self.cursor_key, &cursor)?;
                }
                self.done = true;
                return Ok(Control::Stop);
            }
            StreamMessage::SnapshotStart { entity } => {
                debug!(entity = %entity, "snapshot window opened");
                self.snapshots.insert(entity, HashSet::new());
            }
            StreamMessage::SnapshotEnd { entity } => self.close_snapshot(&entity)?,
            StreamMessage::Upsert { entity, id, record } => {
                if is_soft_deleted(&record, &self.config.soft_delete_field) {
                    self.remove(entity, id)?;
                } else {
                    self.write(entity, id, record)?;
                }
            }
            StreamMessage::Delete { entity, id } => self.remove(entity, id)?,
        }
        Ok(Control::Continue)
    }

    /// Flushes pending writes and drops unclosed snapshot windows.
    pub(crate) fn finish(&mut self) -> StoreResult<()> {
        self.flush()?;
        for entity in self.snapshots.keys() {
            debug!(entity = %entity, "discarding snapshot window that never closed");
        }
        self.snapshots.clear();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn touched(&self) -> &BTreeSet<String> {
        &self.touched
    }

    pub(crate) fn into_touched(self) -> BTreeSet<String> {
        self.touched
    }

    pub(crate) fn resync_requested(&self) -> bool {
        self.resync_requested
    }

    pub(crate) fn saw_done(&self) -> bool {
        self.done
    }

    pub(crate) fn applied(&self) -> u64 {
        self.applied
    }

    pub(crate) fn batches_flushed(&self) -> u64 {
        self.batches_flushed
    }

    fn write(&mut self, entity: String, id: String, record: Value) -> StoreResult<()> {
        if let Some(observed) = self.snapshots.get_mut(&entity) {
            observed.insert(id.clone());
        }
        if entity == self.config.batched_entity {
            self.batch.push(RowMutation::upsert(id, record));
            return self.flush_if_full();
        }
        self.store.upsert(&entity, &id, &record)?;
        self.touched.insert(entity);
        Ok(())
    }

    fn remove(&mut self, entity: String, id: String) -> StoreResult<()> {
        if let Some(observed) = self.snapshots.get_mut(&entity) {
            observed.remove(&id);
        }
        if entity == self.config.batched_entity {
            self.batch.push(RowMutation::delete(id));
            return self.flush_if_full();
        }
        self.store.delete(&entity, &id)?;
        self.touched.insert(entity);
        Ok(())
    }

    fn flush_if_full(&mut self) -> StoreResult<()> {
        if self.batch.len() >= self.config.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = mem::take(&mut self.batch);
        self.store.apply_batch(&self.config.batched_entity, &batch)?;
        self.batches_flushed += 1;
        self.touched.insert(self.config.batched_entity.clone());
        debug!(
            entity = %self.config.batched_entity,
            rows = batch.len(),
            "flushed batch"
        );
        Ok(())
    }

    fn close_snapshot(&mut self, entity: &str) -> StoreResult<()> {
        let Some(observed) = self.snapshots.remove(entity) else {
            debug!(entity = %entity, "snapshot_end without snapshot_start");
            return Ok(());
        };
        if entity == self.config.batched_entity {
            self.flush()?;
        }

        let stale: Vec<String> = self
            .store
            .get_ids(entity)?
            .into_iter()
            .filter(|id| !observed.contains(id))
            .collect();
        if !stale.is_empty() {
            let removed = self.store.delete_batch(entity, &stale)?;
            self.touched.insert(entity.to_string());
            debug!(entity = %entity, removed, kept = observed.len(), "snapshot pruned stale rows");
        }
        Ok(())
    }
}

/// Returns whether `record` carries a set soft-delete marker.
///
/// Null, `false`, `0` and the empty string count as unset.
pub(crate) fn is_soft_deleted(record: &Value, field: &str) -> bool {
    match record.get(field) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}
