//! Sync-complete listener registry.

use crate::state::SyncReport;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

type Listener = Arc<dyn Fn(&SyncReport) + Send + Sync>;
type Slots = Mutex<Vec<(u64, Listener)>>;

/// Listeners notified once per completed sync attempt.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    slots: Arc<Slots>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub(crate) fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncReport) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().push((id, Arc::new(listener)));
        Subscription {
            id,
            slots: Arc::downgrade(&self.slots),
        }
    }

    /// Calls every listener with `report`.
    ///
    /// Listeners run outside the registry lock, so they may subscribe or
    /// unsubscribe. A panicking listener is logged and skipped.
    pub(crate) fn notify(&self, report: &SyncReport) {
        let listeners: Vec<Listener> = self
            .slots
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(report))).is_err() {
                warn!("sync listener panicked");
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Handle returned by [`SyncEngine::subscribe`](crate::SyncEngine::subscribe).
///
/// Dropping the handle keeps the listener registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    slots: Weak<Slots>,
}

impl Subscription {
    /// Removes the listener. A no-op if the engine is gone.
    pub fn unsubscribe(self) {
        if let Some(slots) = self.slots.upgrade() {
            slots.lock().retain(|(id, _)| *id != self.id);
        }
    }
}
