//! Concurrent stream key to session map.
//!
//! Guarantees at most one live subprocess per key. Each key has its own slot
//! behind a per-key mutex: the lookup and the launch of a missing session
//! happen under that slot's lock, so of N concurrent requests for a new key
//! exactly one launches and the rest refresh. The map lock itself is only
//! held to find or insert a slot, so keys never wait on each other's launches.
//!
//! Lock order is slot, then map. No path waits on a slot while holding the
//! map lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::types::SessionEntry;
use crate::stream::StreamKey;

/// Outcome of [`SessionRegistry::get_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquired {
    /// No session existed; the factory launched one.
    Launched { session_id: String },
    /// A running session was sent a refresh.
    Refreshed,
    /// A session exists but is already stopping; it keeps the key until it exits.
    Draining,
}

/// Per-key cell. `None` while the first launch is in flight or after it failed.
type Slot = Arc<Mutex<Option<SessionEntry>>>;

/// Registry of live sessions for one profile.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    slots: Arc<RwLock<HashMap<StreamKey, Slot>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh the session for `key`, or create it with `factory`.
    ///
    /// The refresh never blocks: a refresh that finds one already queued is
    /// coalesced with it. Factory errors propagate and nothing is registered.
    /// Only callers for the same key wait on the factory.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn get_or_create<F, Fut, E>(&self, key: StreamKey, factory: F) -> Result<Acquired, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SessionEntry, E>>,
    {
        let (slot, mut entry) = loop {
            let slot = self.slot_or_insert(key).await;
            let guard = Arc::clone(&slot).lock_owned().await;
            // The slot may have been evicted while this caller queued on it.
            if self.is_current(key, &slot).await {
                break (slot, guard);
            }
        };

        if let Some(existing) = entry.as_ref() {
            return Ok(match existing.refresh_tx.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => {
                    debug!(%key, session_id = %existing.session_id, "Refreshed session");
                    Acquired::Refreshed
                }
                Err(TrySendError::Closed(())) => {
                    debug!(%key, session_id = %existing.session_id, "Session is draining");
                    Acquired::Draining
                }
            });
        }

        match factory().await {
            Ok(created) => {
                let session_id = created.session_id.clone();
                *entry = Some(created);
                Ok(Acquired::Launched { session_id })
            }
            Err(e) => {
                self.evict(key, &slot).await;
                Err(e)
            }
        }
    }

    /// Remove the entry for `key`. Idempotent.
    ///
    /// Dropping the entry closes the session's refresh channel, which its
    /// watchdog treats as a stop request.
    pub async fn remove(&self, key: StreamKey) -> bool {
        self.take_if(key, |_| true).await
    }

    /// Remove the entry for `key` only if it belongs to `session_id`.
    pub async fn remove_session(&self, key: StreamKey, session_id: &str) -> bool {
        self.take_if(key, |entry| entry.session_id == session_id).await
    }

    pub async fn contains(&self, key: StreamKey) -> bool {
        let Some(slot) = self.current_slot(key).await else {
            return false;
        };
        slot.lock().await.is_some()
    }

    /// Number of registered sessions. Launches still in flight are not counted.
    pub async fn len(&self) -> usize {
        self.keys().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn keys(&self) -> Vec<StreamKey> {
        let slots: Vec<(StreamKey, Slot)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(key, slot)| (*key, Arc::clone(slot)))
            .collect();

        let mut keys = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            if slot.lock().await.is_some() {
                keys.push(key);
            }
        }
        keys
    }

    async fn current_slot(&self, key: StreamKey) -> Option<Slot> {
        self.slots.read().await.get(&key).map(Arc::clone)
    }

    async fn slot_or_insert(&self, key: StreamKey) -> Slot {
        if let Some(slot) = self.current_slot(key).await {
            return slot;
        }
        Arc::clone(self.slots.write().await.entry(key).or_default())
    }

    async fn is_current(&self, key: StreamKey, slot: &Slot) -> bool {
        self.slots
            .read()
            .await
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Drop `slot` from the map if it is still the one registered for `key`.
    /// Callers hold the slot's lock and have left it empty.
    async fn evict(&self, key: StreamKey, slot: &Slot) {
        let mut slots = self.slots.write().await;
        if slots.get(&key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(&key);
        }
    }

    async fn take_if(&self, key: StreamKey, matches: impl FnOnce(&SessionEntry) -> bool) -> bool {
        let Some(slot) = self.current_slot(key).await else {
            return false;
        };
        let mut entry = slot.lock().await;
        if !entry.as_ref().is_some_and(matches) {
            return false;
        }
        *entry = None;
        self.evict(key, &slot).await;
        true
    }
}
