//! Out-of-band stop signals for running sessions.
//!
//! A session that wants to be stoppable from outside registers a single-slot
//! mailbox under its stream key. Delivery is best-effort: a signal that finds
//! the slot full, or the supervisor no longer listening, is dropped and the
//! caller is told so. The idle timeout remains the backstop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use crate::stream::StreamKey;

/// Result of [`SignalBus::notify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The signal is waiting in the session's mailbox.
    Delivered,
    /// A mailbox exists but could not take the signal.
    Dropped,
    /// No session registered a mailbox for this key.
    NoSession,
}

/// Receiving end of a per-key mailbox, held by the session's watchdog.
#[derive(Debug)]
pub struct Mailbox {
    key: StreamKey,
    id: u64,
    rx: mpsc::Receiver<()>,
}

impl Mailbox {
    pub const fn key(&self) -> StreamKey {
        self.key
    }

    /// Wait for a stop signal. `None` once the bus has dropped this mailbox.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    /// Stop accepting signals; later notifications report `Dropped`.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

struct Slot {
    id: u64,
    tx: mpsc::Sender<()>,
}

/// Concurrent map of stream key to mailbox.
#[derive(Clone, Default)]
pub struct SignalBus {
    slots: Arc<RwLock<HashMap<StreamKey, Slot>>>,
    next_id: Arc<AtomicU64>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the mailbox for `key`, replacing any stale one.
    pub async fn register(&self, key: StreamKey) -> Mailbox {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(1);

        if self.slots.write().await.insert(key, Slot { id, tx }).is_some() {
            warn!(%key, "Replaced existing stop mailbox");
        }
        debug!(%key, "Stop mailbox registered");

        Mailbox { key, id, rx }
    }

    /// Try to deliver a stop signal to the session registered under `key`.
    pub async fn notify(&self, key: StreamKey) -> NotifyOutcome {
        let slots = self.slots.read().await;
        let Some(slot) = slots.get(&key) else {
            return NotifyOutcome::NoSession;
        };

        match slot.tx.try_send(()) {
            Ok(()) => {
                debug!(%key, "Stop signal delivered");
                NotifyOutcome::Delivered
            }
            Err(TrySendError::Full(())) => {
                debug!(%key, "Stop signal dropped, one is already pending");
                NotifyOutcome::Dropped
            }
            Err(TrySendError::Closed(())) => {
                debug!(%key, "Stop signal dropped, session is no longer listening");
                NotifyOutcome::Dropped
            }
        }
    }

    /// Remove `mailbox` from the bus if it is still the one registered for its key.
    pub async fn release(&self, mailbox: &Mailbox) -> bool {
        let mut slots = self.slots.write().await;
        if slots.get(&mailbox.key).is_some_and(|slot| slot.id == mailbox.id) {
            slots.remove(&mailbox.key);
            debug!(key = %mailbox.key, "Stop mailbox released");
            true
        } else {
            false
        }
    }

    pub async fn contains(&self, key: StreamKey) -> bool {
        self.slots.read().await.contains_key(&key)
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::stream::SourceAddress;

    fn key(addr: &str) -> StreamKey {
        SourceAddress::parse(addr).unwrap().key()
    }

    #[tokio::test]
    async fn notify_without_mailbox_reports_no_session() {
        let bus = SignalBus::new();
        assert_eq!(
            bus.notify(key("rtsp://cam1/stream")).await,
            NotifyOutcome::NoSession
        );
        assert!(bus.is_empty().await);
    }

    #[tokio::test]
    async fn notify_delivers_to_registered_mailbox() {
        let bus = SignalBus::new();
        let k = key("rtsp://cam1/stream");
        let mut mailbox = bus.register(k).await;

        assert_eq!(bus.notify(k).await, NotifyOutcome::Delivered);
        assert_eq!(mailbox.recv().await, Some(()));
    }

    #[tokio::test]
    async fn second_signal_is_dropped_while_one_is_pending() {
        let bus = SignalBus::new();
        let k = key("rtsp://cam1/stream");
        let _mailbox = bus.register(k).await;

        assert_eq!(bus.notify(k).await, NotifyOutcome::Delivered);
        assert_eq!(bus.notify(k).await, NotifyOutcome::Dropped);
    }

    #[tokio::test]
    async fn closed_mailbox_drops_signals() {
        let bus = SignalBus::new();
        let k = key("rtsp://cam1/stream");
        let mut mailbox = bus.register(k).await;
        mailbox.close();

        assert_eq!(bus.notify(k).await, NotifyOutcome::Dropped);
    }

    #[tokio::test]
    async fn release_only_removes_own_mailbox() {
        let bus = SignalBus::new();
        let k = key("rtsp://cam1/stream");
        let stale = bus.register(k).await;
        let current = bus.register(k).await;

        assert!(!bus.release(&stale).await);
        assert!(bus.contains(k).await);
        assert!(bus.release(&current).await);
        assert!(!bus.contains(k).await);
        assert!(!bus.release(&current).await);
    }

    #[tokio::test]
    async fn mailboxes_are_per_key() {
        let bus = SignalBus::new();
        let a = key("rtsp://cam1/stream");
        let b = key("rtsp://cam2/stream");
        let mut mailbox_a = bus.register(a).await;
        let _mailbox_b = bus.register(b).await;

        assert_eq!(bus.notify(a).await, NotifyOutcome::Delivered);
        assert_eq!(bus.len().await, 2);
        assert_eq!(mailbox_a.recv().await, Some(()));
    }
}
