//! Session types.

use std::time::Instant;

use tokio::sync::mpsc;

use crate::signal::Mailbox;
use crate::stream::StreamKey;
use crate::subprocess::{Profile, Subprocess};

/// What the registry keeps per stream key.
#[derive(Debug)]
pub struct SessionEntry {
    /// Unique id of this session, for logs and ownership checks.
    pub session_id: String,
    pub profile: Profile,
    /// Keepalive channel into the session's watchdog.
    pub(crate) refresh_tx: mpsc::Sender<()>,
    pub started_at: Instant,
}

impl SessionEntry {
    pub fn new(session_id: String, profile: Profile, refresh_tx: mpsc::Sender<()>) -> Self {
        Self {
            session_id,
            profile,
            refresh_tx,
            started_at: Instant::now(),
        }
    }
}

/// One supervised subprocess, owned by its watchdog.
#[derive(Debug)]
pub struct Session {
    pub key: StreamKey,
    pub session_id: String,
    pub profile: Profile,
    pub process: Subprocess,
    pub refresh_rx: mpsc::Receiver<()>,
    /// Present when the session accepts external stop signals.
    pub mailbox: Option<Mailbox>,
}
