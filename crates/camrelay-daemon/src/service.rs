//! Relay service: the operations the HTTP front end exposes.
//!
//! Owns one session registry per profile, the stop-signal bus and every
//! watchdog task. Request handlers only touch the registries and the bus;
//! subprocess I/O happens on the watchdog tasks.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, mpsc, watch};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::session::{
    Acquired, Session, SessionEntry, SessionRegistry, Watchdog, WatchdogTimings,
};
use crate::signal::{NotifyOutcome, SignalBus};
use crate::stream::{AddressError, SourceAddress};
use crate::subprocess::{LaunchRequest, Launcher, Profile, SubprocessError};

/// Errors returned by [`RelayService`] operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    InvalidAddress(#[from] AddressError),

    #[error("Failed to launch transcoder: {0}")]
    Launch(#[from] SubprocessError),

    #[error("Relay is shutting down")]
    ShuttingDown,
}

/// Result of [`RelayService::stop_recording`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// The recording's watchdog received the stop signal.
    Ack,
    /// A recording exists but the signal could not be delivered; it will
    /// still end on its idle timeout.
    Dropped,
    /// No recording is active for this address.
    NotFound,
}

impl From<NotifyOutcome> for StopOutcome {
    fn from(outcome: NotifyOutcome) -> Self {
        match outcome {
            NotifyOutcome::Delivered => Self::Ack,
            NotifyOutcome::Dropped => Self::Dropped,
            NotifyOutcome::NoSession => Self::NotFound,
        }
    }
}

/// Number of running sessions per profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveSessions {
    pub live: usize,
    pub record: usize,
}

pub struct RelayService {
    launcher: Arc<dyn Launcher>,
    timings: WatchdogTimings,
    live: SessionRegistry,
    record: SessionRegistry,
    signals: SignalBus,
    shutdown_tx: watch::Sender<bool>,
    /// Held shared by launches while they spawn a watchdog, exclusively by
    /// `shutdown` while it closes the tracker.
    spawn_gate: RwLock<()>,
    tracker: TaskTracker,
}

impl RelayService {
    pub fn new(launcher: Arc<dyn Launcher>, timings: WatchdogTimings) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        info!(
            idle_timeout = ?timings.idle_timeout,
            stop_grace = ?timings.stop_grace,
            "Relay service created"
        );
        Self {
            launcher,
            timings,
            live: SessionRegistry::new(),
            record: SessionRegistry::new(),
            signals: SignalBus::new(),
            shutdown_tx,
            spawn_gate: RwLock::new(()),
            tracker: TaskTracker::new(),
        }
    }

    /// Start or refresh the live preview of `raw`; returns its relay path.
    pub async fn play(&self, raw: &str) -> Result<String, RelayError> {
        self.acquire(Profile::Live, raw).await
    }

    /// Start or refresh a recording of `raw`; returns its relay path.
    pub async fn record(&self, raw: &str) -> Result<String, RelayError> {
        self.acquire(Profile::Record, raw).await
    }

    /// Ask the recording of `raw` to stop. Best-effort.
    pub async fn stop_recording(&self, raw: &str) -> Result<StopOutcome, RelayError> {
        let source = SourceAddress::parse(raw)?;
        let outcome = StopOutcome::from(self.signals.notify(source.key()).await);
        info!(key = %source.key(), source = %source, ?outcome, "Stop recording requested");
        Ok(outcome)
    }

    /// Stop every session and wait for all watchdogs to terminate.
    ///
    /// Requests made afterwards fail with [`RelayError::ShuttingDown`].
    pub async fn shutdown(&self) {
        {
            let _closing = self.spawn_gate.write().await;
            self.shutdown_tx.send_replace(true);
            self.tracker.close();
        }
        info!(sessions = self.tracker.len(), "Waiting for sessions to stop");
        self.tracker.wait().await;
        info!("All sessions stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub async fn active_sessions(&self) -> ActiveSessions {
        ActiveSessions {
            live: self.live.len().await,
            record: self.record.len().await,
        }
    }

    pub const fn registry(&self, profile: Profile) -> &SessionRegistry {
        match profile {
            Profile::Live => &self.live,
            Profile::Record => &self.record,
        }
    }

    pub const fn signals(&self) -> &SignalBus {
        &self.signals
    }

    async fn acquire(&self, profile: Profile, raw: &str) -> Result<String, RelayError> {
        if self.is_shutting_down() {
            return Err(RelayError::ShuttingDown);
        }

        let source = SourceAddress::parse(raw)?;
        let key = source.key();
        let acquired = self
            .registry(profile)
            .get_or_create(key, || self.launch(profile, &source))
            .await?;

        match acquired {
            Acquired::Launched { session_id } => {
                info!(%key, %session_id, %profile, source = %source, "Session launched");
            }
            Acquired::Refreshed => debug!(%key, %profile, "Session refreshed"),
            Acquired::Draining => {
                info!(%key, %profile, "Session is stopping, request not relaunched");
            }
        }
        Ok(key.relay_path())
    }

    /// Registry factory: spawn the subprocess and hand it to a new watchdog.
    ///
    /// Runs under the key's registry slot, so the watchdog cannot deregister
    /// the session before it has been inserted. The launcher does blocking
    /// process and filesystem work, so it runs on the blocking pool.
    #[allow(clippy::significant_drop_tightening)]
    async fn launch(
        &self,
        profile: Profile,
        source: &SourceAddress,
    ) -> Result<SessionEntry, RelayError> {
        if self.is_shutting_down() {
            return Err(RelayError::ShuttingDown);
        }

        let key = source.key();
        let launcher = Arc::clone(&self.launcher);
        let request_source = source.clone();
        let process = tokio::task::spawn_blocking(move || {
            launcher.launch(&LaunchRequest {
                profile,
                source: &request_source,
                key,
            })
        })
        .await
        .map_err(|e| SubprocessError::SpawnFailed {
            reason: format!("launch task failed: {e}"),
        })??;

        // A shutdown that began during the launch has already waited on the
        // tracker; the new subprocess is killed on drop instead.
        let _open = self.spawn_gate.read().await;
        if self.is_shutting_down() {
            warn!(%key, %profile, "Shutdown began during launch, discarding subprocess");
            return Err(RelayError::ShuttingDown);
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let mailbox = match profile {
            Profile::Record => Some(self.signals.register(key).await),
            Profile::Live => None,
        };

        let watchdog = Watchdog::new(
            Session {
                key,
                session_id: session_id.clone(),
                profile,
                process,
                refresh_rx,
                mailbox,
            },
            self.registry(profile).clone(),
            self.signals.clone(),
            self.shutdown_tx.subscribe(),
            self.timings,
        );
        self.tracker.spawn(watchdog.run());

        Ok(SessionEntry::new(session_id, profile, refresh_tx))
    }
}
