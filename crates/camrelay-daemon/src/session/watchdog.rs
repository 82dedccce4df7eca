//! Per-session supervision task.
//!
//! One watchdog owns each session's subprocess. It merges keepalive refreshes,
//! the idle timeout, external stop signals, daemon shutdown and unexpected
//! subprocess exit into a single teardown decision, then cleans up.
//!
//! ```text
//! Starting -> Running -> Stopping -> Terminated
//!                 \______________________/
//!                   (subprocess exited)
//! ```
//!
//! The idle window restarts from every refresh: a session stays up as long as
//! refreshes arrive less than `idle_timeout` apart.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::registry::SessionRegistry;
use super::types::Session;
use crate::signal::{Mailbox, SignalBus};
use crate::stream::StreamKey;
use crate::subprocess::ExitOutcome;

/// Supervision timings.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogTimings {
    /// Maximum quiet period before a session is stopped.
    pub idle_timeout: Duration,
    /// Time allowed between the quit byte and a forced kill.
    pub stop_grace: Duration,
}

impl Default for WatchdogTimings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            stop_grace: Duration::from_secs(10),
        }
    }
}

impl From<&camrelay_core::config::WatchdogConfig> for WatchdogTimings {
    fn from(config: &camrelay_core::config::WatchdogConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            stop_grace: config.stop_grace(),
        }
    }
}

/// Lifecycle state of a supervised session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Starting,
    Running,
    Stopping,
    Terminated,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No refresh or stop event within the idle window.
    IdleTimeout,
    /// An external stop signal arrived through the signal bus.
    ExternalStop,
    /// The daemon is shutting down.
    Shutdown,
    /// The registry entry was removed from outside the watchdog.
    Deregistered,
    /// The subprocess exited without being asked to.
    ProcessExited,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::IdleTimeout => "idle timeout",
            Self::ExternalStop => "external stop",
            Self::Shutdown => "shutdown",
            Self::Deregistered => "deregistered",
            Self::ProcessExited => "process exited",
        };
        f.write_str(s)
    }
}

/// Summary returned when a watchdog reaches `Terminated`.
#[derive(Debug)]
pub struct WatchdogReport {
    pub key: StreamKey,
    pub session_id: String,
    pub reason: StopReason,
    pub exit: ExitOutcome,
}

enum Event {
    Refresh,
    MailboxGone,
    End(Ending),
}

/// What ended the `Running` state.
enum Ending {
    Stop(StopReason),
    Exited(std::io::Result<std::process::ExitStatus>),
}

/// Supervisor for one session.
pub struct Watchdog {
    session: Session,
    registry: SessionRegistry,
    signals: SignalBus,
    shutdown: watch::Receiver<bool>,
    timings: WatchdogTimings,
    state: WatchdogState,
}

impl Watchdog {
    pub const fn new(
        session: Session,
        registry: SessionRegistry,
        signals: SignalBus,
        shutdown: watch::Receiver<bool>,
        timings: WatchdogTimings,
    ) -> Self {
        Self {
            session,
            registry,
            signals,
            shutdown,
            timings,
            state: WatchdogState::Starting,
        }
    }

    pub const fn state(&self) -> WatchdogState {
        self.state
    }

    /// Supervise the session until it terminates.
    pub async fn run(mut self) -> WatchdogReport {
        self.transition(WatchdogState::Running);

        let (reason, exit) = match self.wait_for_stop().await {
            Ending::Exited(Ok(status)) => (StopReason::ProcessExited, ExitOutcome::Exited(status)),
            Ending::Exited(Err(e)) => {
                (StopReason::ProcessExited, ExitOutcome::WaitFailed(e.to_string()))
            }
            Ending::Stop(reason) => {
                self.transition(WatchdogState::Stopping);
                (reason, self.stop().await)
            }
        };

        self.terminate(reason, exit).await
    }

    fn transition(&mut self, next: WatchdogState) {
        debug!(
            key = %self.session.key,
            session_id = %self.session.session_id,
            from = ?self.state,
            to = ?next,
            "Watchdog state change"
        );
        self.state = next;
    }

    /// Wait in `Running` until something ends the session.
    async fn wait_for_stop(&mut self) -> Ending {
        if *self.shutdown.borrow_and_update() {
            return Ending::Stop(StopReason::Shutdown);
        }

        let idle = tokio::time::sleep(self.timings.idle_timeout);
        tokio::pin!(idle);

        loop {
            let event = tokio::select! {
                refresh = self.session.refresh_rx.recv() => match refresh {
                    Some(()) => Event::Refresh,
                    None => Event::End(Ending::Stop(StopReason::Deregistered)),
                },
                signal = recv_signal(self.session.mailbox.as_mut()) => match signal {
                    Some(()) => Event::End(Ending::Stop(StopReason::ExternalStop)),
                    None => Event::MailboxGone,
                },
                _ = self.shutdown.changed() => Event::End(Ending::Stop(StopReason::Shutdown)),
                status = self.session.process.wait() => Event::End(Ending::Exited(status)),
                () = &mut idle => Event::End(Ending::Stop(StopReason::IdleTimeout)),
            };

            match event {
                Event::Refresh => {
                    debug!(key = %self.session.key, "Refresh");
                    idle.as_mut().reset(Instant::now() + self.timings.idle_timeout);
                }
                Event::MailboxGone => {
                    warn!(key = %self.session.key, "Stop mailbox was replaced, external stop unavailable");
                    self.session.mailbox = None;
                }
                Event::End(ending) => return ending,
            }
        }
    }

    /// `Stopping`: refuse further refreshes and signals, ask the subprocess to
    /// quit, and wait for it within the grace period.
    async fn stop(&mut self) -> ExitOutcome {
        self.session.refresh_rx.close();
        if let Some(mailbox) = self.session.mailbox.as_mut() {
            mailbox.close();
        }

        if let Err(e) = self.session.process.request_quit().await {
            warn!(key = %self.session.key, error = %e, "Failed to send quit to subprocess");
        }
        self.session
            .process
            .wait_with_grace(self.timings.stop_grace)
            .await
    }

    /// `Terminated`: deregister and release everything the session holds.
    async fn terminate(mut self, reason: StopReason, exit: ExitOutcome) -> WatchdogReport {
        let key = self.session.key;
        let session_id = self.session.session_id.clone();

        self.registry.remove_session(key, &session_id).await;
        if let Some(mailbox) = self.session.mailbox.take() {
            self.signals.release(&mailbox).await;
        }
        self.session.process.close_control();
        self.transition(WatchdogState::Terminated);

        match &exit {
            ExitOutcome::Exited(status) if status.success() => {
                info!(%key, %session_id, profile = %self.session.profile, %reason, "Session terminated");
            }
            ExitOutcome::Exited(status) => {
                warn!(%key, %session_id, profile = %self.session.profile, %reason, %status, "Subprocess exited with error");
            }
            ExitOutcome::Killed(_) => {
                warn!(%key, %session_id, profile = %self.session.profile, %reason, "Subprocess killed after grace period");
            }
            ExitOutcome::WaitFailed(e) => {
                error!(%key, %session_id, profile = %self.session.profile, %reason, error = %e, "Failed to reap subprocess");
            }
        }

        WatchdogReport {
            key,
            session_id,
            reason,
            exit,
        }
    }
}

async fn recv_signal(mailbox: Option<&mut Mailbox>) -> Option<()> {
    match mailbox {
        Some(mailbox) => mailbox.recv().await,
        None => std::future::pending().await,
    }
}
