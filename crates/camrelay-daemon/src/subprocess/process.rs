//! Handle to a running transcoder subprocess.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, warn};

use super::SubprocessError;

/// Byte that asks ffmpeg to finish the current segment and exit.
pub const QUIT_BYTE: u8 = b'q';

/// A spawned subprocess plus its control-input stream.
///
/// The control stream is the child's stdin; only the owning watchdog writes
/// to it.
#[derive(Debug)]
pub struct Subprocess {
    child: Child,
    control: Option<ChildStdin>,
    pid: Option<u32>,
}

/// How a subprocess ended.
#[derive(Debug)]
pub enum ExitOutcome {
    /// The process exited on its own or after the quit byte.
    Exited(ExitStatus),
    /// The grace period expired and the process was killed.
    Killed(Option<ExitStatus>),
    /// Waiting on the process failed.
    WaitFailed(String),
}

impl ExitOutcome {
    /// Whether the process exited cleanly without being killed.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Exited(status) if status.success())
    }
}

impl Subprocess {
    /// Spawn `cmd` with a piped stdin as its control stream.
    ///
    /// The child is killed if the handle is dropped without being reaped.
    pub fn spawn(mut cmd: Command) -> Result<Self, SubprocessError> {
        cmd.stdin(Stdio::piped()).kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| SubprocessError::SpawnFailed {
            reason: e.to_string(),
        })?;

        let Some(control) = child.stdin.take() else {
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Failed to kill subprocess without control stream");
            }
            return Err(SubprocessError::ControlUnavailable);
        };

        let pid = child.id();
        Ok(Self {
            child,
            control: Some(control),
            pid,
        })
    }

    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write the quit byte to the control stream.
    pub async fn request_quit(&mut self) -> std::io::Result<()> {
        let control = self.control.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "control stream closed")
        })?;
        control.write_all(&[QUIT_BYTE]).await?;
        control.flush().await
    }

    /// Wait for the process to exit. Cancel-safe.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Wait up to `grace` for the process to exit, then kill it.
    pub async fn wait_with_grace(&mut self, grace: Duration) -> ExitOutcome {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => ExitOutcome::Exited(status),
            Ok(Err(e)) => {
                warn!(pid = ?self.pid, error = %e, "Error waiting for subprocess, killing");
                if let Err(e) = self.child.kill().await {
                    warn!(pid = ?self.pid, error = %e, "Failed to kill subprocess");
                }
                ExitOutcome::WaitFailed(e.to_string())
            }
            Err(_) => {
                warn!(pid = ?self.pid, ?grace, "Subprocess ignored quit request, killing");
                if let Err(e) = self.child.kill().await {
                    warn!(pid = ?self.pid, error = %e, "Failed to kill subprocess");
                }
                ExitOutcome::Killed(self.child.try_wait().ok().flatten())
            }
        }
    }

    /// Drop the control stream; the child sees EOF on stdin.
    pub fn close_control(&mut self) {
        if self.control.take().is_some() {
            debug!(pid = ?self.pid, "Control stream closed");
        }
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::subprocess::testing;

    #[tokio::test]
    async fn quit_byte_stops_cooperative_process() {
        let mut process = testing::quits_on_byte();
        assert!(process.pid().is_some());

        process.request_quit().await.unwrap();
        let outcome = process.wait_with_grace(Duration::from_secs(5)).await;
        assert!(outcome.is_clean(), "unexpected outcome: {outcome:?}");
    }

    #[tokio::test]
    async fn stubborn_process_is_killed_after_grace() {
        let mut process = testing::ignores_quit();

        process.request_quit().await.unwrap();
        let outcome = process.wait_with_grace(Duration::from_millis(200)).await;
        assert!(matches!(outcome, ExitOutcome::Killed(_)), "got {outcome:?}");
    }

    #[tokio::test]
    async fn closing_control_stream_is_eof() {
        let mut process = testing::quits_on_byte();
        process.close_control();
        let outcome = process.wait_with_grace(Duration::from_secs(5)).await;
        assert!(outcome.is_clean());
        assert!(process.request_quit().await.is_err());
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let err = Subprocess::spawn(Command::new("/nonexistent/camrelay-ffmpeg")).unwrap_err();
        assert!(matches!(err, SubprocessError::SpawnFailed { .. }));
    }
}
