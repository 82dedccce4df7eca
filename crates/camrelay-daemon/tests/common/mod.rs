//! Shared fixtures for daemon integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::process::Command;

use camrelay_daemon::service::RelayService;
use camrelay_daemon::session::WatchdogTimings;
use camrelay_daemon::subprocess::{LaunchRequest, Launcher, Profile, Subprocess, SubprocessError};

/// Exits 0 after reading one control byte, as ffmpeg does on `q`.
pub const QUITS_ON_BYTE: &str = "head -c 1 >/dev/null";
/// Never reads its control stream.
pub const IGNORES_QUIT: &str = "exec sleep 30";

/// Stand-in for ffmpeg that runs a shell script and counts launches.
pub struct ShellLauncher {
    program: PathBuf,
    script: String,
    /// Normalized address whose launches block for the given delay.
    slow: Option<(String, Duration)>,
    launches: AtomicUsize,
}

impl ShellLauncher {
    pub fn new(script: &str) -> Self {
        Self {
            program: PathBuf::from("sh"),
            script: script.to_string(),
            slow: None,
            launches: AtomicUsize::new(0),
        }
    }

    /// Like [`ShellLauncher::new`], but launching `normalized` blocks for `delay`.
    pub fn slow_for(script: &str, normalized: &str, delay: Duration) -> Self {
        Self {
            slow: Some((normalized.to_string(), delay)),
            ..Self::new(script)
        }
    }

    /// A launcher whose binary does not exist.
    pub fn missing_binary() -> Self {
        Self {
            program: PathBuf::from("/nonexistent/ffmpeg"),
            script: String::new(),
            slow: None,
            launches: AtomicUsize::new(0),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl Launcher for ShellLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<Subprocess, SubprocessError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if let Some((normalized, delay)) = &self.slow
            && request.source.normalized() == normalized.as_str()
        {
            std::thread::sleep(*delay);
        }
        let mut cmd = Command::new(&self.program);
        cmd.arg("-c").arg(&self.script);
        Subprocess::spawn(cmd)
    }
}

pub fn timings(idle_ms: u64, grace_ms: u64) -> WatchdogTimings {
    WatchdogTimings {
        idle_timeout: Duration::from_millis(idle_ms),
        stop_grace: Duration::from_millis(grace_ms),
    }
}

/// Service backed by a shared test launcher.
pub fn service(launcher: &Arc<ShellLauncher>, timings: WatchdogTimings) -> RelayService {
    RelayService::new(Arc::clone(launcher) as Arc<dyn Launcher>, timings)
}

/// Wait up to five seconds for every `profile` session to terminate.
pub async fn drained(svc: &RelayService, profile: Profile) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if svc.registry(profile).is_empty().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Relay path the service must return for a normalized address.
pub fn expected_path(normalized: &str) -> String {
    let key = uuid::Uuid::new_v3(&uuid::Uuid::NAMESPACE_URL, normalized.as_bytes());
    format!("/stream/live/{key}")
}
