//! Configuration resolution for camrelay.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Config file (explicit path, or ~/.config/camrelay/settings.json)
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by the daemon binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable selecting the ingest port for live-preview relaying.
pub const INGEST_PORT_ENV: &str = "RTSP_PORT";

/// Environment variable overriding the session idle timeout, in seconds.
pub const IDLE_TIMEOUT_ENV: &str = "CAMRELAY_IDLE_TIMEOUT";

/// Complete camrelay configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Transcoder invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Path to the `ffmpeg` binary.
    pub ffmpeg_bin: PathBuf,
    /// Host of the ingestion endpoint that live-preview output is pushed to.
    pub ingest_host: String,
    /// Port of the ingestion endpoint.
    pub ingest_port: u16,
    /// Root directory for recordings; dated subdirectories are created below it.
    pub record_root: PathBuf,
    /// Duration of each recorded segment file.
    pub segment_secs: u64,
    /// Source read timeout handed to the transcoder.
    pub read_timeout_secs: u64,
    /// Output frame size of the live preview.
    pub preview_size: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ingest_host: "127.0.0.1".to_string(),
            ingest_port: 3000,
            record_root: PathBuf::from("recordings"),
            segment_secs: 60,
            read_timeout_secs: 5,
            preview_size: "960x540".to_string(),
        }
    }
}

/// Session supervision timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// A session with no refresh or stop event for this long is torn down.
    pub idle_timeout_secs: u64,
    /// How long a subprocess gets to exit after the quit byte before it is killed.
    pub stop_grace_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60,
            stop_grace_secs: 10,
        }
    }
}

impl WatchdogConfig {
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub const fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// HTTP front end settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit `path` must exist; the global default path is only read when present.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(global) if global.exists() => load_config_file(&global)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("camrelay").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply `RTSP_PORT` and `CAMRELAY_*` overrides. A numeric override that
/// does not parse is a config error, not a silent fallback.
fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(val) = var(INGEST_PORT_ENV) {
        config.relay.ingest_port = parse_env(INGEST_PORT_ENV, &val)?;
    }
    if let Some(val) = var("CAMRELAY_FFMPEG_BIN") {
        config.relay.ffmpeg_bin = PathBuf::from(val);
    }
    if let Some(val) = var("CAMRELAY_RECORD_ROOT") {
        config.relay.record_root = PathBuf::from(val);
    }
    if let Some(val) = var(IDLE_TIMEOUT_ENV) {
        config.watchdog.idle_timeout_secs = parse_env(IDLE_TIMEOUT_ENV, &val)?;
    }
    if let Some(val) = var("CAMRELAY_LOG_LEVEL") {
        config.server.log_level = val;
    }
    Ok(())
}

fn parse_env<T>(name: &str, val: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    val.trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {name} value {val:?}: {e}")))
}
