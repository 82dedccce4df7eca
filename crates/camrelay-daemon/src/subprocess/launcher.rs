//! ffmpeg launch profiles.
//!
//! Builds the ffmpeg command line for a profile and spawns it with a control
//! stream attached. Launching never blocks on subprocess I/O.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use camrelay_core::config::RelayConfig;
use chrono::NaiveDate;
use tokio::process::Command;
use tracing::{debug, info};

use super::{Subprocess, SubprocessError};
use crate::stream::{SourceAddress, StreamKey};

/// What a subprocess produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// Low-resolution, audio-free MPEG-1 stream pushed to the ingest endpoint.
    Live,
    /// Stream-copied, fixed-duration segment files on disk.
    Record,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Record => write!(f, "record"),
        }
    }
}

/// Everything a launcher needs to start one session's subprocess.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    pub profile: Profile,
    pub source: &'a SourceAddress,
    pub key: StreamKey,
}

/// Starts transcoder subprocesses.
pub trait Launcher: Send + Sync {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<Subprocess, SubprocessError>;
}

/// Launches the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    config: RelayConfig,
}

impl FfmpegLauncher {
    pub const fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// URL the live-preview output is pushed to.
    pub fn ingest_url(&self, key: StreamKey) -> String {
        format!(
            "http://{}:{}/stream/upload/{key}",
            self.config.ingest_host, self.config.ingest_port
        )
    }

    /// Directory a recording started on `date` writes its segments into.
    pub fn record_dir(&self, key: StreamKey, date: NaiveDate) -> PathBuf {
        self.config
            .record_root
            .join(date.format("%Y%m%d").to_string())
            .join(key.to_string())
    }

    fn read_timeout_micros(&self) -> String {
        self.config
            .read_timeout_secs
            .saturating_mul(1_000_000)
            .to_string()
    }

    pub fn live_args(&self, source: &SourceAddress, key: StreamKey) -> Vec<String> {
        let mut args: Vec<String> = ["-rtsp_transport", "tcp", "-re", "-timeout"]
            .map(String::from)
            .to_vec();
        args.push(self.read_timeout_micros());
        args.extend(["-i".to_string(), source.as_str().to_string()]);
        args.extend(
            [
                "-q", "5", "-f", "mpegts", "-fflags", "nobuffer", "-c:v", "mpeg1video", "-an",
                "-s",
            ]
            .map(String::from),
        );
        args.push(self.config.preview_size.clone());
        args.push(self.ingest_url(key));
        args
    }

    pub fn record_args(&self, source: &SourceAddress, dir: &Path) -> Vec<String> {
        let mut args: Vec<String> = ["-fflags", "genpts", "-rtsp_transport", "tcp", "-timeout"]
            .map(String::from)
            .to_vec();
        args.push(self.read_timeout_micros());
        args.extend(["-i".to_string(), source.as_str().to_string()]);
        args.extend(["-c", "copy", "-f", "segment", "-segment_time"].map(String::from));
        args.push(self.config.segment_secs.to_string());
        args.extend(
            [
                "-segment_format",
                "mp4",
                "-reset_timestamps",
                "1",
                "-strftime",
                "1",
            ]
            .map(String::from),
        );
        args.push(dir.join("%Y%m%d-%H%M%S.mp4").display().to_string());
        args
    }

    fn live_command(&self, source: &SourceAddress, key: StreamKey) -> Command {
        let mut cmd = Command::new(&self.config.ffmpeg_bin);
        cmd.args(self.live_args(source, key))
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }

    fn record_command(
        &self,
        source: &SourceAddress,
        key: StreamKey,
    ) -> Result<Command, SubprocessError> {
        let dir = self.record_dir(key, chrono::Local::now().date_naive());
        std::fs::create_dir_all(&dir).map_err(|e| SubprocessError::OutputDir {
            path: dir.clone(),
            source: e,
        })?;

        let log_path = dir.join("ffmpeg.log");
        let output_err = |e| SubprocessError::OutputDir {
            path: log_path.clone(),
            source: e,
        };
        let log = File::create(&log_path).map_err(output_err)?;
        let log_err = log.try_clone().map_err(output_err)?;

        let mut cmd = Command::new(&self.config.ffmpeg_bin);
        cmd.args(self.record_args(source, &dir))
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        Ok(cmd)
    }
}

impl Launcher for FfmpegLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<Subprocess, SubprocessError> {
        let cmd = match request.profile {
            Profile::Live => self.live_command(request.source, request.key),
            Profile::Record => self.record_command(request.source, request.key)?,
        };
        debug!(cmd = ?cmd.as_std(), "ffmpeg command");

        let process = Subprocess::spawn(cmd)?;
        info!(
            key = %request.key,
            profile = %request.profile,
            pid = ?process.pid(),
            source = %request.source,
            "Started ffmpeg"
        );
        Ok(process)
    }
}
