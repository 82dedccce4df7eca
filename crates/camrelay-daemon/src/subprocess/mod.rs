//! Transcoder subprocess launching and control.

pub mod launcher;
pub mod process;

pub use launcher::{FfmpegLauncher, LaunchRequest, Launcher, Profile};
pub use process::{ExitOutcome, Subprocess};

use std::path::PathBuf;

/// Errors from subprocess operations.
#[derive(Debug, thiserror::Error)]
pub enum SubprocessError {
    #[error("Failed to spawn subprocess: {reason}")]
    SpawnFailed { reason: String },

    #[error("Failed to open subprocess control stream")]
    ControlUnavailable,

    #[error("Failed to prepare output {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
