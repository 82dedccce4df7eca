//! camrelay daemon library
//!
//! Supervises one ffmpeg subprocess per camera stream and profile:
//! - Source address normalization and stable stream keys
//! - Transcoder launching for live preview and segmented recording
//! - Per-session watchdogs with idle timeout and graceful stop
//! - Best-effort external stop signals
//! - HTTP front end

pub mod http;
pub mod service;
pub mod session;
pub mod signal;
pub mod stream;
pub mod subprocess;
