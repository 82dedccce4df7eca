//! camrelay daemon
//!
//! Serves the stream HTTP API and supervises ffmpeg subprocesses that relay
//! or record RTSP camera streams.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use camrelay_core::config::load_config;
use camrelay_daemon::http::build_router;
use camrelay_daemon::service::RelayService;
use camrelay_daemon::session::WatchdogTimings;
use camrelay_daemon::subprocess::FfmpegLauncher;

#[derive(Parser, Debug)]
#[command(name = "camrelay-daemon")]
#[command(version, about = "camrelay daemon - RTSP relay and recording supervisor")]
struct Args {
    /// JSON config file (defaults to ~/.config/camrelay/settings.json when present)
    #[arg(long, env = "CAMRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP bind address
    #[arg(long, env = "CAMRELAY_ADDR")]
    addr: Option<SocketAddr>,

    /// Path to the `ffmpeg` binary
    #[arg(long)]
    ffmpeg_bin: Option<PathBuf>,

    /// Root directory for recordings
    #[arg(long)]
    record_root: Option<PathBuf>,

    /// Seconds without a refresh before a session is stopped
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Seconds to wait for a graceful subprocess exit before SIGKILL
    #[arg(long)]
    stop_grace: Option<u64>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "CAMRELAY_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(bin) = args.ffmpeg_bin {
        config.relay.ffmpeg_bin = bin;
    }
    if let Some(root) = args.record_root {
        config.relay.record_root = root;
    }
    if let Some(secs) = args.idle_timeout {
        config.watchdog.idle_timeout_secs = secs;
    }
    if let Some(secs) = args.stop_grace {
        config.watchdog.stop_grace_secs = secs;
    }
    if let Some(level) = args.log_level {
        config.server.log_level = level;
    }

    camrelay_core::tracing_init::init_tracing(&config.server.log_level, args.log_json);

    let addr = match args.addr {
        Some(addr) => addr,
        None => config
            .server
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address {}", config.server.listen_addr))?,
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %addr,
        ffmpeg = %config.relay.ffmpeg_bin.display(),
        ingest_port = config.relay.ingest_port,
        record_root = %config.relay.record_root.display(),
        "Starting camrelay-daemon"
    );

    let launcher = Arc::new(FfmpegLauncher::new(config.relay.clone()));
    let service = Arc::new(RelayService::new(
        launcher,
        WatchdogTimings::from(&config.watchdog),
    ));
    let app = build_router(Arc::clone(&service));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // `true` unsets $NOTIFY_SOCKET so ffmpeg children never see it.
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    info!(addr = %addr, "HTTP server ready");

    let shutdown_signal = async move {
        #[cfg(unix)]
        let sigterm_future = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_future = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
            }
            _ = sigterm_future => {
                info!("Received SIGTERM shutdown signal");
            }
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    service.shutdown().await;
    info!("Daemon stopped");
    Ok(())
}
