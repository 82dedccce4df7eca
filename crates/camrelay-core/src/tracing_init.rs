//! Logging setup for the camrelay binaries.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Crates whose events the configured level applies to.
const CAMRELAY_TARGETS: [&str; 2] = ["camrelay_daemon", "camrelay_core"];

/// Filter directives applying `level` to every camrelay crate, e.g.
/// `camrelay_daemon=debug,camrelay_core=debug`.
pub fn default_filter(level: &str) -> String {
    CAMRELAY_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, replaces the filter built from `log_level`.
/// With `log_json` each event is one JSON line, which keeps the `key`,
/// `session_id` and `profile` fields machine-readable for aggregation.
pub fn init_tracing(log_level: &str, log_json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));
    let registry = tracing_subscriber::registry().with(env_filter);
    if log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}
