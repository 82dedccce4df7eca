//! Session registry and supervision.
//!
//! Each running subprocess is a session: registered under its stream key,
//! owned by exactly one watchdog task, and removed when that watchdog exits.

mod registry;
mod types;
mod watchdog;

pub use registry::{Acquired, SessionRegistry};
pub use types::{Session, SessionEntry};
pub use watchdog::{StopReason, Watchdog, WatchdogReport, WatchdogState, WatchdogTimings};
