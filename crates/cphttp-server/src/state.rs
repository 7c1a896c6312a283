//! Application state.
//!
//! Shared state for all request handlers.

use std::path::PathBuf;
use std::time::Duration;

use crate::live_reload::NotificationHub;

/// Application state shared across all handlers.
pub(crate) struct AppState {
    /// Hub that `/heartBeat` streams subscribe to.
    pub(crate) hub: NotificationHub,
    /// Canonical served directory.
    pub(crate) directory: PathBuf,
    /// Inject the reload client into HTML pages.
    pub(crate) inject_reloader: bool,
    /// Interval between heartbeat events.
    pub(crate) heartbeat: Duration,
}
