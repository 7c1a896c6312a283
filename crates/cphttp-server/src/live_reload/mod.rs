//! Live reload system.
//!
//! Change signals from the watch pipeline are broadcast through the
//! [`NotificationHub`] to every connected `/heartBeat` event stream.

mod hub;
mod sse;

use cphttp_watch::ChangeSignal;
use tokio::sync::mpsc;

pub use hub::{HubClosed, HubConfig, NotificationHub, SubscriberHandle, SubscriberId};
pub(crate) use sse::sse_handler;

/// Reload client script served inline in HTML pages.
pub(crate) const RELOADER_JS: &str = include_str!("reloader.js");

/// Forward debounced signals into the hub until the watch pipeline stops.
pub(crate) async fn forward_signals(mut signals: mpsc::Receiver<ChangeSignal>, hub: NotificationHub) {
    while let Some(signal) = signals.recv().await {
        tracing::debug!(
            paths = signal.changes().len(),
            events = signal.event_count(),
            "Change signal received"
        );
        hub.broadcast(signal);
    }
    tracing::debug!("Watch pipeline stopped");
}
