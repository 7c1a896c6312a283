//! Server-sent events endpoint for live reload.
//!
//! Each connection subscribes to the hub and turns the subscription into an
//! event stream: `reload` events for change signals, interleaved with
//! `heartbeat` events so clients notice a dead server.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use cphttp_watch::ChangeSignal;
use serde::Serialize;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::hub::SubscriberHandle;
use crate::error::ServerError;
use crate::state::AppState;

/// Payload of a `reload` event.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub(crate) struct ReloadEvent {
    #[serde(rename = "type")]
    pub(crate) event_type: &'static str,
    /// Changed paths, as URL paths when under the served directory.
    pub(crate) paths: Vec<String>,
}

impl ReloadEvent {
    pub(crate) fn from_signal(signal: &ChangeSignal, directory: &Path) -> Self {
        Self {
            event_type: "reload",
            paths: signal
                .paths()
                .map(|path| display_path(path, directory))
                .collect(),
        }
    }
}

/// Render `path` as a URL path if it lives under `directory`.
fn display_path(path: &Path, directory: &Path) -> String {
    match path.strip_prefix(directory) {
        Ok(relative) => {
            let segments: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect();
            format!("/{}", segments.join("/"))
        }
        Err(_) => path.display().to_string(),
    }
}

/// Handle `GET /heartBeat`.
pub(crate) async fn sse_handler(State(state): State<Arc<AppState>>) -> Response {
    let handle = match state.hub.subscribe().await {
        Ok(handle) => handle,
        Err(_) => return ServerError::HubClosed.into_response(),
    };
    tracing::debug!(subscriber = %handle.id(), "Event stream opened");

    let mut heartbeat =
        tokio::time::interval_at(Instant::now() + state.heartbeat, state.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let stream = EventStream {
        handle,
        heartbeat,
        beats: 0,
        directory: state.directory.clone(),
    };

    Sse::new(futures::stream::unfold(stream, next_event)).into_response()
}

struct EventStream {
    handle: SubscriberHandle,
    heartbeat: Interval,
    beats: u64,
    directory: PathBuf,
}

/// Produce the next SSE event, or end the stream once the hub drops us.
async fn next_event(mut stream: EventStream) -> Option<(Result<Event, axum::Error>, EventStream)> {
    let event = tokio::select! {
        signal = stream.handle.recv() => {
            let Some(signal) = signal else {
                tracing::debug!(subscriber = %stream.handle.id(), "Event stream closed by hub");
                return None;
            };
            Event::default()
                .event("reload")
                .json_data(ReloadEvent::from_signal(&signal, &stream.directory))
        }
        _ = stream.heartbeat.tick() => {
            stream.beats += 1;
            Ok(Event::default().event("heartbeat").data(stream.beats.to_string()))
        }
    };
    Some((event, stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cphttp_watch::ChangeKind;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn signal(paths: &[&str]) -> ChangeSignal {
        let changes: BTreeMap<_, _> = paths
            .iter()
            .map(|p| (PathBuf::from(p), ChangeKind::Modified))
            .collect();
        let count = changes.len();
        ChangeSignal::new(changes, count)
    }

    #[test]
    fn test_reload_event_uses_url_paths() {
        let event = ReloadEvent::from_signal(
            &signal(&["/srv/html/index.html", "/srv/html/css/site.css"]),
            Path::new("/srv/html"),
        );

        assert_eq!(event.paths, vec!["/css/site.css", "/index.html"]);
    }

    #[test]
    fn test_reload_event_keeps_outside_paths() {
        let event =
            ReloadEvent::from_signal(&signal(&["/srv/templates/base.j2"]), Path::new("/srv/html"));

        assert_eq!(event.paths, vec!["/srv/templates/base.j2"]);
    }

    #[test]
    fn test_reload_event_serialization() {
        let event = ReloadEvent::from_signal(&signal(&["/srv/html/a.html"]), Path::new("/srv/html"));

        let json = serde_json::to_string(&event).unwrap();

        assert_eq!(json, r#"{"type":"reload","paths":["/a.html"]}"#);
    }

    #[test]
    fn test_display_path_for_directory_itself() {
        assert_eq!(display_path(Path::new("/srv/html"), Path::new("/srv/html")), "/");
    }
}
