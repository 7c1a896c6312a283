//! Error types for the HTTP server.

use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Served directory does not exist or is not a directory.
    #[error("Directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),

    /// Listening socket could not be bound.
    #[error("Cannot bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem watcher could not be started.
    #[error("Failed to start file watcher: {0}")]
    Watch(#[from] cphttp_watch::WatchError),

    /// Notification hub has stopped.
    #[error("Notification hub is closed")]
    HubClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::HubClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, axum::Json(json!({"error": self.to_string()}))).into_response()
    }
}
