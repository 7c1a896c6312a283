//! Access logging.
//!
//! Emits one event per request on the [`ACCESS_LOG_TARGET`] target so the
//! subscriber can route it to the access log sink.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};
use axum::middleware::Next;
use axum::response::Response;
use tokio::time::Instant;

/// Tracing target for access log events.
pub const ACCESS_LOG_TARGET: &str = "cphttp::access";

/// Log method, path, status and latency of each request.
pub(crate) async fn access_log(req: Request, next: Next) -> Response {
    let client = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "-".to_owned(), |ConnectInfo(addr)| addr.to_string());
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();
    let started = Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        target: ACCESS_LOG_TARGET,
        client = %client,
        method = %method,
        uri = %uri,
        version = ?version,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis(),
        "request"
    );

    response
}
