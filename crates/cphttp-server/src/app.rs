//! Router construction.
//!
//! Builds the axum router with all routes and middleware.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;

use crate::live_reload;
use crate::middleware::{access_log, headers};
use crate::state::AppState;
use crate::static_files;

/// Path of the live reload event stream.
pub const HEARTBEAT_PATH: &str = "/heartBeat";

/// Create the application router.
///
/// # Arguments
///
/// * `state` - Shared application state
pub(crate) fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(HEARTBEAT_PATH, get(live_reload::sse_handler))
        .fallback(static_files::serve)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(access_log::access_log))
                .layer(headers::no_store_layer())
                .layer(headers::content_type_options_layer()),
        )
        .with_state(state)
}
