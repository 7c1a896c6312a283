//! Response headers for development serving.
//!
//! Every response is marked uncacheable so a reload always fetches fresh
//! files.

use axum::http::HeaderValue;
use axum::http::header::{CACHE_CONTROL, HeaderName};
use tower_http::set_header::SetResponseHeaderLayer;

/// Create layer that adds `Cache-Control: no-store`.
pub(crate) fn no_store_layer() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(CACHE_CONTROL, HeaderValue::from_static("no-store"))
}

/// Create layer that adds X-Content-Type-Options header.
pub(crate) fn content_type_options_layer() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    )
}
