//! Static file serving.
//!
//! Files come from the served directory through [`ServeDir`], which handles
//! content types, directory `index.html`, trailing-slash redirects and range
//! requests. HTML pages requested with `GET` or `HEAD` are read directly
//! instead so the reload client can be injected.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderValue, Method, Request};
use axum::response::{Html, IntoResponse, Response};
use percent_encoding::percent_decode_str;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::live_reload::RELOADER_JS;
use crate::state::AppState;

/// Fallback handler for everything that is not a live reload route.
pub(crate) async fn serve(State(state): State<Arc<AppState>>, req: Request<Body>) -> Response {
    if state.inject_reloader
        && (req.method() == Method::GET || req.method() == Method::HEAD)
        && let Some(page) = html_page(&state.directory, req.uri().path()).await
    {
        match tokio::fs::read_to_string(&page).await {
            Ok(content) => return page_response(req.method(), inject_reloader(&content)),
            Err(e) => {
                tracing::debug!(path = %page.display(), error = %e, "Serving page without reloader");
            }
        }
    }

    match ServeDir::new(&state.directory).oneshot(req).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

/// Respond with an injected page. `HEAD` gets the headers `GET` would.
fn page_response(method: &Method, page: String) -> Response {
    let length = page.len();
    let mut response = Html(page).into_response();
    if method == Method::HEAD {
        *response.body_mut() = Body::empty();
        response
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from(length));
    }
    response
}

/// Map a request path to an HTML file under `directory`.
///
/// Directory requests with a trailing slash map to their `index.html`.
/// Returns `None` for anything else, including paths that try to leave the
/// directory, so [`ServeDir`] answers them.
async fn html_page(directory: &Path, uri_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(uri_path).decode_utf8().ok()?;

    let mut path = directory.to_path_buf();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s if s.contains('\\') || Path::new(s).has_root() => return None,
            s => path.push(s),
        }
    }

    let metadata = tokio::fs::metadata(&path).await.ok()?;
    if metadata.is_dir() {
        if !decoded.ends_with('/') {
            return None;
        }
        path.push("index.html");
        if !tokio::fs::metadata(&path).await.ok()?.is_file() {
            return None;
        }
    } else if !metadata.is_file() {
        return None;
    }

    is_html(&path).then_some(path)
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"))
}

/// Insert the reload client before `</head>`, falling back to `</body>`,
/// then to the end of the document.
pub(crate) fn inject_reloader(html: &str) -> String {
    let script = format!("<script>\n{RELOADER_JS}</script>\n");
    let lowered = html.to_ascii_lowercase();

    let position = lowered
        .find("</head>")
        .or_else(|| lowered.find("</body>"))
        .unwrap_or(html.len());

    let mut injected = String::with_capacity(html.len() + script.len());
    injected.push_str(&html[..position]);
    injected.push_str(&script);
    injected.push_str(&html[position..]);
    injected
}
