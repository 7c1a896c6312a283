//! HTTP server for cphttp.
//!
//! Serves a directory of static files and pushes reload notifications to
//! connected browsers when watched files change.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::path::PathBuf;
//! use cphttp_server::{ServerConfig, run_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig {
//!         directory: PathBuf::from("html"),
//!         watch: vec![PathBuf::from("html")],
//!         ..ServerConfig::default()
//!     };
//!
//!     run_server(config).await.unwrap();
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Browser ──HTTP──► axum router (cphttp-server)
//!                        │
//!                        ├─► GET /heartBeat ──► SSE stream ◄── NotificationHub
//!                        │                                          ▲
//!                        │                               forward_signals
//!                        │                                          │
//!                        │              cphttp-watch (FsWatcher ─► ChangeDebouncer)
//!                        │
//!                        └─► Static files (tower-http ServeDir + reloader injection)
//! ```

mod app;
mod error;
mod live_reload;
mod middleware;
mod state;
mod static_files;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cphttp_watch::{DebounceConfig, WatchOptions};
use state::AppState;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use app::HEARTBEAT_PATH;
pub use error::ServerError;
pub use live_reload::{HubClosed, HubConfig, NotificationHub, SubscriberHandle, SubscriberId};
pub use middleware::access_log::ACCESS_LOG_TARGET;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on (0 picks a free port).
    pub port: u16,
    /// Directory of static files to serve.
    pub directory: PathBuf,
    /// Inject the reload client into HTML pages.
    pub inject_reloader: bool,
    /// Files and directories to watch. Empty disables watching.
    pub watch: Vec<PathBuf>,
    /// Filesystem watcher options.
    pub watch_options: WatchOptions,
    /// Debounce window.
    pub debounce: DebounceConfig,
    /// Notification hub tuning.
    pub hub: HubConfig,
    /// Interval between heartbeat events on `/heartBeat`.
    pub heartbeat: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 8008,
            directory: PathBuf::from("html"),
            inject_reloader: true,
            watch: Vec::new(),
            watch_options: WatchOptions::default(),
            debounce: DebounceConfig::default(),
            hub: HubConfig::default(),
            heartbeat: Duration::from_secs(2),
        }
    }
}

/// A bound server, ready to accept connections.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    directory: PathBuf,
    listener: TcpListener,
}

impl Server {
    /// Check the served directory and bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::MissingDirectory`] if the served directory does
    /// not exist and [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let directory = config
            .directory
            .canonicalize()
            .ok()
            .filter(|dir| dir.is_dir())
            .ok_or_else(|| ServerError::MissingDirectory(config.directory.clone()))?;

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|source| ServerError::Bind {
                address: format!("{}:{}", config.host, config.port),
                source,
            })?;

        Ok(Self {
            config,
            directory,
            listener,
        })
    }

    /// Address the server is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until SIGINT, SIGTERM or SIGHUP (Ctrl-C off Unix).
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher cannot be started or serving fails.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` completes, then stop the watch pipeline and
    /// close every event stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher cannot be started or serving fails.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            config,
            directory,
            listener,
        } = self;
        let cancel = CancellationToken::new();

        let (hub, hub_task) = NotificationHub::spawn(config.hub, cancel.child_token());

        if config.watch.is_empty() {
            tracing::info!("No watch targets, live reload notifications disabled");
        } else {
            let signals = cphttp_watch::spawn_with_cancel(
                &config.watch,
                &config.watch_options,
                config.debounce,
                &cancel,
            )?;
            tokio::spawn(live_reload::forward_signals(signals, hub.clone()));
            for target in &config.watch {
                tracing::info!(path = %target.display(), "Watching");
            }
        }

        let state = Arc::new(AppState {
            hub,
            directory: directory.clone(),
            inject_reloader: config.inject_reloader,
            heartbeat: config.heartbeat,
        });
        let app = app::create_router(state);

        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, directory = %directory.display(), "Starting server");
        tracing::info!(mount = "/", directory = %directory.display(), "Mounted static files");
        tracing::info!(mount = HEARTBEAT_PATH, "Mounted live reload events");

        let stop = cancel.clone();
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            // Ends every event stream so graceful shutdown can finish
            stop.cancel();
        })
        .await;

        cancel.cancel();
        if let Err(e) = hub_task.await {
            tracing::warn!(error = %e, "Notification hub task failed");
        }
        tracing::info!("Server stopped");

        Ok(result?)
    }
}

/// Run the server until a shutdown signal arrives.
///
/// # Arguments
///
/// * `config` - Server configuration
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    Server::bind(config).await?.run().await
}

/// Wait for SIGINT, SIGTERM or SIGHUP.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut terminate), Ok(mut hangup)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    ) else {
        tracing::warn!("Failed to install signal handlers, only Ctrl-C stops the server");
        wait_for_ctrl_c().await;
        return;
    };

    let name = tokio::select! {
        () = wait_for_ctrl_c() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
    };
    tracing::info!(signal = name, "Shutdown signal received, stopping server...");
}

/// Wait for Ctrl-C.
#[cfg(not(unix))]
async fn shutdown_signal() {
    wait_for_ctrl_c().await;
    tracing::info!("Shutdown signal received, stopping server...");
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Create server configuration from cphttp config.
///
/// # Arguments
///
/// * `config` - Loaded cphttp configuration
#[must_use]
pub fn server_config_from_config(config: &cphttp_config::Config) -> ServerConfig {
    let live_reload = &config.live_reload_resolved;

    ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        directory: config.static_resolved.directory.clone(),
        inject_reloader: config.static_resolved.inject_reloader,
        watch: live_reload.watch.clone(),
        watch_options: WatchOptions {
            max_depth: live_reload.max_depth,
            poll_interval: live_reload.poll.then_some(live_reload.poll_interval),
            ignore_patterns: live_reload.ignore_patterns.clone(),
            ..WatchOptions::default()
        },
        debounce: DebounceConfig {
            quiet: live_reload.debounce,
            max_wait: live_reload.max_wait,
        },
        hub: HubConfig {
            queue_capacity: live_reload.queue_capacity,
            delivery_timeout: live_reload.delivery_timeout,
        },
        heartbeat: live_reload.heartbeat,
    }
}
