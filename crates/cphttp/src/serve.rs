//! Serve command implementation.

use std::path::PathBuf;

use clap::Args;
use cphttp_config::{CliSettings, Config};
use cphttp_server::{HEARTBEAT_PATH, Server, server_config_from_config};

use crate::error::CliError;
use crate::logging;
use crate::output::Output;

/// Server arguments.
#[derive(Args, Debug)]
pub(crate) struct ServeArgs {
    /// Path to configuration file (default: auto-discover cphttp.toml).
    #[arg(short, long, env = "CPHTTP_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind to [default: localhost].
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to bind to [default: 8008].
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory to serve [default: html].
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Enable verbose output (debug logging).
    #[arg(short, long)]
    verbose: bool,

    /// Access log file, `-` for stdout [default: -].
    #[arg(short, long = "accesslog")]
    access_log: Option<String>,

    /// Error log file, `-` for stdout [default: -].
    #[arg(short, long = "errorlog")]
    error_log: Option<String>,

    /// Log level: DEBUG, INFO, WARNING, ERROR or CRITICAL [default: INFO].
    #[arg(short, long = "loglevel")]
    log_level: Option<String>,

    /// File or directory to watch for changes (repeatable).
    #[arg(short, long)]
    watch: Vec<PathBuf>,

    /// Quiet period before a reload is sent, in milliseconds [default: 300].
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Longest a reload is delayed by continuous changes, in milliseconds
    /// [default: 2000].
    #[arg(long)]
    max_wait_ms: Option<u64>,

    /// Poll the filesystem instead of using OS notifications.
    #[arg(long)]
    poll: bool,
}

impl ServeArgs {
    /// Execute the serve command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid, logging cannot be set
    /// up, or the server fails to start.
    pub(crate) fn execute(self, output: &Output, version: &str) -> Result<(), CliError> {
        let config_path = self.config.clone();
        let config = Config::load(config_path.as_deref(), Some(&self.into_settings()))?;

        logging::init(&config.logging)?;

        if let Some(path) = &config.config_path {
            tracing::info!(path = %path.display(), "Loaded configuration");
        }

        let server_config = server_config_from_config(&config);
        let watch = server_config.watch.clone();

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(async {
            let server = Server::bind(server_config).await?;
            let addr = server.local_addr()?;

            output.highlight(&format!("cphttp v{version}"));
            output.info(&format!(
                "Serving {} at http://{addr}/",
                config.static_resolved.directory.display()
            ));
            output.info(&format!("Reload events at http://{addr}{HEARTBEAT_PATH}"));
            if watch.is_empty() {
                output.warning("No watch targets: pages will not reload (use --watch)");
            }
            for path in &watch {
                output.info(&format!("Watching {}", path.display()));
            }
            output.info("Press Ctrl-C to stop");

            server.run().await
        })?;

        output.success("Server stopped");
        Ok(())
    }

    /// Convert arguments into configuration overrides.
    fn into_settings(self) -> CliSettings {
        CliSettings {
            host: self.host,
            port: self.port,
            directory: self.directory,
            watch: self.watch,
            debounce_ms: self.debounce_ms,
            max_wait_ms: self.max_wait_ms,
            poll: self.poll.then_some(true),
            verbose: self.verbose.then_some(true),
            access_log: self.access_log,
            error_log: self.error_log,
            log_level: self.log_level,
        }
    }
}
