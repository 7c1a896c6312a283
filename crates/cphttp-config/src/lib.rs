//! Configuration management for cphttp.
//!
//! Parses optional `cphttp.toml` files with serde and provides auto-discovery
//! of config files in parent directories. Every setting has a default, so the
//! server runs without any config file at all.
//!
//! CLI settings are applied during load via [`CliSettings`] and take
//! precedence over file values.
//!
//! ## Environment Variable Expansion
//!
//! `server.host` supports `${VAR}` and `${VAR:-default}`.
//!
//! ## Example
//!
//! ```toml
//! [server]
//! host = "localhost"
//! port = 8008
//!
//! [static_files]
//! directory = "html"
//!
//! [live_reload]
//! watch = ["html", "src/styles"]
//! debounce_ms = 300
//! max_wait_ms = 2000
//! ```

mod expand;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// CLI settings that override configuration file values.
///
/// Only non-None (and, for `watch`, non-empty) values override the loaded
/// config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override server host.
    pub host: Option<String>,
    /// Override server port.
    pub port: Option<u16>,
    /// Override the static file directory.
    pub directory: Option<PathBuf>,
    /// Replace the watch targets.
    pub watch: Vec<PathBuf>,
    /// Override the debounce quiet window.
    pub debounce_ms: Option<u64>,
    /// Override the maximum coalescing duration.
    pub max_wait_ms: Option<u64>,
    /// Force the polling watcher backend.
    pub poll: Option<bool>,
    /// Override verbose logging.
    pub verbose: Option<bool>,
    /// Override the access log sink.
    pub access_log: Option<String>,
    /// Override the error log sink.
    pub error_log: Option<String>,
    /// Override the log level.
    pub log_level: Option<String>,
}

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "cphttp.toml";

/// Log sink value meaning "standard output".
pub const STDOUT_SINK: &str = "-";

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Static file configuration (paths are relative strings from TOML).
    static_files: StaticFilesConfigRaw,
    /// Live reload configuration (paths are relative strings from TOML).
    live_reload: LiveReloadConfigRaw,
    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Resolved static file configuration (set after loading).
    #[serde(skip)]
    pub static_resolved: StaticFilesConfig,
    /// Resolved live reload configuration (set after loading).
    #[serde(skip)]
    pub live_reload_resolved: LiveReloadConfig,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_with_base(Path::new("."))
    }
}

/// Server configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 8008,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct StaticFilesConfigRaw {
    directory: Option<String>,
    inject_reloader: Option<bool>,
}

/// Resolved static file configuration.
#[derive(Debug)]
pub struct StaticFilesConfig {
    /// Directory to serve.
    pub directory: PathBuf,
    /// Inject the reload client script into HTML responses.
    pub inject_reloader: bool,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("html"),
            inject_reloader: true,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct LiveReloadConfigRaw {
    watch: Vec<String>,
    debounce_ms: Option<u64>,
    max_wait_ms: Option<u64>,
    max_depth: Option<usize>,
    poll: Option<bool>,
    poll_interval_ms: Option<u64>,
    ignore_patterns: Option<Vec<String>>,
    heartbeat_secs: Option<u64>,
    delivery_timeout_ms: Option<u64>,
    queue_capacity: Option<usize>,
}

/// Resolved live reload configuration.
#[derive(Debug, Clone)]
pub struct LiveReloadConfig {
    /// Files and directories to watch.
    pub watch: Vec<PathBuf>,
    /// Quiet window that must pass without events before a signal is sent.
    pub debounce: Duration,
    /// Upper bound on how long a burst of events may be coalesced.
    pub max_wait: Duration,
    /// Maximum directory recursion depth (`None` = unlimited).
    pub max_depth: Option<usize>,
    /// Use the polling watcher instead of OS notifications.
    pub poll: bool,
    /// Polling interval when `poll` is set.
    pub poll_interval: Duration,
    /// File name patterns whose changes are ignored.
    pub ignore_patterns: Vec<String>,
    /// Interval between heartbeat events on the subscription stream.
    pub heartbeat: Duration,
    /// How long a broadcast waits on a stalled subscriber before dropping it.
    pub delivery_timeout: Duration,
    /// Per-subscriber queue capacity.
    pub queue_capacity: usize,
}

const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_MAX_WAIT_MS: u64 = 2000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_HEARTBEAT_SECS: u64 = 2;
const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 1000;
const DEFAULT_QUEUE_CAPACITY: usize = 16;

fn default_ignore_patterns() -> Vec<String> {
    ["*.swp", "*.swx", "*~", ".#*", "4913"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

impl Default for LiveReloadConfig {
    fn default() -> Self {
        Self {
            watch: Vec::new(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            max_wait: Duration::from_millis(DEFAULT_MAX_WAIT_MS),
            max_depth: None,
            poll: false,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            ignore_patterns: default_ignore_patterns(),
            heartbeat: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            delivery_timeout: Duration::from_millis(DEFAULT_DELIVERY_TIMEOUT_MS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (`TRACE`, `DEBUG`, `INFO`, `WARNING`, `ERROR`, `CRITICAL`).
    pub level: String,
    /// Access log sink: a file path, or `-` for stdout.
    pub access_log: String,
    /// Error log sink: a file path, or `-` for stdout.
    pub error_log: String,
    /// Verbose output (forces debug level).
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_owned(),
            access_log: STDOUT_SINK.to_owned(),
            error_log: STDOUT_SINK.to_owned(),
            verbose: false,
        }
    }
}

impl LoggingConfig {
    /// Filter directive for `tracing_subscriber::EnvFilter`.
    ///
    /// Verbose mode always yields `debug`. Unknown levels fall back to `info`;
    /// [`Config::validate`] rejects them before this is reached.
    #[must_use]
    pub fn level_directive(&self) -> &'static str {
        if self.verbose {
            return "debug";
        }
        level_directive(&self.level).unwrap_or("info")
    }
}

/// Map a Python-style or tracing-style level name to a tracing directive.
fn level_directive(level: &str) -> Option<&'static str> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" | "critical" => Some("error"),
        _ => None,
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`server.host`").
        field: String,
        /// Error message (e.g., "${`CPHTTP_HOST`} not set").
        message: String,
    },
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `cphttp.toml` in current directory and parents,
    /// falling back to defaults relative to the current directory.
    ///
    /// CLI settings are applied after loading and path resolution, and the
    /// merged result is validated.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails, or
    /// the merged configuration is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(host) = &settings.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = settings.port {
            self.server.port = port;
        }
        if let Some(directory) = &settings.directory {
            self.static_resolved.directory.clone_from(directory);
        }
        if !settings.watch.is_empty() {
            self.live_reload_resolved.watch.clone_from(&settings.watch);
        }
        if let Some(ms) = settings.debounce_ms {
            self.live_reload_resolved.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = settings.max_wait_ms {
            self.live_reload_resolved.max_wait = Duration::from_millis(ms);
        }
        if let Some(poll) = settings.poll {
            self.live_reload_resolved.poll = poll;
        }
        if let Some(verbose) = settings.verbose {
            self.logging.verbose = verbose;
        }
        if let Some(access_log) = &settings.access_log {
            self.logging.access_log.clone_from(access_log);
        }
        if let Some(error_log) = &settings.error_log {
            self.logging.error_log.clone_from(error_log);
        }
        if let Some(level) = &settings.log_level {
            self.logging.level.clone_from(level);
        }
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Create default config with paths relative to current working directory.
    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    /// Create default config with paths relative to given base directory.
    fn default_with_base(base: &Path) -> Self {
        Self {
            server: ServerConfig::default(),
            static_files: StaticFilesConfigRaw::default(),
            live_reload: LiveReloadConfigRaw::default(),
            logging: LoggingConfig::default(),
            static_resolved: StaticFilesConfig {
                directory: base.join("html"),
                inject_reloader: true,
            },
            live_reload_resolved: LiveReloadConfig::default(),
            config_path: None,
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir);
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_live_reload()?;
        self.validate_logging()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.server.host, "server.host")?;

        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port cannot be 0".to_owned(),
            ));
        }

        Ok(())
    }

    fn validate_live_reload(&self) -> Result<(), ConfigError> {
        let live_reload = &self.live_reload_resolved;

        if live_reload.debounce.is_zero() {
            return Err(ConfigError::Validation(
                "live_reload.debounce_ms must be greater than 0".to_owned(),
            ));
        }
        if live_reload.max_wait < live_reload.debounce {
            return Err(ConfigError::Validation(
                "live_reload.max_wait_ms cannot be shorter than live_reload.debounce_ms"
                    .to_owned(),
            ));
        }
        if live_reload.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "live_reload.queue_capacity must be greater than 0".to_owned(),
            ));
        }
        if live_reload.heartbeat.is_zero() {
            return Err(ConfigError::Validation(
                "live_reload.heartbeat_secs must be greater than 0".to_owned(),
            ));
        }
        if live_reload.poll_interval.is_zero() {
            return Err(ConfigError::Validation(
                "live_reload.poll_interval_ms must be greater than 0".to_owned(),
            ));
        }

        Ok(())
    }

    fn validate_logging(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.logging.access_log, "logging.access_log")?;
        require_non_empty(&self.logging.error_log, "logging.error_log")?;

        if level_directive(&self.logging.level).is_none() {
            return Err(ConfigError::Validation(format!(
                "logging.level '{}' is not a known level",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.server.host = expand::expand_env(&self.server.host, "server.host")?;
        Ok(())
    }

    /// Resolve relative paths against the config file directory and fill in
    /// defaults for unset values.
    fn resolve_paths(&mut self, config_dir: &Path) {
        self.static_resolved = StaticFilesConfig {
            directory: config_dir.join(self.static_files.directory.as_deref().unwrap_or("html")),
            inject_reloader: self.static_files.inject_reloader.unwrap_or(true),
        };

        let raw = &self.live_reload;
        let defaults = LiveReloadConfig::default();
        self.live_reload_resolved = LiveReloadConfig {
            watch: raw.watch.iter().map(|w| config_dir.join(w)).collect(),
            debounce: raw
                .debounce_ms
                .map_or(defaults.debounce, Duration::from_millis),
            max_wait: raw
                .max_wait_ms
                .map_or(defaults.max_wait, Duration::from_millis),
            max_depth: raw.max_depth,
            poll: raw.poll.unwrap_or(defaults.poll),
            poll_interval: raw
                .poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            ignore_patterns: raw
                .ignore_patterns
                .clone()
                .unwrap_or(defaults.ignore_patterns),
            heartbeat: raw
                .heartbeat_secs
                .map_or(defaults.heartbeat, Duration::from_secs),
            delivery_timeout: raw
                .delivery_timeout_ms
                .map_or(defaults.delivery_timeout, Duration::from_millis),
            queue_capacity: raw.queue_capacity.unwrap_or(defaults.queue_capacity),
        };
    }
}
