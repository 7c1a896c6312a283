//! Watch error types.

/// Error starting the watch pipeline.
///
/// Only setup failures are errors. Per-path problems at runtime (missing
/// targets, permission denied) are logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The notify backend could not be created.
    #[error("Failed to create filesystem watcher: {0}")]
    Backend(#[from] notify::Error),

    /// An ignore pattern is not a valid glob.
    #[error("Invalid ignore pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Parse error.
        source: glob::PatternError,
    },
}
