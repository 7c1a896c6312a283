//! Log routing.
//!
//! Access events (target [`ACCESS_LOG_TARGET`]) go to the access log sink;
//! everything else goes to the error log sink. Each sink is stdout (`-`) or
//! a file opened for appending.
//!
//! The configured level applies to both sinks, so `--loglevel ERROR` also
//! silences access lines. `RUST_LOG` takes precedence over it for the error
//! log:
//! ```bash
//! RUST_LOG=cphttp_watch=trace cphttp -w html
//! ```

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use cphttp_config::{LoggingConfig, STDOUT_SINK};
use cphttp_server::ACCESS_LOG_TARGET;
use tracing_subscriber::filter::{LevelFilter, filter_fn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::CliError;

/// Install the global subscriber.
pub(crate) fn init(config: &LoggingConfig) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level_directive()));

    let access_layer = tracing_subscriber::fmt::layer()
        .with_writer(sink(&config.access_log)?)
        .with_ansi(is_stdout(&config.access_log))
        .with_target(false)
        .with_filter(filter_fn(|meta| meta.target() == ACCESS_LOG_TARGET))
        .with_filter(access_level(config));

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(sink(&config.error_log)?)
        .with_ansi(is_stdout(&config.error_log))
        .with_filter(filter_fn(|meta| meta.target() != ACCESS_LOG_TARGET))
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(access_layer)
        .with(error_layer)
        .try_init()
        .map_err(|e| CliError::Logging(e.to_string()))
}

/// Level filter for the access log.
fn access_level(config: &LoggingConfig) -> LevelFilter {
    config
        .level_directive()
        .parse()
        .unwrap_or(LevelFilter::INFO)
}

fn is_stdout(target: &str) -> bool {
    target == STDOUT_SINK
}

/// Open a log sink.
fn sink(target: &str) -> Result<BoxMakeWriter, CliError> {
    if is_stdout(target) {
        return Ok(BoxMakeWriter::new(std::io::stdout));
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(target)
        .map_err(|source| CliError::LogFile {
            path: PathBuf::from(target),
            source,
        })?;
    Ok(BoxMakeWriter::new(Mutex::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tracing_subscriber::fmt::MakeWriter;

    #[test]
    fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        std::fs::write(&path, "existing\n").unwrap();

        let sink = sink(path.to_str().unwrap()).unwrap();
        sink.make_writer().write_all(b"appended\n").unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "existing\nappended\n"
        );
    }

    #[test]
    fn test_unopenable_sink_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing/dir/error.log");

        let err = sink(path.to_str().unwrap()).unwrap_err();

        assert!(matches!(err, CliError::LogFile { .. }));
    }

    #[test]
    fn test_access_level_follows_configured_level() {
        let error_only = LoggingConfig {
            level: "ERROR".to_owned(),
            ..LoggingConfig::default()
        };
        let verbose = LoggingConfig {
            level: "ERROR".to_owned(),
            verbose: true,
            ..LoggingConfig::default()
        };

        assert_eq!(access_level(&error_only), LevelFilter::ERROR);
        assert_eq!(access_level(&LoggingConfig::default()), LevelFilter::INFO);
        assert_eq!(access_level(&verbose), LevelFilter::DEBUG);
    }

    #[test]
    fn test_dash_is_stdout() {
        assert!(is_stdout("-"));
        assert!(!is_stdout("access.log"));
    }
}
