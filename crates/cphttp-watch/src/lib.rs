//! Filesystem watching for cphttp live reload.
//!
//! The pipeline has three stages:
//!
//! ```text
//! WatchSetResolver ──► FsWatcher ──ChangeEvent──► ChangeDebouncer ──ChangeSignal──► caller
//! ```
//!
//! - [`WatchSetResolver`] expands configured targets into concrete paths
//! - [`FsWatcher`] registers them with `notify` and emits [`ChangeEvent`]s,
//!   growing and pruning the watch set as directories come and go
//! - [`ChangeDebouncer`] coalesces bursts into one [`ChangeSignal`] per window
//!
//! [`spawn`] wires the stages together on the current tokio runtime.
//!
//! # Example
//!
//! ```ignore
//! use cphttp_watch::{DebounceConfig, WatchOptions};
//!
//! let (mut signals, _handle) = cphttp_watch::spawn(
//!     &[PathBuf::from("html")],
//!     &WatchOptions::default(),
//!     DebounceConfig::default(),
//! )?;
//! while let Some(signal) = signals.recv().await {
//!     println!("{} paths changed", signal.changes().len());
//! }
//! ```

mod debouncer;
mod error;
mod event;
mod resolver;
mod watcher;

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use debouncer::{ChangeDebouncer, DebounceConfig};
pub use error::WatchError;
pub use event::{ChangeEvent, ChangeKind, ChangeSignal, WatchHandle};
pub use resolver::{ResolvedWatchSet, WatchSetResolver};
pub use watcher::{FsWatcher, WatchOptions};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// Start watching `targets` and return the debounced signal stream.
///
/// Spawns the watcher and debouncer tasks on the current tokio runtime. Both
/// stop when the returned [`WatchHandle`] is dropped.
///
/// # Errors
///
/// Returns an error if the filesystem watcher cannot be created.
pub fn spawn(
    targets: &[PathBuf],
    options: &WatchOptions,
    debounce: DebounceConfig,
) -> Result<(mpsc::Receiver<ChangeSignal>, WatchHandle), WatchError> {
    let cancel = CancellationToken::new();
    let signals = spawn_with_cancel(targets, options, debounce, &cancel)?;
    Ok((signals, WatchHandle::new(cancel)))
}

/// Like [`spawn`], but tied to an existing cancellation token.
///
/// # Errors
///
/// Returns an error if the filesystem watcher cannot be created.
pub fn spawn_with_cancel(
    targets: &[PathBuf],
    options: &WatchOptions,
    debounce: DebounceConfig,
    cancel: &CancellationToken,
) -> Result<mpsc::Receiver<ChangeSignal>, WatchError> {
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);

    let watcher = FsWatcher::new(targets, options, event_tx)?;
    tokio::spawn(watcher.run(cancel.child_token()));
    tokio::spawn(ChangeDebouncer::new(debounce).run(event_rx, signal_tx, cancel.child_token()));

    Ok(signal_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn poll_options() -> WatchOptions {
        WatchOptions {
            poll_interval: Some(Duration::from_millis(30)),
            ..WatchOptions::default()
        }
    }

    #[tokio::test]
    async fn test_pipeline_emits_one_signal_for_burst() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("index.html");
        fs::write(&file, "<html>0</html>").unwrap();

        let (mut signals, _handle) = spawn(
            &[dir.path().to_path_buf()],
            &poll_options(),
            DebounceConfig {
                quiet: Duration::from_millis(300),
                max_wait: Duration::from_secs(3),
            },
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        for i in 1..=5 {
            fs::write(&file, format!("<html>{i}{}</html>", "x".repeat(i))).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let signal = tokio::time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(signal.paths().any(|p| p.ends_with("index.html")));

        let second = tokio::time::timeout(Duration::from_millis(800), signals.recv()).await;
        assert!(second.is_err(), "expected a single signal");
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_pipeline() {
        let dir = tempfile::tempdir().unwrap();

        let (mut signals, handle) = spawn(
            &[dir.path().to_path_buf()],
            &poll_options(),
            DebounceConfig::default(),
        )
        .unwrap();

        drop(handle);

        let closed = tokio::time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_new_file_in_watched_directory_signals() {
        let dir = tempfile::tempdir().unwrap();
        let (mut signals, _handle) = spawn(
            &[dir.path().to_path_buf()],
            &poll_options(),
            DebounceConfig {
                quiet: Duration::from_millis(100),
                max_wait: Duration::from_secs(1),
            },
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let page = dir.path().join("new.html");
        fs::write(&page, "<p>new</p>").unwrap();
        let created = tokio::time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(created.paths().any(|p| p.ends_with("new.html")));

        fs::write(&page, "<p>edited after creation</p>").unwrap();
        let edited = tokio::time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(edited.paths().any(|p| p.ends_with("new.html")));
    }
}
