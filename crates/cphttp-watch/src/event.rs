//! Change event types.
//!
//! [`ChangeEvent`]s are raw, per-path mutations reported by the watcher.
//! [`ChangeSignal`]s are what the debouncer emits once per window.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio_util::sync::{CancellationToken, DropGuard};

/// Kind of filesystem change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// File or directory was created.
    Created,
    /// File contents were modified.
    Modified,
    /// File or directory was removed.
    Removed,
    /// File or directory was renamed.
    Renamed,
}

impl ChangeKind {
    /// Lowercase name, as used in logs and on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Removed => "removed",
            Self::Renamed => "renamed",
        }
    }
}

/// A single filesystem mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Kind of change.
    pub kind: ChangeKind,
    /// Affected path.
    pub path: PathBuf,
    /// When the watcher observed the change.
    pub timestamp: SystemTime,
}

impl ChangeEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            timestamp: SystemTime::now(),
        }
    }
}

/// Coalesced notification that watched files changed.
///
/// Carries the net change per path over one debounce window and the number
/// of raw events folded into it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeSignal {
    changes: BTreeMap<PathBuf, ChangeKind>,
    event_count: usize,
}

impl ChangeSignal {
    /// Create a signal from coalesced per-path changes.
    #[must_use]
    pub fn new(changes: BTreeMap<PathBuf, ChangeKind>, event_count: usize) -> Self {
        Self {
            changes,
            event_count,
        }
    }

    /// Net change per path, ordered by path.
    #[must_use]
    pub fn changes(&self) -> &BTreeMap<PathBuf, ChangeKind> {
        &self.changes
    }

    /// Changed paths, ordered.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.changes.keys().map(PathBuf::as_path)
    }

    /// Number of raw events coalesced into this signal.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.event_count
    }
}

/// Handle to stop the watch pipeline.
///
/// Uses RAII pattern - dropping the handle cancels the watcher and debouncer
/// tasks. A pending debounce window is discarded.
pub struct WatchHandle {
    _guard: Option<DropGuard>,
}

impl WatchHandle {
    /// Create a handle that cancels `token` when dropped.
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self {
            _guard: Some(token.drop_guard()),
        }
    }

    /// Stop watching immediately (consumes the handle).
    pub fn stop(mut self) {
        self._guard.take();
    }
}
