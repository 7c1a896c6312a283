//! Filesystem watcher.
//!
//! Registers the resolved watch set with a `notify` backend and turns raw
//! notifications into [`ChangeEvent`]s. The watch set is maintained at
//! runtime: new directories are registered, vanished paths are dropped, and
//! vanished roots are re-registered when they come back.

use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::Duration;

use glob::Pattern;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, PollWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::WatchError;
use crate::event::{ChangeEvent, ChangeKind};
use crate::resolver::WatchSetResolver;

/// Watcher options.
#[derive(Clone, Debug)]
pub struct WatchOptions {
    /// Maximum directory recursion depth below each root.
    pub max_depth: Option<usize>,
    /// Use the polling backend with this interval instead of OS notifications.
    pub poll_interval: Option<Duration>,
    /// File name glob patterns whose changes are ignored.
    pub ignore_patterns: Vec<String>,
    /// How often missing roots are checked for reappearance.
    pub retry_interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            max_depth: None,
            poll_interval: None,
            ignore_patterns: Vec::new(),
            retry_interval: Duration::from_secs(1),
        }
    }
}

type RawEvent = notify::Result<notify::Event>;

/// Map a notify event kind to a change kind.
///
/// Returns `None` for kinds that do not affect served content (access,
/// metadata-only changes).
fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Renamed),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

/// Create the notify backend, forwarding raw events into `tx`.
fn create_backend(
    poll_interval: Option<Duration>,
    tx: mpsc::UnboundedSender<RawEvent>,
) -> Result<Box<dyn Watcher + Send>, notify::Error> {
    // Called from the backend thread, and synchronously from `watch` when the
    // poller cannot read a path, so it must never block
    let handler = move |res: RawEvent| {
        let _ = tx.send(res);
    };

    if let Some(interval) = poll_interval {
        let config = notify::Config::default()
            .with_poll_interval(interval)
            .with_compare_contents(true);
        Ok(Box::new(PollWatcher::new(handler, config)?))
    } else {
        Ok(Box::new(notify::recommended_watcher(handler)?))
    }
}

/// Watches a set of paths and emits change events.
pub struct FsWatcher {
    backend: Box<dyn Watcher + Send>,
    raw_rx: mpsc::UnboundedReceiver<RawEvent>,
    events: mpsc::Sender<ChangeEvent>,
    resolver: WatchSetResolver,
    roots: Vec<PathBuf>,
    watched: BTreeSet<PathBuf>,
    missing: Vec<PathBuf>,
    ignore: Vec<Pattern>,
    retry_interval: Duration,
}

impl FsWatcher {
    /// Create a watcher for `targets` and register the resolved watch set.
    ///
    /// Missing or unwatchable paths are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the notify backend cannot be created or an ignore
    /// pattern is invalid.
    pub fn new(
        targets: &[PathBuf],
        options: &WatchOptions,
        events: mpsc::Sender<ChangeEvent>,
    ) -> Result<Self, WatchError> {
        let ignore = options
            .ignore_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|source| WatchError::InvalidPattern {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let backend = create_backend(options.poll_interval, raw_tx)?;
        let resolver = WatchSetResolver::new(options.max_depth);
        let resolved = resolver.resolve(targets);

        let mut watcher = Self {
            backend,
            raw_rx,
            events,
            resolver,
            roots: resolved.roots,
            watched: BTreeSet::new(),
            missing: resolved.missing,
            ignore,
            retry_interval: options.retry_interval,
        };

        for path in &resolved.paths {
            watcher.register(path);
        }

        tracing::info!(
            roots = watcher.roots.len(),
            paths = watcher.watched.len(),
            missing = watcher.missing.len(),
            "Filesystem watcher ready"
        );

        Ok(watcher)
    }

    /// Paths currently registered with the backend.
    #[must_use]
    pub fn watched(&self) -> &BTreeSet<PathBuf> {
        &self.watched
    }

    /// Roots that are currently missing.
    #[must_use]
    pub fn missing(&self) -> &[PathBuf] {
        &self.missing
    }

    /// Process notifications until cancelled or the event receiver closes.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut retry = tokio::time::interval(self.retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let flow = tokio::select! {
                () = cancel.cancelled() => ControlFlow::Break(()),
                raw = self.raw_rx.recv() => match raw {
                    Some(raw) => self.handle_raw(raw).await,
                    None => ControlFlow::Break(()),
                },
                _ = retry.tick(), if !self.missing.is_empty() => self.retry_missing().await,
            };

            if flow.is_break() {
                break;
            }
        }

        tracing::debug!(paths = self.watched.len(), "Filesystem watcher stopped");
    }

    /// Register a single path, non-recursively.
    ///
    /// Returns `false` if the backend refused it.
    fn register(&mut self, path: &Path) -> bool {
        if self.watched.contains(path) {
            return true;
        }

        match self.backend.watch(path, RecursiveMode::NonRecursive) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Watching path");
                self.watched.insert(path.to_path_buf());
                true
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot watch path, skipping");
                false
            }
        }
    }

    /// Translate one raw notification, maintaining the watch set.
    async fn handle_raw(&mut self, raw: RawEvent) -> ControlFlow<()> {
        let event = match raw {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, paths = ?e.paths, "Filesystem watcher error");
                return ControlFlow::Continue(());
            }
        };

        let Some(kind) = change_kind(&event.kind) else {
            return ControlFlow::Continue(());
        };

        for path in event.paths {
            let kind = self.update_watch_set(kind, &path);

            if self.is_ignored(&path) {
                tracing::trace!(path = %path.display(), "Ignoring change");
                continue;
            }

            if self.events.send(ChangeEvent::new(kind, path)).await.is_err() {
                return ControlFlow::Break(());
            }
        }

        ControlFlow::Continue(())
    }

    /// Grow the watch set for new directories and prune vanished paths.
    ///
    /// Returns the kind to report for `path`. A watched path that was
    /// removed but already exists again was replaced in place (an atomic
    /// save, or a root deleted and recreated); the backend lost its watch,
    /// so it is registered again and reported as modified.
    fn update_watch_set(&mut self, kind: ChangeKind, path: &Path) -> ChangeKind {
        if !path.exists() {
            self.prune(path);
        } else if kind == ChangeKind::Removed && self.watched.contains(path) {
            self.rewatch(path);
            return ChangeKind::Modified;
        } else if path.is_dir() && !self.watched.contains(path) {
            self.grow(path);
        }
        kind
    }

    /// Drop the stale watches on a replaced path and register it again.
    fn rewatch(&mut self, path: &Path) {
        self.unwatch_below(path);

        let paths = match self.root_of(path) {
            Some(root) => self.resolver.resolve_subtree(root, path),
            None => vec![path.to_path_buf()],
        };
        let mut added = 0usize;
        for p in &paths {
            if self.register(p) {
                added += 1;
            }
        }

        tracing::debug!(path = %path.display(), added, "Replaced path watched again");
    }

    /// Unwatch `path` and its descendants, returning what was dropped.
    fn unwatch_below(&mut self, path: &Path) -> Vec<PathBuf> {
        let gone: Vec<PathBuf> = self
            .watched
            .iter()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();

        for p in &gone {
            // The backend may already have dropped the watch on its own
            if let Err(e) = self.backend.unwatch(p) {
                tracing::trace!(path = %p.display(), error = %e, "Unwatch failed");
            }
            self.watched.remove(p);
        }
        gone
    }

    /// Register a new directory and everything below it.
    fn grow(&mut self, dir: &Path) {
        let Some(root) = self.root_of(dir).map(Path::to_path_buf) else {
            return;
        };

        let mut added = 0usize;
        for path in self.resolver.resolve_subtree(&root, dir) {
            if !self.watched.contains(&path) && self.register(&path) {
                added += 1;
            }
        }

        if added > 0 {
            tracing::info!(path = %dir.display(), added, "Watching new directory");
        }
    }

    /// Drop `path` and its descendants from the watch set.
    fn prune(&mut self, path: &Path) {
        let gone = self.unwatch_below(path);

        if let Some(pos) = self.roots.iter().position(|r| r == path) {
            let root = self.roots.remove(pos);
            tracing::warn!(path = %root.display(), "Watch target removed, waiting for it to reappear");
            self.missing.push(root);
        } else if !gone.is_empty() {
            tracing::debug!(path = %path.display(), dropped = gone.len(), "Stopped watching removed path");
        }
    }

    /// Re-register missing roots that exist again.
    async fn retry_missing(&mut self) -> ControlFlow<()> {
        let (back, still_missing): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.missing).into_iter().partition(|p| p.exists());
        self.missing = still_missing;

        for target in back {
            let resolved = self.resolver.resolve(std::slice::from_ref(&target));
            for root in resolved.roots {
                for path in &resolved.paths {
                    self.register(path);
                }
                tracing::info!(path = %root.display(), "Watch target reappeared");
                self.roots.push(root.clone());

                if self
                    .events
                    .send(ChangeEvent::new(ChangeKind::Created, root))
                    .await
                    .is_err()
                {
                    return ControlFlow::Break(());
                }
            }
            self.missing.extend(resolved.missing);
        }

        ControlFlow::Continue(())
    }

    /// Longest root containing `path`.
    fn root_of(&self, path: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(PathBuf::as_path)
    }

    /// Whether the file name matches an ignore pattern.
    fn is_ignored(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.ignore.iter().any(|p| p.matches(name))
    }
}
