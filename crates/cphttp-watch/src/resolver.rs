//! Watch set resolution.
//!
//! Expands configured watch targets into the concrete paths registered with
//! the filesystem backend. Directories are registered one by one (non
//! recursively) so the watcher owns the exact set and can grow or prune it
//! as directories come and go.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

/// Result of resolving a list of watch targets.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ResolvedWatchSet {
    /// Canonical root for every target that exists.
    pub roots: Vec<PathBuf>,
    /// Paths to register: every directory under each root, plus file roots.
    pub paths: Vec<PathBuf>,
    /// Targets that do not exist (absolute, not canonical).
    pub missing: Vec<PathBuf>,
}

/// Expands watch targets into registrable paths.
#[derive(Clone, Debug, Default)]
pub struct WatchSetResolver {
    max_depth: Option<usize>,
}

impl WatchSetResolver {
    /// Create a resolver. `max_depth` limits directory recursion below each
    /// root (`Some(0)` watches only the root itself).
    #[must_use]
    pub fn new(max_depth: Option<usize>) -> Self {
        Self { max_depth }
    }

    /// Resolve configured targets.
    ///
    /// Missing targets are logged and reported in
    /// [`ResolvedWatchSet::missing`]; they are never an error.
    #[must_use]
    pub fn resolve(&self, targets: &[PathBuf]) -> ResolvedWatchSet {
        let mut resolved = ResolvedWatchSet::default();

        for target in targets {
            let Ok(root) = target.canonicalize() else {
                tracing::warn!(path = %target.display(), "Watch target does not exist, skipping");
                resolved
                    .missing
                    .push(std::path::absolute(target).unwrap_or_else(|_| target.clone()));
                continue;
            };

            if resolved.roots.contains(&root) {
                continue;
            }

            for path in self.resolve_subtree(&root, &root) {
                if !resolved.paths.contains(&path) {
                    resolved.paths.push(path);
                }
            }
            resolved.roots.push(root);
        }

        resolved
    }

    /// Resolve `dir` (a path at or below `root`) into the directories to
    /// register, honoring the depth limit relative to `root`.
    ///
    /// A file path resolves to itself. Unreadable entries are logged and
    /// skipped.
    #[must_use]
    pub fn resolve_subtree(&self, root: &Path, dir: &Path) -> Vec<PathBuf> {
        if !dir.is_dir() {
            return if dir.exists() {
                vec![dir.to_path_buf()]
            } else {
                Vec::new()
            };
        }

        let offset = dir
            .strip_prefix(root)
            .map_or(0, |relative| relative.components().count());

        let remaining = match self.max_depth {
            Some(max) if offset > max => return Vec::new(),
            Some(max) => Some(max - offset),
            None => None,
        };

        let mut walker = WalkBuilder::new(dir);
        walker
            .standard_filters(false)
            .follow_links(false)
            .max_depth(remaining);

        let mut dirs = Vec::new();
        for entry in walker.build() {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_some_and(|t| t.is_dir()) {
                        dirs.push(entry.into_path());
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable path");
                }
            }
        }
        dirs
    }
}
