//! Local change detection
//!
//! [`FileWatcher`] turns `notify` events under a folder's local root into
//! the relative paths they touched, dropping ignored paths (editor swap
//! files, our own partial downloads) before they reach the engine.
//!
//! [`DebouncedChangeQueue`] holds touched paths until they have been quiet
//! for the debounce delay. An editor that saves through a temp file and a
//! rename produces a handful of events within milliseconds; the queue turns
//! them into a single planning pass.
//!
//! ```text
//! inotify / FSEvents ─► FileWatcher ─► mpsc ─► DebouncedChangeQueue ─► plan
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use glob::Pattern;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use foldsync_core::domain::RelativePath;

use crate::filesystem::is_ignored;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Recursive watch on one folder's local root
///
/// Dropping the watcher ends the watch and closes its channel.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Watches `root` and returns the receiver of touched relative paths
    ///
    /// # Errors
    /// Returns an error when the OS watcher cannot be created or the root
    /// cannot be watched (missing, permissions, inotify watch limit)
    pub fn start(root: &Path, ignore: Vec<Pattern>) -> Result<(Self, mpsc::Receiver<RelativePath>)> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let event_root = root.to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    for rel in touched_paths(&event_root, &event, &ignore) {
                        // A closed receiver means the engine is shutting down
                        if tx.blocking_send(rel).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => error!(error = %err, "File watcher error"),
            },
            notify::Config::default(),
        )
        .context("cannot create file watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("cannot watch {}", root.display()))?;
        info!(root = %root.display(), "Watching local root");

        Ok((
            Self {
                watcher,
                root: root.to_path_buf(),
            },
            rx,
        ))
    }

    pub fn stop(mut self) {
        if let Err(e) = self.watcher.unwatch(&self.root) {
            debug!(error = %e, "Unwatch failed");
        }
    }
}

/// Relative paths an event touched, minus ignored ones
///
/// Renames report both ends. Access events and paths outside the root
/// produce nothing.
fn touched_paths(root: &Path, event: &notify::Event, ignore: &[Pattern]) -> Vec<RelativePath> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
        _ => return Vec::new(),
    }

    event
        .paths
        .iter()
        .filter_map(|path| RelativePath::from_local(root, path).ok())
        .filter(|rel| {
            let ignored = is_ignored(ignore, rel);
            if ignored {
                trace!(path = %rel, "Ignored change");
            }
            !ignored
        })
        .collect()
}

/// Touched paths waiting for their quiet period
///
/// Touching a path again restarts its quiet period, so a path being
/// written continuously is held back until the writer stops.
pub struct DebouncedChangeQueue {
    pending: HashMap<RelativePath, Instant>,
    quiet_period: Duration,
}

impl DebouncedChangeQueue {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            quiet_period,
        }
    }

    pub fn touch(&mut self, path: RelativePath) {
        self.touch_at(path, Instant::now());
    }

    fn touch_at(&mut self, path: RelativePath, at: Instant) {
        self.pending.insert(path, at);
    }

    /// Removes and returns the paths that have been quiet long enough
    pub fn settled(&mut self) -> Vec<RelativePath> {
        self.settled_at(Instant::now())
    }

    fn settled_at(&mut self, now: Instant) -> Vec<RelativePath> {
        let quiet = self.quiet_period;
        let mut settled = Vec::new();
        self.pending.retain(|path, touched| {
            if now.saturating_duration_since(*touched) >= quiet {
                settled.push(path.clone());
                false
            } else {
                true
            }
        });
        settled.sort();
        settled
    }

    /// When the earliest pending path settles
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().map(|touched| *touched + self.quiet_period)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
