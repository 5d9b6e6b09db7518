//! File system watcher feeding the debouncer

use crate::debounce::Debouncer;
use crate::error::ConfigError;
use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, channel};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Kind of change reported for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Create,
    Write,
    Remove,
    /// Path was renamed away (or onto); its watch needs re-registering
    Rename,
    /// Permissions or other metadata changed
    Chmod,
    Other,
}

impl ChangeOp {
    /// Map a notify event kind. Returns `None` for pure access events
    /// (open/read/close), which do not change anything.
    pub fn from_kind(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Access(_) => None,
            EventKind::Create(_) => Some(Self::Create),
            EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Rename),
            EventKind::Modify(ModifyKind::Metadata(_)) => Some(Self::Chmod),
            EventKind::Modify(_) => Some(Self::Write),
            EventKind::Remove(_) => Some(Self::Remove),
            EventKind::Any | EventKind::Other => Some(Self::Other),
        }
    }
}

/// A single "the watched set changed" notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub path: PathBuf,
    pub op: ChangeOp,
}

/// Split a notify event into one notification per path.
pub fn classify(event: &Event) -> Vec<ChangeNotification> {
    let Some(op) = ChangeOp::from_kind(&event.kind) else {
        return Vec::new();
    };
    event
        .paths
        .iter()
        .map(|path| ChangeNotification {
            path: path.clone(),
            op,
        })
        .collect()
}

/// Re-registers the watch on a path after it was renamed.
pub trait Rewatch {
    /// Whether `path` is one of the registered watch roots.
    fn is_watched(&self, path: &Path) -> bool;

    fn rewatch(&mut self, path: &Path) -> notify::Result<()>;
}

/// Owns the OS watcher and remembers which paths were registered, and how.
pub struct WatchHandle {
    watcher: RecommendedWatcher,
    mode: RecursiveMode,
    roots: HashSet<PathBuf>,
}

impl WatchHandle {
    fn watch(&mut self, path: &Path) -> notify::Result<()> {
        self.watcher.watch(path, self.mode)?;
        // Backends report absolute paths even for relative roots
        if let Ok(absolute) = std::path::absolute(path) {
            self.roots.insert(absolute);
        }
        self.roots.insert(path.to_path_buf());
        Ok(())
    }
}

impl Rewatch for WatchHandle {
    fn is_watched(&self, path: &Path) -> bool {
        self.roots.contains(path)
    }

    fn rewatch(&mut self, path: &Path) -> notify::Result<()> {
        if let Err(e) = self.watcher.unwatch(path) {
            debug!("Unwatch of {} failed: {}", path.display(), e);
        }
        self.watcher.watch(path, self.mode)
    }
}

/// Turns watcher output into debouncer notifications.
pub struct ChangeAggregator<W> {
    rewatcher: W,
    debouncer: Debouncer,
}

impl<W: Rewatch> ChangeAggregator<W> {
    pub fn new(rewatcher: W, debouncer: Debouncer) -> Self {
        Self {
            rewatcher,
            debouncer,
        }
    }

    /// Handle one message from the watcher.
    ///
    /// Every change event notifies the debouncer exactly once, whatever its
    /// kind. Access events (open, read, close) are not changes and are
    /// dropped. A renamed path is re-watched only if it is itself a watch
    /// root; rename targets inside a watched directory are left alone.
    /// Re-watch failures and watcher errors are logged and otherwise
    /// ignored. Returns `true` if the debouncer was notified.
    pub fn on_event(&mut self, message: notify::Result<Event>) -> bool {
        let event = match message {
            Ok(event) => event,
            Err(e) => {
                warn!("==> error: {}", e);
                return false;
            }
        };

        debug!("File system event: {:?}", event);
        let changes = classify(&event);
        if changes.is_empty() {
            return false;
        }

        for change in &changes {
            info!("==> detected change in {}", change.path.display());
        }
        self.debouncer.notify();

        let renamed_roots: Vec<PathBuf> = changes
            .into_iter()
            .filter(|c| c.op == ChangeOp::Rename && self.rewatcher.is_watched(&c.path))
            .map(|c| c.path)
            .collect();
        for path in renamed_roots {
            debug!("Re-watching renamed path {}", path.display());
            if let Err(e) = self.rewatcher.rewatch(&path) {
                warn!("Failed to re-watch {}: {}", path.display(), e);
            }
        }
        true
    }

    pub fn into_inner(self) -> W {
        self.rewatcher
    }
}

/// Registered file system watch, ready to be run.
pub struct ChangeWatcher {
    handle: WatchHandle,
    events: Receiver<notify::Result<Event>>,
}

impl ChangeWatcher {
    /// Create the OS watcher and register every path.
    ///
    /// Failing to watch any path is a configuration error: it usually means
    /// the path does not exist.
    pub fn new(paths: &[PathBuf], recursive: bool) -> Result<Self, ConfigError> {
        let (tx, events) = channel();

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Receiver gone means the aggregation loop has stopped
            let _ = tx.send(res);
        })
        .map_err(ConfigError::WatcherInit)?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        let mut handle = WatchHandle {
            watcher,
            mode,
            roots: HashSet::new(),
        };

        for path in paths {
            handle.watch(path).map_err(|source| ConfigError::Watch {
                    path: path.clone(),
                    source,
                })?;
            debug!("Watching {}", path.display());
        }

        Ok(Self { handle, events })
    }

    /// Run the aggregation loop until cancelled.
    ///
    /// # Arguments
    ///
    /// * `debouncer` - Notified once per change event
    /// * `cancel` - Cancellation token to stop watching
    pub async fn run(self, debouncer: Debouncer, cancel: CancellationToken) -> Result<()> {
        let events = self.events;
        let mut aggregator = ChangeAggregator::new(self.handle, debouncer);

        // notify delivers on a std channel; drain it from a blocking task
        tokio::task::spawn_blocking(move || {
            loop {
                if cancel.is_cancelled() {
                    debug!("Change watcher cancelled");
                    break;
                }

                match events.recv_timeout(Duration::from_millis(100)) {
                    Ok(message) => {
                        aggregator.on_event(message);
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => {
                        warn!("Watcher channel disconnected");
                        break;
                    }
                }
            }
        })
        .await
        .context("Watcher task panicked")?;

        Ok(())
    }
}
