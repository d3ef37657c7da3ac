//! File activity under a workspace directory, reported as heartbeats.
//!
//! Editing, saving, creating and deleting files all count as productive
//! activity. The watcher turns those file system events into
//! [`HeartbeatAggregator::record`] calls; the periodic flush reports them to
//! the CLI.
//!
//! # Architecture
//!
//! The [`notify`] callback is kept lightweight: it filters events and passes
//! them through an internal channel to a dedicated async task. That task
//! coalesces bursts (a save touching many files is one signal) before
//! recording a heartbeat.
//!
//! Hidden paths (any component starting with `.`, such as `.git`) and plain
//! access events are ignored.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use flowbar_monitor::activity::ActivityWatcher;
//! use flowbar_monitor::heartbeat::HeartbeatAggregator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let heartbeats = Arc::new(HeartbeatAggregator::new());
//!     let _watcher = ActivityWatcher::new(PathBuf::from("/work/project"), heartbeats)?;
//!     tokio::signal::ctrl_c().await?;
//!     Ok(())
//! }
//! ```

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::heartbeat::HeartbeatAggregator;

/// Signals closer together than this are recorded once.
const COALESCE_WINDOW: Duration = Duration::from_secs(1);

/// Capacity of the callback-to-task channel.
const CHANNEL_CAPACITY: usize = 256;

/// Errors that can occur while setting up the activity watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Failed to initialize the file system watcher.
    #[error("failed to create watcher: {0}")]
    WatcherInit(#[from] notify::Error),

    /// The watch directory does not exist or is not a directory.
    #[error("watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),
}

/// Watches a directory tree and records a heartbeat for file activity.
///
/// Dropping the watcher stops the subscription; the processing task ends once
/// the internal channel closes.
#[derive(Debug)]
pub struct ActivityWatcher {
    /// Kept alive to maintain the watch subscription.
    #[allow(dead_code)]
    watcher: RecommendedWatcher,

    watch_dir: PathBuf,
}

impl ActivityWatcher {
    /// Starts watching `watch_dir` recursively.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory does not exist or the file system
    /// watcher cannot be initialized.
    pub fn new(
        watch_dir: PathBuf,
        heartbeats: Arc<HeartbeatAggregator>,
    ) -> Result<Self, WatcherError> {
        if !watch_dir.is_dir() {
            return Err(WatcherError::DirectoryNotFound(watch_dir));
        }

        // Bridges the sync notify callback to the async processing task
        let (internal_tx, internal_rx) = mpsc::channel::<PathBuf>(CHANNEL_CAPACITY);
        tokio::spawn(record_activity(internal_rx, heartbeats));

        let root = watch_dir.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| handle_notify_event(res, &root, &internal_tx),
            Config::default(),
        )?;
        watcher.watch(&watch_dir, RecursiveMode::Recursive)?;

        info!(watch_dir = %watch_dir.display(), "Watching workspace for activity");

        Ok(Self { watcher, watch_dir })
    }

    /// Returns the directory being watched.
    #[must_use]
    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }
}

/// Filters a notify event and queues one path per relevant event.
fn handle_notify_event(
    res: notify::Result<Event>,
    root: &Path,
    internal_tx: &mpsc::Sender<PathBuf>,
) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "File watcher error");
            return;
        }
    };

    if !is_activity(&event.kind) {
        trace!(kind = ?event.kind, "Ignoring event kind");
        return;
    }

    let Some(path) = event.paths.iter().find(|p| !is_hidden(root, p)) else {
        return;
    };

    // try_send keeps the notify thread from blocking; a full channel means a
    // burst is already queued
    if let Err(e) = internal_tx.try_send(path.clone()) {
        trace!(error = %e, "Activity channel full, dropping event");
    }
}

fn is_activity(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// `true` when any component of `path` below `root` starts with a dot.
fn is_hidden(root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|component| match component {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

/// Records one heartbeat per coalescing window of activity.
async fn record_activity(mut rx: mpsc::Receiver<PathBuf>, heartbeats: Arc<HeartbeatAggregator>) {
    let mut last: Option<Instant> = None;
    while let Some(path) = rx.recv().await {
        let now = Instant::now();
        if last.is_some_and(|at| now.duration_since(at) < COALESCE_WINDOW) {
            continue;
        }
        last = Some(now);
        debug!(path = %path.display(), "File activity");
        heartbeats.record();
    }

    debug!("Activity processor shutting down");
}
