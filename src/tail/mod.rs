// Tail module - Live following of the newest file in a rollover chain

mod watcher;

pub use watcher::TailWatcher;

use crate::source::{FileIdentity, PendingLine, SourceId};
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Settings shared by every tail watcher
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Interval used when filesystem notifications are unavailable
    pub poll_interval: Duration,
    /// Skip filesystem notifications and always poll
    pub force_polling: bool,
    /// Highest rollover suffix probed when re-resolving after a rotation
    pub max_suffix: u32,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            force_polling: false,
            max_suffix: crate::rollover::DEFAULT_MAX_SUFFIX,
        }
    }
}

/// A change observed by a watcher, applied by the owning source as one step
#[derive(Debug)]
pub enum SourceUpdate {
    /// New complete lines were appended to the watched file
    Appended(Vec<PendingLine>),
    /// The watched file was rotated; `files` is the re-resolved chain
    Rotated {
        files: Vec<PathBuf>,
        active: PathBuf,
        identity: FileIdentity,
    },
}

/// An update tagged with the source it belongs to
#[derive(Debug)]
pub struct TailMessage {
    pub source: SourceId,
    /// Open generation of the source; stale generations are discarded
    pub generation: u64,
    pub update: SourceUpdate,
}

/// How a watcher learns about file changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// Filesystem notifications
    Notify,
    /// Fixed-interval polling
    Poll,
}

impl std::fmt::Display for WatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchMode::Notify => write!(f, "notify"),
            WatchMode::Poll => write!(f, "poll"),
        }
    }
}

/// Owner of a running watcher task; dropping it stops the watcher
#[derive(Debug)]
pub struct TailHandle {
    path: PathBuf,
    task: JoinHandle<()>,
}

impl TailHandle {
    pub(crate) fn new(path: PathBuf, task: JoinHandle<()>) -> Self {
        Self { path, task }
    }

    /// File being followed
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Stop the watcher; updates already queued are left for the consumer to discard
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for TailHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
