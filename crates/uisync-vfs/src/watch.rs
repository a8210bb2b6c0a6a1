//! Backend watcher abstraction.
//!
//! OS integration lives behind [`FileWatcher`]; the sync core only sees [`WatchEvent`]s on a
//! `crossbeam_channel` receiver. The `notify`-based backend is behind the `watch-notify` feature.
//! Tests use [`ManualFileWatcher`] instead of real OS timing.
//!
//! Backends may coalesce or reorder events. When they drop events they emit
//! [`WatchEvent::Rescan`] and consumers fall back to walking their roots.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use crossbeam_channel as channel;

use crate::change::FileChange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Changes { changes: Vec<FileChange> },
    /// The backend lost events; consumers should rescan their roots.
    Rescan,
}

impl WatchEvent {
    pub fn changes(&self) -> &[FileChange] {
        match self {
            WatchEvent::Changes { changes } => changes,
            WatchEvent::Rescan => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchMode {
    Recursive,
    NonRecursive,
}

/// Backend errors arrive on the same stream as events.
pub type WatchMessage = io::Result<WatchEvent>;

pub trait FileWatcher: Send {
    fn watch_path(&mut self, path: &Path, mode: WatchMode) -> io::Result<()>;

    fn unwatch_path(&mut self, path: &Path) -> io::Result<()>;

    fn watch_root(&mut self, root: &Path) -> io::Result<()> {
        self.watch_path(root, WatchMode::Recursive)
    }

    fn receiver(&self) -> &channel::Receiver<WatchMessage>;

    /// Drains every pending message without blocking.
    fn poll(&mut self) -> io::Result<Vec<WatchEvent>> {
        let mut out = Vec::new();
        for msg in self.receiver().try_iter() {
            out.push(msg?);
        }
        Ok(out)
    }
}

impl<W: ?Sized + FileWatcher> FileWatcher for Box<W> {
    fn watch_path(&mut self, path: &Path, mode: WatchMode) -> io::Result<()> {
        self.as_mut().watch_path(path, mode)
    }

    fn unwatch_path(&mut self, path: &Path) -> io::Result<()> {
        self.as_mut().unwatch_path(path)
    }

    fn receiver(&self) -> &channel::Receiver<WatchMessage> {
        self.as_ref().receiver()
    }
}

const MANUAL_WATCH_QUEUE_CAPACITY: usize = 1024;

/// Deterministic in-memory watcher. Events are injected through [`ManualFileWatcherHandle`].
///
/// Paths can be marked as failing so that `watch_path` returns an error for them, which lets
/// tests exercise per-root bind failures.
#[derive(Debug)]
pub struct ManualFileWatcher {
    tx: channel::Sender<WatchMessage>,
    rx: channel::Receiver<WatchMessage>,
    watched: HashMap<PathBuf, WatchMode>,
    failing: Vec<PathBuf>,
}

/// Cloneable injector for a [`ManualFileWatcher`] that has been moved into a driver thread.
#[derive(Debug, Clone)]
pub struct ManualFileWatcherHandle {
    tx: channel::Sender<WatchMessage>,
}

impl ManualFileWatcherHandle {
    fn send(&self, msg: WatchMessage) -> io::Result<()> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(channel::TrySendError::Full(_)) => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "watch queue is full",
            )),
            Err(channel::TrySendError::Disconnected(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "watch receiver dropped",
            )),
        }
    }

    pub fn push(&self, event: WatchEvent) -> io::Result<()> {
        self.send(Ok(event))
    }

    pub fn push_changes(&self, changes: Vec<FileChange>) -> io::Result<()> {
        self.push(WatchEvent::Changes { changes })
    }

    pub fn push_error(&self, error: io::Error) -> io::Result<()> {
        self.send(Err(error))
    }
}

impl Default for ManualFileWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualFileWatcher {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(MANUAL_WATCH_QUEUE_CAPACITY);
        Self {
            tx,
            rx,
            watched: HashMap::new(),
            failing: Vec::new(),
        }
    }

    pub fn handle(&self) -> ManualFileWatcherHandle {
        ManualFileWatcherHandle {
            tx: self.tx.clone(),
        }
    }

    /// Makes future `watch_path` calls for `path` fail with `PermissionDenied`.
    pub fn fail_path(&mut self, path: impl Into<PathBuf>) {
        self.failing.push(path.into());
    }

    /// Currently watched paths, sorted.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.watched.keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl FileWatcher for ManualFileWatcher {
    fn watch_path(&mut self, path: &Path, mode: WatchMode) -> io::Result<()> {
        if self.failing.iter().any(|failing| failing == path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("cannot watch {}", path.display()),
            ));
        }
        let mode = match self.watched.get(path) {
            Some(WatchMode::Recursive) => WatchMode::Recursive,
            _ => mode,
        };
        self.watched.insert(path.to_path_buf(), mode);
        Ok(())
    }

    fn unwatch_path(&mut self, path: &Path) -> io::Result<()> {
        self.watched.remove(path);
        Ok(())
    }

    fn receiver(&self) -> &channel::Receiver<WatchMessage> {
        &self.rx
    }
}
