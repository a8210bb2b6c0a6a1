use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use parking_lot::{Mutex, RwLock};
use uisync_config::SyncConfig;
use uisync_core::{now_millis, panic_payload_to_str, ChangeEvent, ChangeKind, Side};

use crate::change::FileChange;
use crate::error::WatchError;
use crate::filter::SideFilter;
use crate::stabilizer::Stabilizer;
use crate::watch::{FileWatcher, WatchEvent};

pub type ChangeHandler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

type Backend = Box<dyn FileWatcher>;

struct Running {
    stop_tx: channel::Sender<()>,
    thread: JoinHandle<Backend>,
}

/// Watches both sides' roots and emits stabilized [`ChangeEvent`]s to every subscribed handler.
///
/// The backend is driven from a dedicated thread. Raw changes are filtered through
/// [`SideFilter`], folded per path by a [`Stabilizer`], and delivered once the path has been
/// quiet for the configured window. A [`WatchEvent::Rescan`] from the backend makes the watcher
/// walk both roots and report every tracked file as changed.
pub struct SideWatcher {
    filter: Arc<SideFilter>,
    stabilization: Duration,
    create_missing_roots: bool,
    handlers: Arc<RwLock<Vec<ChangeHandler>>>,
    backend: Mutex<Option<Backend>>,
    running: Mutex<Option<Running>>,
}

impl SideWatcher {
    pub fn new(config: &SyncConfig, backend: Box<dyn FileWatcher>) -> Result<Self, WatchError> {
        Ok(Self {
            filter: Arc::new(SideFilter::new(config)?),
            stabilization: config.watcher.stabilization(),
            create_missing_roots: config.watcher.create_missing_roots,
            handlers: Arc::default(),
            backend: Mutex::new(Some(backend)),
            running: Mutex::new(None),
        })
    }

    /// Uses the OS watcher backend.
    #[cfg(feature = "watch-notify")]
    pub fn with_notify(config: &SyncConfig) -> Result<Self, WatchError> {
        let backend = crate::NotifyFileWatcher::new()?;
        Self::new(config, Box::new(backend))
    }

    pub fn filter(&self) -> Arc<SideFilter> {
        Arc::clone(&self.filter)
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.handlers.write().push(Arc::new(handler));
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Binds both roots and starts delivering events.
    ///
    /// A root that cannot be bound is logged and skipped; only when no root at all can be
    /// bound does this fail.
    pub fn start(&self) -> Result<(), WatchError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(WatchError::AlreadyStarted);
        }
        let Some(mut backend) = self.backend.lock().take() else {
            return Err(WatchError::AlreadyStarted);
        };

        let mut failures = Vec::new();
        for side in Side::ALL {
            let root = self.filter.root(side);
            if let Err(err) = self.bind_root(backend.as_mut(), side, root) {
                tracing::warn!(
                    target = "uisync.vfs",
                    side = %side,
                    root = %root.display(),
                    error = %err,
                    "failed to watch root"
                );
                failures.push(format!("{}: {err}", root.display()));
            }
        }
        if failures.len() == Side::ALL.len() {
            tracing::error!(target = "uisync.vfs", "no watch root could be bound");
            *self.backend.lock() = Some(backend);
            return Err(WatchError::NoRootsBound { failures });
        }

        let (stop_tx, stop_rx) = channel::bounded(1);
        let driver = Driver {
            filter: Arc::clone(&self.filter),
            stabilizer: Stabilizer::new(self.stabilization),
            handlers: Arc::clone(&self.handlers),
        };
        let thread = std::thread::Builder::new()
            .name("uisync-side-watcher".to_owned())
            .spawn(move || driver.run(backend, stop_rx))?;

        *running = Some(Running { stop_tx, thread });
        Ok(())
    }

    fn bind_root(&self, backend: &mut dyn FileWatcher, side: Side, root: &Path) -> Result<(), WatchError> {
        if !root.is_dir() {
            if !self.create_missing_roots {
                return Err(WatchError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "root does not exist",
                )));
            }
            std::fs::create_dir_all(root).map_err(|source| WatchError::CreateRoot {
                path: root.to_path_buf(),
                source,
            })?;
            tracing::info!(
                target = "uisync.vfs",
                side = %side,
                root = %root.display(),
                "created missing watch root"
            );
        }
        backend.watch_root(root)?;
        Ok(())
    }

    /// Stops the driver thread, flushing every pending path to the handlers first.
    pub fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        let _ = running.stop_tx.send(());
        match running.thread.join() {
            Ok(mut backend) => {
                for side in Side::ALL {
                    let _ = backend.unwatch_path(self.filter.root(side));
                }
                *self.backend.lock() = Some(backend);
            }
            Err(panic) => {
                tracing::error!(
                    target = "uisync.vfs",
                    panic = %panic_payload_to_str(&*panic),
                    "side watcher thread panicked"
                );
            }
        }
    }
}

impl Drop for SideWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SideWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SideWatcher")
            .field("stabilization", &self.stabilization)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

struct Driver {
    filter: Arc<SideFilter>,
    stabilizer: Stabilizer,
    handlers: Arc<RwLock<Vec<ChangeHandler>>>,
}

impl Driver {
    fn run(mut self, backend: Backend, stop_rx: channel::Receiver<()>) -> Backend {
        let events_rx = backend.receiver().clone();

        loop {
            let tick = match self.stabilizer.next_deadline() {
                Some(deadline) => channel::after(deadline.saturating_duration_since(Instant::now())),
                None => channel::never(),
            };

            channel::select! {
                recv(stop_rx) -> _ => break,
                recv(events_rx) -> msg => match msg {
                    Ok(Ok(WatchEvent::Changes { changes })) => {
                        let now = Instant::now();
                        for change in changes {
                            self.ingest(change, now);
                        }
                    }
                    Ok(Ok(WatchEvent::Rescan)) => self.rescan(),
                    Ok(Err(err)) => {
                        tracing::warn!(target = "uisync.vfs", error = %err, "watch backend error");
                    }
                    Err(_) => break,
                },
                recv(tick) -> _ => {},
            }

            let due = self.stabilizer.drain_due(Instant::now());
            self.emit(due);
        }

        let rest = self.stabilizer.drain_all();
        self.emit(rest);
        backend
    }

    fn ingest(&mut self, change: FileChange, now: Instant) {
        match change {
            FileChange::Created { path } => self.record_added(&path, now),
            FileChange::Modified { path } => self.record(&path, ChangeKind::Change, now),
            FileChange::Deleted { path } => self.record(&path, ChangeKind::Remove, now),
            FileChange::Moved { from, to } => {
                self.record(&from, ChangeKind::Remove, now);
                self.record_added(&to, now);
            }
        }
    }

    fn record(&mut self, path: &Path, kind: ChangeKind, now: Instant) {
        if let Some(side) = self.filter.accept(path) {
            let path = uisync_core::normalize_local_path(path);
            self.stabilizer.record(&path, side, kind, now, now_millis());
        }
    }

    /// A new directory reports every tracked file inside it as added.
    fn record_added(&mut self, path: &Path, now: Instant) {
        if !path.is_dir() {
            self.record(path, ChangeKind::Add, now);
            return;
        }
        for entry in walkdir::WalkDir::new(path)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.file_type().is_file() {
                self.record(entry.path(), ChangeKind::Add, now);
            }
        }
    }

    fn rescan(&mut self) {
        let now = Instant::now();
        let mut count = 0usize;
        for side in Side::ALL {
            for path in self.filter.scan(side) {
                self.stabilizer
                    .record(&path, side, ChangeKind::Change, now, now_millis());
                count += 1;
            }
        }
        tracing::info!(target = "uisync.vfs", files = count, "rescanned watch roots");
    }

    fn emit(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        let handlers = self.handlers.read().clone();
        for event in &events {
            for handler in &handlers {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
                if let Err(panic) = outcome {
                    tracing::error!(
                        target = "uisync.vfs",
                        path = %event.path.display(),
                        panic = %panic_payload_to_str(&*panic),
                        "change handler panicked"
                    );
                }
            }
        }
    }
}
