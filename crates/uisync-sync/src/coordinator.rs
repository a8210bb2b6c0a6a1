use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uisync_cache::ConversionCache;
use uisync_config::{AuthorityMode, ConfigError, SyncConfig};
use uisync_core::{now_millis, ArtifactId, ChangeEvent, ChangeKind, Collaborators, Side};
use uisync_scheduler::{CancellationToken, ParallelProcessor, ProgressTracker};
use uisync_storage::{ConflictFile, IrStore};
use uisync_vfs::{FileWatcher, SideWatcher};

use crate::conflict::{ConflictDetector, ConflictRecord, Resolution};
use crate::engine::{EngineStats, SyncEngine, SyncResult, SyncStatus};
use crate::error::{Result, SyncError};
use crate::queue::{ChangeQueue, QueuedChange};

pub type StatusHandler = Arc<dyn Fn(&SyncResult) + Send + Sync>;
pub type ConflictHandler = Arc<dyn Fn(&ConflictRecord) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinatorStats {
    pub engine: EngineStats,
    /// Changes waiting in the queue.
    pub queued: usize,
    /// Changes dropped by the queue bound.
    pub dropped: u64,
    /// Non-authoritative edits that were logged and skipped.
    pub ignored: u64,
    pub unresolved_conflicts: usize,
}

pub struct CoordinatorBuilder {
    config: SyncConfig,
    collaborators: Collaborators,
    backend: Option<Box<dyn FileWatcher>>,
    cache: Option<Arc<ConversionCache>>,
    processor: Option<ParallelProcessor>,
    progress: Option<ProgressTracker>,
}

impl CoordinatorBuilder {
    /// Watcher backend. Without one, the OS watcher is used when the `watch-notify` feature is
    /// enabled.
    pub fn watcher_backend(mut self, backend: Box<dyn FileWatcher>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn cache(mut self, cache: Arc<ConversionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn processor(mut self, processor: ParallelProcessor) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Validates the config, opens storage and wires every component. Fails only on
    /// infrastructure problems.
    pub fn build(self) -> Result<ModeCoordinator> {
        let config = self.config;
        let issues = config.validate();
        if !issues.is_empty() {
            return Err(ConfigError::Invalid(issues).into());
        }
        let storage_root = &config.storage_root;
        std::fs::create_dir_all(storage_root).map_err(|source| SyncError::StorageRoot {
            path: storage_root.clone(),
            source,
        })?;
        let store = Arc::new(IrStore::open(storage_root)?);
        let detector = ConflictDetector::open(
            ConflictFile::new(storage_root),
            config.conflicts.window_ms,
            config.mode.is_bidirectional(),
        )?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => default_backend()?,
        };
        let watcher = SideWatcher::new(&config, backend)?;
        let queue = ChangeQueue::new(&config.queue, watcher.filter());

        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(ConversionCache::new(&config.cache)));
        let processor = self
            .processor
            .unwrap_or_else(|| ParallelProcessor::new(&config.processor));
        let progress = self.progress.unwrap_or_default();
        let engine = SyncEngine::new(
            &config,
            self.collaborators,
            cache,
            store,
            processor,
            progress,
        );

        let shared = Arc::new(Shared {
            mode: config.mode,
            engine,
            watcher,
            queue: Mutex::new(queue),
            detector: Mutex::new(detector),
            wake: Notify::new(),
            status_handlers: RwLock::default(),
            conflict_handlers: RwLock::default(),
            ignored: AtomicU64::new(0),
            dispatcher: tokio::sync::Mutex::new(None),
            config,
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        shared.watcher.subscribe(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.accept(event.clone());
            }
        });

        Ok(ModeCoordinator { shared })
    }
}

#[cfg(feature = "watch-notify")]
fn default_backend() -> Result<Box<dyn FileWatcher>> {
    let watcher = uisync_vfs::NotifyFileWatcher::new().map_err(uisync_vfs::WatchError::from)?;
    Ok(Box::new(watcher))
}

#[cfg(not(feature = "watch-notify"))]
fn default_backend() -> Result<Box<dyn FileWatcher>> {
    Err(SyncError::NoWatcherBackend)
}

struct Dispatcher {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    config: SyncConfig,
    mode: AuthorityMode,
    engine: SyncEngine,
    watcher: SideWatcher,
    queue: Mutex<ChangeQueue>,
    detector: Mutex<ConflictDetector>,
    wake: Notify,
    status_handlers: RwLock<Vec<StatusHandler>>,
    conflict_handlers: RwLock<Vec<ConflictHandler>>,
    ignored: AtomicU64,
    dispatcher: tokio::sync::Mutex<Option<Dispatcher>>,
}

impl Shared {
    /// Entry point for every stabilized change, from the watcher or [`ModeCoordinator::submit`].
    fn accept(&self, event: ChangeEvent) {
        if self.engine.is_echo(&event) {
            tracing::trace!(
                target = "uisync.sync",
                path = %event.path.display(),
                "ignoring self-write"
            );
            self.emit_status(&self.engine.skipped(&event, SyncStatus::Echo));
            return;
        }
        if !self.mode.accepts(event.side) {
            self.ignored.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                target = "uisync.sync",
                path = %event.path.display(),
                side = %event.side,
                mode = ?self.mode,
                "edit on non-authoritative side ignored"
            );
            self.emit_status(&self.engine.skipped(&event, SyncStatus::Ignored));
            return;
        }
        self.queue.lock().enqueue(event);
        self.wake.notify_one();
    }

    async fn run_dispatcher(self: Arc<Self>, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                break;
            }
            let batch = self.queue.lock().poll(Instant::now());
            if let Some(batch) = batch {
                self.dispatch(batch, true).await;
                continue;
            }
            let deadline = self.queue.lock().next_deadline();
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = sleep_until(deadline) => {}
            }
        }
        tracing::debug!(target = "uisync.sync", "dispatcher stopped");
    }

    /// Runs one batch through conflict tracking and the engine.
    ///
    /// With `track_edits`, each change is first recorded with the conflict detector; changes for
    /// conflicted artifacts are never handed to the engine.
    async fn dispatch(&self, batch: Vec<QueuedChange>, track_edits: bool) -> Vec<SyncResult> {
        let naming = Arc::clone(&self.engine.collaborators().naming);
        let mut raised = Vec::new();
        let mut held = Vec::new();
        let mut runnable = Vec::with_capacity(batch.len());
        {
            let mut detector = self.detector.lock();
            let ids: Vec<Option<ArtifactId>> = batch
                .iter()
                .map(|change| naming.to_artifact_id(&change.event.path))
                .collect();
            if track_edits {
                for (change, id) in batch.iter().zip(&ids) {
                    let Some(id) = id else { continue };
                    if let Some(record) =
                        detector.record_change(id, change.event.side, change.event.timestamp)
                    {
                        raised.push(record);
                    }
                }
            }
            for (change, id) in batch.into_iter().zip(ids) {
                match id {
                    Some(id) if detector.is_conflicted(&id) => {
                        held.push(self.engine.skipped(&change.event, SyncStatus::Conflicted));
                    }
                    _ => runnable.push(change),
                }
            }
        }
        for record in &raised {
            self.emit_conflict(record);
        }

        let processed = self.engine.process_batch(runnable).await;

        raised.clear();
        {
            let mut detector = self.detector.lock();
            for result in &processed {
                let Some(id) = &result.artifact_id else {
                    continue;
                };
                match &result.status {
                    SyncStatus::Synced => {
                        detector.mark_synced(id, result.side);
                        detector.record_version(id, result.side, true);
                    }
                    SyncStatus::Unchanged | SyncStatus::Deleted => {
                        detector.mark_synced(id, result.side)
                    }
                    // A version was stored but never reached the other side.
                    SyncStatus::Failed(_) if result.version.is_some() => {
                        if let Some(record) = detector.record_version(id, result.side, false) {
                            raised.push(record);
                        }
                    }
                    _ => {}
                }
            }
        }
        for record in &raised {
            self.emit_conflict(record);
        }

        held.extend(processed);
        for result in &held {
            self.emit_status(result);
        }
        held
    }

    fn emit_status(&self, result: &SyncResult) {
        let handlers = self.status_handlers.read().clone();
        for handler in handlers {
            handler(result);
        }
    }

    fn emit_conflict(&self, record: &ConflictRecord) {
        let handlers = self.conflict_handlers.read().clone();
        for handler in handlers {
            handler(record);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// The public face of the synchronization core.
///
/// Wires the [`SideWatcher`], [`ChangeQueue`], [`ConflictDetector`] and [`SyncEngine`] together
/// under the configured [`AuthorityMode`]. In single-authority modes edits on the other side are
/// logged and reported as [`SyncStatus::Ignored`], and the conflict detector stays inert.
pub struct ModeCoordinator {
    shared: Arc<Shared>,
}

impl ModeCoordinator {
    pub fn builder(config: SyncConfig, collaborators: Collaborators) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config,
            collaborators,
            backend: None,
            cache: None,
            processor: None,
            progress: None,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    pub fn mode(&self) -> AuthorityMode {
        self.shared.mode
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.shared.engine
    }

    pub fn progress(&self) -> &ProgressTracker {
        self.shared.engine.progress()
    }

    pub fn watcher(&self) -> &SideWatcher {
        &self.shared.watcher
    }

    /// Starts watching both roots and dispatching released batches.
    pub async fn start(&self) -> Result<()> {
        let mut dispatcher = self.shared.dispatcher.lock().await;
        if dispatcher.is_some() {
            return Err(SyncError::AlreadyRunning);
        }
        self.shared.watcher.start()?;

        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.shared).run_dispatcher(token.clone()));
        *dispatcher = Some(Dispatcher { token, handle });
        tracing::info!(
            target = "uisync.sync",
            mode = ?self.shared.mode,
            side_a = %self.shared.config.side_a.root.display(),
            side_b = %self.shared.config.side_b.root.display(),
            "sync started"
        );
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.shared.dispatcher.lock().await.is_some()
    }

    /// Stops watching, then drains whatever is still pending before returning.
    pub async fn stop(&self) {
        let Some(dispatcher) = self.shared.dispatcher.lock().await.take() else {
            return;
        };
        // Flushes stabilizing paths into the queue.
        self.shared.watcher.stop();
        dispatcher.token.cancel();
        if let Err(err) = dispatcher.handle.await {
            tracing::error!(target = "uisync.sync", error = %err, "dispatcher task failed");
        }

        let remaining = self.shared.queue.lock().flush();
        if !remaining.is_empty() {
            self.shared.dispatch(remaining, true).await;
        }
        tracing::info!(target = "uisync.sync", "sync stopped");
    }

    /// Feeds a change as if the watcher had reported it.
    pub fn submit(&self, event: ChangeEvent) {
        self.shared.accept(event);
    }

    /// Releases and processes everything queued right now, without waiting for the batch
    /// delay.
    pub async fn flush(&self) -> Vec<SyncResult> {
        let pending = self.shared.queue.lock().flush();
        if pending.is_empty() {
            return Vec::new();
        }
        self.shared.dispatch(pending, true).await
    }

    /// Processes every tracked file on the accepted sides once, as a single batch.
    ///
    /// In bidirectional mode, an artifact that exists on both sides but has no stored history
    /// is compared first: when the two sides convert to different IR a
    /// [`DivergedVersions`](crate::ConflictReason::DivergedVersions) record is raised and neither file is touched.
    /// Otherwise side A is scanned first, so the B copy is recognised as the engine's own
    /// write.
    pub async fn sync_all(&self) -> Vec<SyncResult> {
        let filter = self.shared.watcher.filter();
        let timestamp = now_millis();
        let mut changes = Vec::new();
        {
            let queue = self.shared.queue.lock();
            for side in Side::ALL {
                if !self.shared.mode.accepts(side) {
                    continue;
                }
                for path in filter.scan(side) {
                    let event = ChangeEvent::new(path, side, ChangeKind::Change, timestamp);
                    let priority = queue.priority_of(&event);
                    changes.push(QueuedChange::new(event, priority));
                }
            }
        }
        tracing::info!(
            target = "uisync.sync",
            files = changes.len(),
            "initial scan"
        );
        if self.shared.mode.is_bidirectional() {
            self.flag_first_sync_divergence(&changes, timestamp).await;
        }
        self.shared.dispatch(changes, false).await
    }

    async fn flag_first_sync_divergence(&self, changes: &[QueuedChange], timestamp: u64) {
        let engine = &self.shared.engine;
        let naming = Arc::clone(&engine.collaborators().naming);
        let mut pairs: IndexMap<ArtifactId, [Option<&Path>; 2]> = IndexMap::new();
        for change in changes {
            let Some(id) = naming.to_artifact_id(&change.event.path) else {
                continue;
            };
            let slot = match change.event.side {
                Side::A => 0,
                Side::B => 1,
            };
            pairs.entry(id).or_default()[slot] = Some(change.event.path.as_path());
        }

        for (id, paths) in pairs {
            let [Some(a), Some(b)] = paths else { continue };
            if engine.store().latest_version(&id).is_some() {
                continue;
            }
            let (Ok(ir_a), Ok(ir_b)) = (
                engine.load_ir(a, Side::A).await,
                engine.load_ir(b, Side::B).await,
            ) else {
                continue;
            };
            if ir_a.checksum() == ir_b.checksum() {
                continue;
            }
            let record = self
                .shared
                .detector
                .lock()
                .flag_divergence(&id, timestamp, timestamp);
            if let Some(record) = record {
                tracing::warn!(
                    target = "uisync.sync",
                    artifact = %id,
                    "both sides differ on first sync; holding the artifact"
                );
                self.shared.emit_conflict(&record);
            }
        }
    }

    pub fn on_status_update<F>(&self, handler: F)
    where
        F: Fn(&SyncResult) + Send + Sync + 'static,
    {
        self.shared.status_handlers.write().push(Arc::new(handler));
    }

    pub fn on_conflict<F>(&self, handler: F)
    where
        F: Fn(&ConflictRecord) + Send + Sync + 'static,
    {
        self.shared.conflict_handlers.write().push(Arc::new(handler));
    }

    pub fn get_conflicts(&self) -> Vec<ConflictRecord> {
        self.shared.detector.lock().get_conflicts()
    }

    pub fn resolved_conflicts(&self) -> Vec<ConflictRecord> {
        self.shared.detector.lock().resolved().to_vec()
    }

    /// Clears `id`'s conflict. `UseA`/`UseB` then force a sync from the chosen side, so the
    /// other side is overwritten even when the stored IR already matches.
    pub async fn resolve_conflict(
        &self,
        id: &ArtifactId,
        resolution: Resolution,
    ) -> Result<ConflictRecord> {
        let record = self
            .shared
            .detector
            .lock()
            .resolve(id, resolution)
            .ok_or_else(|| SyncError::NoConflict(id.clone()))?;

        if let Some(winner) = resolution.winner() {
            let path = self.shared.engine.collaborators().naming.to_path(id, winner);
            let result = self.shared.engine.sync_path(&path, winner, true).await;
            if let Some(failure) = result.failure() {
                tracing::warn!(
                    target = "uisync.sync",
                    artifact = %id,
                    error = %failure.message,
                    "re-sync after conflict resolution failed"
                );
            }
            self.shared.emit_status(&result);
        }
        Ok(record)
    }

    pub fn stats(&self) -> CoordinatorStats {
        let (queued, dropped) = {
            let queue = self.shared.queue.lock();
            (queue.len(), queue.dropped())
        };
        CoordinatorStats {
            engine: self.shared.engine.stats(),
            queued,
            dropped,
            ignored: self.shared.ignored.load(Ordering::Relaxed),
            unresolved_conflicts: self.shared.detector.lock().get_conflicts().len(),
        }
    }
}

impl Drop for ModeCoordinator {
    fn drop(&mut self) {
        self.shared.watcher.stop();
        if let Ok(mut dispatcher) = self.shared.dispatcher.try_lock() {
            if let Some(dispatcher) = dispatcher.take() {
                dispatcher.token.cancel();
            }
        }
    }
}
