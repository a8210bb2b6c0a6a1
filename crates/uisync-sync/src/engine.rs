use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use uisync_cache::{ConversionCache, Fingerprint};
use uisync_config::{AuthorityMode, SyncConfig};
use uisync_core::{
    atomic_write, content_hash, remove_file_best_effort, ArtifactId, ChangeEvent, ChangeKind,
    Collaborators, ComponentIr, ConversionError, GenerationError, ParseError, Side,
};
use uisync_scheduler::{CancellationToken, ParallelProcessor, ProgressTracker, Task, TaskError};
use uisync_storage::{IrStore, StorageError};

use crate::queue::QueuedChange;

/// Where an artifact currently is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Idle,
    Parsing,
    Validating,
    Diffing,
    Generating,
    Writing,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Parse,
    Conversion,
    Validation,
    Generation,
    Io,
    /// The pool worker crashed twice (or the pool is gone).
    Worker,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Set for parse failures.
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl SyncFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
            column: None,
        }
    }

    fn io(context: &str, path: &Path, err: io::Error) -> Self {
        Self::new(
            FailureKind::Io,
            format!("{context} {}: {err}", path.display()),
        )
    }
}

impl From<ParseError> for SyncFailure {
    fn from(err: ParseError) -> Self {
        Self {
            kind: FailureKind::Parse,
            message: err.message,
            line: Some(err.line),
            column: Some(err.column),
        }
    }
}

impl From<ConversionError> for SyncFailure {
    fn from(err: ConversionError) -> Self {
        Self::new(FailureKind::Conversion, err.message)
    }
}

impl From<GenerationError> for SyncFailure {
    fn from(err: GenerationError) -> Self {
        Self::new(FailureKind::Generation, err.message)
    }
}

impl From<StorageError> for SyncFailure {
    fn from(err: StorageError) -> Self {
        Self::new(FailureKind::Io, err.to_string())
    }
}

impl From<TaskError> for SyncFailure {
    fn from(err: TaskError) -> Self {
        let kind = match err {
            TaskError::Timeout(_) => FailureKind::Timeout,
            TaskError::WorkerCrashed { .. } | TaskError::Cancelled | TaskError::PoolClosed => {
                FailureKind::Worker
            }
        };
        Self::new(kind, err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// A new target file was written.
    Synced,
    /// The IR matched the latest stored version; nothing was generated or written.
    Unchanged,
    /// The artifact's history (and, in single-authority modes, its generated file) was removed.
    Deleted,
    /// The event was caused by the engine's own write.
    Echo,
    /// The path is not tracked, or its side is not authoritative.
    Ignored,
    /// The artifact has an unresolved conflict.
    Conflicted,
    /// The batch was cancelled before this change ran.
    Cancelled,
    Failed(SyncFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
    pub artifact_id: Option<ArtifactId>,
    pub side: Side,
    pub source_path: PathBuf,
    pub status: SyncStatus,
    /// The stored IR version this run produced or compared against.
    pub version: Option<u32>,
    pub target_path: Option<PathBuf>,
    pub duration: Duration,
}

impl SyncResult {
    pub fn new(source_path: impl Into<PathBuf>, side: Side, status: SyncStatus) -> Self {
        Self {
            artifact_id: None,
            side,
            source_path: source_path.into(),
            status,
            version: None,
            target_path: None,
            duration: Duration::ZERO,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    pub fn failure(&self) -> Option<&SyncFailure> {
        match &self.status {
            SyncStatus::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub runs: u64,
    pub writes: u64,
    pub unchanged: u64,
    pub echoes: u64,
    pub deletes: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    runs: AtomicU64,
    writes: AtomicU64,
    unchanged: AtomicU64,
    echoes: AtomicU64,
    deletes: AtomicU64,
    failures: AtomicU64,
}

/// What the engine last did to a target path, so the watcher event it causes can be
/// recognised.
#[derive(Debug, Clone)]
enum WriteMark {
    Content(String),
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ChainKey {
    Artifact(ArtifactId),
    Path(PathBuf),
}

struct Inner {
    collaborators: Collaborators,
    cache: Arc<ConversionCache>,
    store: Arc<IrStore>,
    processor: ParallelProcessor,
    progress: ProgressTracker,
    mode: AuthorityMode,
    batch_threshold: usize,
    locks: Mutex<HashMap<ArtifactId, Arc<tokio::sync::Mutex<()>>>>,
    states: Mutex<HashMap<ArtifactId, SyncState>>,
    written: Mutex<HashMap<PathBuf, WriteMark>>,
    /// Targets whose latest stored version has not been written yet.
    stale_targets: Mutex<HashSet<PathBuf>>,
    counters: Counters,
    next_batch: AtomicU64,
}

/// Runs the per-artifact pipeline: parse, convert, validate, diff, version, generate, write.
///
/// Runs for one artifact are serialized through a per-artifact async lock; runs for different
/// artifacts proceed concurrently and share the worker pool. Per-artifact failures never
/// escape as errors; they come back as [`SyncStatus::Failed`].
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(
        config: &SyncConfig,
        collaborators: Collaborators,
        cache: Arc<ConversionCache>,
        store: Arc<IrStore>,
        processor: ParallelProcessor,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                collaborators,
                cache,
                store,
                processor,
                progress,
                mode: config.mode,
                batch_threshold: config.progress.batch_threshold.max(1),
                locks: Mutex::default(),
                states: Mutex::default(),
                written: Mutex::default(),
                stale_targets: Mutex::default(),
                counters: Counters::default(),
                next_batch: AtomicU64::new(1),
            }),
        }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.inner.collaborators
    }

    pub fn cache(&self) -> &Arc<ConversionCache> {
        &self.inner.cache
    }

    pub fn store(&self) -> &Arc<IrStore> {
        &self.inner.store
    }

    pub fn processor(&self) -> &ParallelProcessor {
        &self.inner.processor
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.inner.progress
    }

    pub fn state(&self, id: &ArtifactId) -> SyncState {
        self.inner
            .states
            .lock()
            .get(id)
            .copied()
            .unwrap_or(SyncState::Idle)
    }

    pub fn stats(&self) -> EngineStats {
        let counters = &self.inner.counters;
        EngineStats {
            runs: counters.runs.load(Ordering::Relaxed),
            writes: counters.writes.load(Ordering::Relaxed),
            unchanged: counters.unchanged.load(Ordering::Relaxed),
            echoes: counters.echoes.load(Ordering::Relaxed),
            deletes: counters.deletes.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Whether `event` was caused by one of the engine's own writes or deletions.
    pub fn is_echo(&self, event: &ChangeEvent) -> bool {
        let mark = self.inner.written.lock().get(&event.path).cloned();
        let echo = match (event.kind, mark) {
            (ChangeKind::Remove, Some(WriteMark::Removed)) => {
                self.inner.written.lock().remove(&event.path);
                true
            }
            (ChangeKind::Add | ChangeKind::Change, Some(WriteMark::Content(hash))) => {
                std::fs::read(&event.path).is_ok_and(|bytes| content_hash(bytes) == hash)
            }
            _ => false,
        };
        if echo {
            self.inner.counters.echoes.fetch_add(1, Ordering::Relaxed);
        }
        echo
    }

    pub async fn process_change(&self, change: &QueuedChange) -> SyncResult {
        let event = &change.event;
        self.run(&event.path, event.side, event.kind, false).await
    }

    /// Syncs `path` from `side`. With `force`, the echo check is skipped and the target is
    /// regenerated and rewritten even when the IR is unchanged.
    pub async fn sync_path(&self, path: &Path, side: Side, force: bool) -> SyncResult {
        self.run(path, side, ChangeKind::Change, force).await
    }

    /// Runs a batch in priority order.
    ///
    /// Changes for the same artifact run one after another in batch order; different
    /// artifacts run concurrently. Batches of at least the configured threshold are tracked in
    /// the [`ProgressTracker`]; cancelling that entry stops the remaining changes, which come
    /// back as [`SyncStatus::Cancelled`]. Results are returned in the sorted batch order.
    pub async fn process_batch(&self, mut changes: Vec<QueuedChange>) -> Vec<SyncResult> {
        changes.sort_by_key(|change| change.priority);
        let total = changes.len();
        if total == 0 {
            return Vec::new();
        }

        let tracked = total >= self.inner.batch_threshold;
        let batch_id = format!(
            "batch-{}",
            self.inner.next_batch.fetch_add(1, Ordering::Relaxed)
        );
        let token = if tracked {
            self.inner
                .progress
                .start(batch_id.clone(), total, format!("syncing {total} changes"))
        } else {
            CancellationToken::new()
        };

        let events: Vec<ChangeEvent> = changes.iter().map(|c| c.event.clone()).collect();
        let mut chains: IndexMap<ChainKey, Vec<(usize, QueuedChange)>> = IndexMap::new();
        for (idx, change) in changes.into_iter().enumerate() {
            let key = match self
                .inner
                .collaborators
                .naming
                .to_artifact_id(&change.event.path)
            {
                Some(id) => ChainKey::Artifact(id),
                None => ChainKey::Path(change.event.path.clone()),
            };
            chains.entry(key).or_default().push((idx, change));
        }

        let handles: Vec<_> = chains
            .into_values()
            .map(|chain| {
                let engine = self.clone();
                let token = token.clone();
                let batch_id = batch_id.clone();
                tokio::spawn(async move {
                    let mut out = Vec::with_capacity(chain.len());
                    for (idx, change) in chain {
                        let result = if token.is_cancelled() {
                            engine.skipped(&change.event, SyncStatus::Cancelled)
                        } else {
                            engine.process_change(&change).await
                        };
                        if tracked {
                            engine.inner.progress.increment(&batch_id, None);
                        }
                        out.push((idx, result));
                    }
                    out
                })
            })
            .collect();

        let mut results: Vec<Option<SyncResult>> = (0..total).map(|_| None).collect();
        for handle in handles {
            match handle.await {
                Ok(out) => {
                    for (idx, result) in out {
                        results[idx] = Some(result);
                    }
                }
                Err(err) => {
                    tracing::error!(
                        target = "uisync.sync",
                        batch = %batch_id,
                        error = %err,
                        "batch chain aborted"
                    );
                }
            }
        }

        if tracked && !token.is_cancelled() {
            self.inner.progress.complete(&batch_id);
        }

        results
            .into_iter()
            .zip(events)
            .map(|(result, event)| {
                result.unwrap_or_else(|| {
                    self.skipped(
                        &event,
                        SyncStatus::Failed(SyncFailure::new(
                            FailureKind::Worker,
                            "batch task aborted",
                        )),
                    )
                })
            })
            .collect()
    }

    /// A result for a change that is reported without running the pipeline.
    pub fn skipped(&self, event: &ChangeEvent, status: SyncStatus) -> SyncResult {
        let mut result = SyncResult::new(event.path.clone(), event.side, status);
        result.artifact_id = self
            .inner
            .collaborators
            .naming
            .to_artifact_id(&event.path);
        result
    }

    async fn run(&self, path: &Path, side: Side, kind: ChangeKind, force: bool) -> SyncResult {
        let started = Instant::now();
        let mut result = SyncResult::new(path, side, SyncStatus::Ignored);

        let Some(id) = self.inner.collaborators.naming.to_artifact_id(path) else {
            tracing::debug!(
                target = "uisync.sync",
                path = %path.display(),
                "path does not map to an artifact"
            );
            result.duration = started.elapsed();
            return result;
        };
        result.artifact_id = Some(id.clone());

        let lock = self.lock_for(&id);
        let guard = Arc::clone(&lock).lock_owned().await;
        let _slot = RunSlot {
            engine: self,
            id: id.clone(),
            lock,
            guard: Some(guard),
        };
        self.inner.counters.runs.fetch_add(1, Ordering::Relaxed);

        let outcome = if kind == ChangeKind::Remove {
            self.delete(&id, side, path, &mut result)
        } else {
            self.convert_and_write(&id, side, path, force, &mut result)
                .await
        };

        let counters = &self.inner.counters;
        result.status = match outcome {
            Ok(status) => {
                match status {
                    SyncStatus::Synced => counters.writes.fetch_add(1, Ordering::Relaxed),
                    SyncStatus::Unchanged => counters.unchanged.fetch_add(1, Ordering::Relaxed),
                    SyncStatus::Deleted => counters.deletes.fetch_add(1, Ordering::Relaxed),
                    SyncStatus::Echo => counters.echoes.fetch_add(1, Ordering::Relaxed),
                    _ => 0,
                };
                status
            }
            Err(failure) => {
                self.set_state(&id, SyncState::Error);
                counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target = "uisync.sync",
                    artifact = %id,
                    path = %path.display(),
                    kind = ?failure.kind,
                    line = ?failure.line,
                    column = ?failure.column,
                    error = %failure.message,
                    "sync failed"
                );
                SyncStatus::Failed(failure)
            }
        };

        result.duration = started.elapsed();
        tracing::debug!(
            target = "uisync.sync",
            artifact = %id,
            status = ?result.status,
            duration_ms = result.duration_ms(),
            "sync finished"
        );
        result
    }

    async fn convert_and_write(
        &self,
        id: &ArtifactId,
        side: Side,
        path: &Path,
        force: bool,
        result: &mut SyncResult,
    ) -> Result<SyncStatus, SyncFailure> {
        let inner = &self.inner;
        self.set_state(id, SyncState::Parsing);

        let read = std::fs::metadata(path).and_then(|meta| Ok((meta, std::fs::read(path)?)));
        let (meta, bytes) = match read {
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::NotFound && !force => {
                return self.delete(id, side, path, result);
            }
            Err(err) => return Err(SyncFailure::io("failed to read", path, err)),
        };
        if !force && self.matches_write(path, &bytes) {
            return Ok(SyncStatus::Echo);
        }
        let source = decode(path, bytes)?;
        let fingerprint = Fingerprint::from_metadata(path, &meta);
        let ir = self.source_ir(side, path, source, fingerprint).await?;

        self.set_state(id, SyncState::Validating);
        let report = inner.collaborators.validator.validate(&ir);
        if !report.valid {
            return Err(SyncFailure::new(FailureKind::Validation, report.summary()));
        }

        self.set_state(id, SyncState::Diffing);
        let target_side = side.opposite();
        let target = inner.collaborators.naming.to_path(id, target_side);
        match inner.store.append_if_changed(id, &ir, side)? {
            Some(stored) => {
                result.version = Some(stored.version);
                inner.stale_targets.lock().insert(target.clone());
            }
            None => {
                result.version = inner.store.latest_version(id);
                let stale = inner.stale_targets.lock().contains(&target) || !target.exists();
                if !force && !stale {
                    return Ok(SyncStatus::Unchanged);
                }
            }
        }

        self.set_state(id, SyncState::Generating);
        let generator = Arc::clone(&inner.collaborators.side(target_side).generator);
        let task_ir = Arc::clone(&ir);
        let task = Task::generate(id.to_string(), move |_| generator.generate(&task_ir));
        let text = inner.processor.process(task).await??;

        self.set_state(id, SyncState::Writing);
        self.write_target(&target, text.as_bytes())
            .map_err(|err| SyncFailure::io("failed to write", &target, err))?;
        inner.stale_targets.lock().remove(&target);
        result.target_path = Some(target);
        Ok(SyncStatus::Synced)
    }

    /// Parses and converts `path` without storing or writing anything.
    ///
    /// Goes through the same caches and worker pool as a sync run, and validates the result.
    pub async fn load_ir(&self, path: &Path, side: Side) -> Result<Arc<ComponentIr>, SyncFailure> {
        let read = std::fs::metadata(path).and_then(|meta| Ok((meta, std::fs::read(path)?)));
        let (meta, bytes) = read.map_err(|err| SyncFailure::io("failed to read", path, err))?;
        let source = decode(path, bytes)?;
        let ir = self
            .source_ir(side, path, source, Fingerprint::from_metadata(path, &meta))
            .await?;
        let report = self.inner.collaborators.validator.validate(&ir);
        if !report.valid {
            return Err(SyncFailure::new(FailureKind::Validation, report.summary()));
        }
        Ok(ir)
    }

    /// IR for `source`, from the IR cache, the AST cache or a fresh parse on the pool.
    async fn source_ir(
        &self,
        side: Side,
        path: &Path,
        source: String,
        fingerprint: Fingerprint,
    ) -> Result<Arc<ComponentIr>, SyncFailure> {
        let inner = &self.inner;
        if let Some(ir) = inner.cache.get_ir(path, fingerprint) {
            return Ok(ir);
        }
        let collaborators = inner.collaborators.side(side);
        let ast = match inner.cache.get_ast(path, fingerprint) {
            Some(ast) => ast,
            None => {
                let parser = Arc::clone(&collaborators.parser);
                let task_path = path.to_path_buf();
                let task = Task::parse(path.display().to_string(), move |_| {
                    parser.parse(&source, &task_path)
                });
                let ast = Arc::new(inner.processor.process(task).await??);
                inner.cache.set_ast(path, fingerprint, Arc::clone(&ast));
                ast
            }
        };
        let ir = Arc::new(collaborators.to_ir.convert(&ast)?);
        inner.cache.set_ir(path, fingerprint, Arc::clone(&ir));
        Ok(ir)
    }

    fn delete(
        &self,
        id: &ArtifactId,
        side: Side,
        path: &Path,
        result: &mut SyncResult,
    ) -> Result<SyncStatus, SyncFailure> {
        let inner = &self.inner;
        inner.cache.invalidate(path);
        inner.written.lock().remove(path);
        inner.store.delete(id)?;
        inner
            .stale_targets
            .lock()
            .remove(&inner.collaborators.naming.to_path(id, side.opposite()));

        if inner.mode.authority() == Some(side) {
            let target = inner.collaborators.naming.to_path(id, side.opposite());
            inner.cache.invalidate(&target);
            if target.exists() {
                self.set_state(id, SyncState::Writing);
                inner
                    .written
                    .lock()
                    .insert(target.clone(), WriteMark::Removed);
                if remove_file_best_effort(&target, "sync.delete_generated") {
                    result.target_path = Some(target);
                } else {
                    inner.written.lock().remove(&target);
                }
            }
        }
        tracing::info!(
            target = "uisync.sync",
            artifact = %id,
            side = %side,
            "artifact removed"
        );
        Ok(SyncStatus::Deleted)
    }

    fn matches_write(&self, path: &Path, bytes: &[u8]) -> bool {
        match self.inner.written.lock().get(path) {
            Some(WriteMark::Content(hash)) => *hash == content_hash(bytes),
            _ => false,
        }
    }

    fn write_target(&self, target: &Path, bytes: &[u8]) -> io::Result<()> {
        // Marked before the rename so the watcher event can never outrun the mark.
        self.inner
            .written
            .lock()
            .insert(target.to_path_buf(), WriteMark::Content(content_hash(bytes)));
        if let Err(err) = atomic_write(target, bytes) {
            self.inner.written.lock().remove(target);
            return Err(err);
        }
        self.inner.cache.invalidate(target);
        Ok(())
    }

    fn set_state(&self, id: &ArtifactId, state: SyncState) {
        let mut states = self.inner.states.lock();
        if state == SyncState::Idle {
            states.remove(id);
        } else {
            states.insert(id.clone(), state);
        }
    }

    fn lock_for(&self, id: &ArtifactId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.inner.locks.lock().entry(id.clone()).or_default())
    }

    fn release_lock(&self, id: &ArtifactId, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.inner.locks.lock();
        // Only the map and this handle remain: nobody is waiting on it.
        if Arc::strong_count(lock) == 2 {
            locks.remove(id);
        }
    }
}

/// One artifact's turn in the pipeline. Dropping it, including when the run future is dropped
/// part-way, resets the artifact's state and releases its lock.
struct RunSlot<'a> {
    engine: &'a SyncEngine,
    id: ArtifactId,
    lock: Arc<tokio::sync::Mutex<()>>,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        self.engine.set_state(&self.id, SyncState::Idle);
        self.guard.take();
        self.engine.release_lock(&self.id, &self.lock);
    }
}

fn decode(path: &Path, bytes: Vec<u8>) -> Result<String, SyncFailure> {
    String::from_utf8(bytes).map_err(|err| {
        SyncFailure::new(
            FailureKind::Io,
            format!("{} is not valid UTF-8: {err}", path.display()),
        )
    })
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("mode", &self.inner.mode)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
