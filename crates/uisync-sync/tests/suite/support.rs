use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uisync_cache::ConversionCache;
use uisync_config::SyncConfig;
use uisync_core::{now_millis, ArtifactId, ChangeEvent, ChangeKind, Side};
use uisync_scheduler::{ParallelProcessor, ProgressTracker};
use uisync_storage::IrStore;
use uisync_sync::{Priority, QueuedChange, SyncEngine, SyncResult};
use uisync_test_utils::{TestWorkspace, ToyCollaborators};

pub fn change(path: &Path, side: Side, kind: ChangeKind) -> QueuedChange {
    QueuedChange::new(
        ChangeEvent::new(path, side, kind, now_millis()),
        Priority::High,
    )
}

pub fn id(name: &str) -> ArtifactId {
    ArtifactId::new(name).unwrap()
}

/// A workspace plus an engine wired to toy collaborators.
pub struct EngineHarness {
    pub ws: TestWorkspace,
    pub toys: ToyCollaborators,
    pub engine: SyncEngine,
}

impl EngineHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut SyncConfig)) -> Self {
        let mut ws = TestWorkspace::new();
        configure(&mut ws.config);
        let config = &ws.config;
        let toys = ToyCollaborators::for_config(config);
        let engine = SyncEngine::new(
            config,
            toys.collaborators(),
            Arc::new(ConversionCache::new(&config.cache)),
            Arc::new(IrStore::open(&config.storage_root).unwrap()),
            ParallelProcessor::new(&config.processor),
            ProgressTracker::new(),
        );
        Self { ws, toys, engine }
    }

    pub async fn sync(&self, side: Side, rel: &str, kind: ChangeKind) -> SyncResult {
        let path = self.ws.path(side, rel);
        self.engine.process_change(&change(&path, side, kind)).await
    }
}

/// Collects values delivered to a subscriber callback.
#[derive(Clone)]
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, value: T) {
        self.seen.lock().push(value);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.seen.lock().clone()
    }

    /// Polls until `pred` holds for the collected values.
    pub async fn wait_for(&self, pred: impl Fn(&[T]) -> bool) -> Vec<T> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let seen = self.snapshot();
            if pred(&seen) {
                return seen;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for condition"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
