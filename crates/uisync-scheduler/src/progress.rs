use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    Running,
    Completed,
    Cancelled,
}

/// Snapshot of one tracked operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub id: String,
    pub label: String,
    pub current: usize,
    pub total: usize,
    /// 0.0..=100.0
    pub percentage: f64,
    pub elapsed: Duration,
    /// Linear extrapolation from the average time per completed unit; `None` before the first
    /// unit completes.
    pub eta: Option<Duration>,
    pub state: ProgressState,
}

#[derive(Debug)]
struct Entry {
    label: String,
    current: usize,
    total: usize,
    started_at: Instant,
    token: CancellationToken,
}

impl Entry {
    fn snapshot(&self, id: &str, state: ProgressState, now: Instant) -> ProgressUpdate {
        let elapsed = now.saturating_duration_since(self.started_at);
        let percentage = if self.total == 0 {
            100.0
        } else {
            (self.current as f64 / self.total as f64 * 100.0).min(100.0)
        };
        let eta = match state {
            ProgressState::Running if self.current > 0 => {
                let remaining = self.total.saturating_sub(self.current) as f64;
                Some(elapsed.mul_f64(remaining / self.current as f64))
            }
            ProgressState::Running => None,
            ProgressState::Completed | ProgressState::Cancelled => Some(Duration::ZERO),
        };
        ProgressUpdate {
            id: id.to_owned(),
            label: self.label.clone(),
            current: self.current,
            total: self.total,
            percentage,
            elapsed,
            eta,
            state,
        }
    }
}

pub type ProgressHandler = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;
pub type ProgressReceiver = broadcast::Receiver<ProgressUpdate>;

/// Percentage/ETA tracking for batch operations, fanned out to handlers and a broadcast
/// channel.
///
/// Each started operation carries a [`CancellationToken`]; [`ProgressTracker::cancel`] trips it
/// so the batch driver can stop dispatching.
#[derive(Clone)]
pub struct ProgressTracker {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    handlers: Arc<RwLock<Vec<ProgressHandler>>>,
    tx: broadcast::Sender<ProgressUpdate>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            entries: Arc::default(),
            handlers: Arc::default(),
            tx,
        }
    }

    pub fn on_progress<F>(&self, handler: F)
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        self.handlers.write().push(Arc::new(handler));
    }

    pub fn subscribe(&self) -> ProgressReceiver {
        self.tx.subscribe()
    }

    /// Starts (or restarts) tracking `id`. Returns the operation's cancellation token.
    pub fn start(
        &self,
        id: impl Into<String>,
        total: usize,
        label: impl Into<String>,
    ) -> CancellationToken {
        let id = id.into();
        let token = CancellationToken::new();
        let now = Instant::now();
        let entry = Entry {
            label: label.into(),
            current: 0,
            total,
            started_at: now,
            token: token.clone(),
        };
        let update = entry.snapshot(&id, ProgressState::Running, now);
        if let Some(previous) = self.entries.lock().insert(id, entry) {
            previous.token.cancel();
        }
        self.emit(&update);
        token
    }

    /// Sets the completed unit count (clamped to the total) and optionally relabels.
    pub fn update(&self, id: &str, current: usize, label: Option<&str>) -> Option<ProgressUpdate> {
        self.mutate(id, |entry| {
            entry.current = current.min(entry.total);
            if let Some(label) = label {
                entry.label = label.to_owned();
            }
        })
    }

    pub fn increment(&self, id: &str, label: Option<&str>) -> Option<ProgressUpdate> {
        self.mutate(id, |entry| {
            entry.current = (entry.current + 1).min(entry.total);
            if let Some(label) = label {
                entry.label = label.to_owned();
            }
        })
    }

    pub fn complete(&self, id: &str) -> Option<ProgressUpdate> {
        self.finish(id, ProgressState::Completed)
    }

    /// Cancels `id`: trips its token and stops tracking it.
    pub fn cancel(&self, id: &str) -> Option<ProgressUpdate> {
        self.finish(id, ProgressState::Cancelled)
    }

    pub fn get(&self, id: &str) -> Option<ProgressUpdate> {
        let entries = self.entries.lock();
        entries
            .get(id)
            .map(|entry| entry.snapshot(id, ProgressState::Running, Instant::now()))
    }

    pub fn active(&self) -> Vec<ProgressUpdate> {
        let now = Instant::now();
        let entries = self.entries.lock();
        let mut out: Vec<_> = entries
            .iter()
            .map(|(id, entry)| entry.snapshot(id, ProgressState::Running, now))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    fn mutate(&self, id: &str, apply: impl FnOnce(&mut Entry)) -> Option<ProgressUpdate> {
        let update = {
            let mut entries = self.entries.lock();
            let entry = entries.get_mut(id)?;
            apply(entry);
            entry.snapshot(id, ProgressState::Running, Instant::now())
        };
        self.emit(&update);
        Some(update)
    }

    fn finish(&self, id: &str, state: ProgressState) -> Option<ProgressUpdate> {
        let mut entry = self.entries.lock().remove(id)?;
        match state {
            ProgressState::Completed => entry.current = entry.total,
            ProgressState::Cancelled => entry.token.cancel(),
            ProgressState::Running => {}
        }
        let update = entry.snapshot(id, state, Instant::now());
        if state == ProgressState::Cancelled {
            tracing::info!(
                target = "uisync.scheduler",
                id,
                current = update.current,
                total = update.total,
                "operation cancelled"
            );
        }
        self.emit(&update);
        Some(update)
    }

    fn emit(&self, update: &ProgressUpdate) {
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            handler(update);
        }
        let _ = self.tx.send(update.clone());
    }
}
