use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Parse,
    Generate,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Parse => "parse",
            TaskKind::Generate => "generate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task exceeded its {0:?} budget")]
    Timeout(Duration),
    #[error("worker crashed: {message}")]
    WorkerCrashed { message: String },
    #[error("task cancelled")]
    Cancelled,
    #[error("worker pool is shut down")]
    PoolClosed,
}

type JobFn<T> = dyn Fn(&CancellationToken) -> T + Send + Sync;

/// A unit of CPU-bound work for the [`crate::ParallelProcessor`].
///
/// The job is a shared `Fn` so the pool can rerun it once on a fresh worker after a crash. It
/// receives a token that is cancelled when the task times out; honoring it is optional.
pub struct Task<T> {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Human-readable description of the input, used in logs.
    pub label: String,
    pub enqueued_at: Instant,
    pub(crate) job: Arc<JobFn<T>>,
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl<T> Task<T> {
    pub fn new<F>(kind: TaskKind, label: impl Into<String>, job: F) -> Self
    where
        F: Fn(&CancellationToken) -> T + Send + Sync + 'static,
    {
        Self {
            id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)),
            kind,
            label: label.into(),
            enqueued_at: Instant::now(),
            job: Arc::new(job),
        }
    }

    pub fn parse<F>(label: impl Into<String>, job: F) -> Self
    where
        F: Fn(&CancellationToken) -> T + Send + Sync + 'static,
    {
        Self::new(TaskKind::Parse, label, job)
    }

    pub fn generate<F>(label: impl Into<String>, job: F) -> Self
    where
        F: Fn(&CancellationToken) -> T + Send + Sync + 'static,
    {
        Self::new(TaskKind::Generate, label, job)
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
