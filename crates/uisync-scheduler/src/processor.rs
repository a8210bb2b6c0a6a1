use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uisync_config::ProcessorConfig;
use uisync_core::panic_payload_to_str;

use crate::task::{Task, TaskError, TaskId, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessorStats {
    /// Live worker threads, including ones still finishing a timed-out task.
    pub workers: usize,
    pub busy: usize,
    /// Tasks waiting for a free worker.
    pub queued: usize,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Workers replaced after a crash or a timeout.
    pub recycled: u64,
}

enum JobOutcome {
    Done,
    Panicked,
}

struct Job {
    task_id: TaskId,
    kind: TaskKind,
    started: oneshot::Sender<()>,
    run: Box<dyn FnOnce() -> JobOutcome + Send>,
    /// Set when the waiter gave up on this job; the worker exits once the job returns.
    retired: Arc<AtomicBool>,
}

struct Shared {
    jobs: Receiver<Job>,
    live: AtomicUsize,
    busy: AtomicUsize,
    queued: AtomicUsize,
    next_worker: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    recycled: AtomicU64,
}

struct Inner {
    tx: Sender<Job>,
    shared: Arc<Shared>,
    inline: bool,
    task_timeout: Duration,
    parallel_threshold: usize,
}

/// Bounded pool of OS worker threads for CPU-bound parse/generate work.
///
/// Tasks queue FIFO when every worker is busy. Each task runs under a timeout; a task that
/// overruns fails with [`TaskError::Timeout`] and its worker is retired and replaced. A task
/// that panics takes its worker down with it: the worker is replaced and the task is retried
/// once on the fresh worker before [`TaskError::WorkerCrashed`] is surfaced.
#[derive(Clone)]
pub struct ParallelProcessor {
    inner: Arc<Inner>,
}

impl ParallelProcessor {
    pub fn new(config: &ProcessorConfig) -> Self {
        let workers = config.effective_max_workers();
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            jobs: rx,
            live: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            next_worker: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
        });

        let spawned = (0..workers).filter(|_| spawn_worker(&shared)).count();
        let inline = spawned == 0;
        if inline {
            // Without any worker thread, tasks still run (on the caller) so sync keeps working.
            tracing::error!(
                target = "uisync.scheduler",
                requested = workers,
                "failed to spawn any worker thread; running tasks inline"
            );
        } else {
            tracing::debug!(
                target = "uisync.scheduler",
                workers = spawned,
                "parallel processor started"
            );
        }

        Self {
            inner: Arc::new(Inner {
                tx,
                shared,
                inline,
                task_timeout: config.task_timeout(),
                parallel_threshold: config.parallel_threshold.max(1),
            }),
        }
    }

    pub fn task_timeout(&self) -> Duration {
        self.inner.task_timeout
    }

    pub fn stats(&self) -> ProcessorStats {
        let shared = &self.inner.shared;
        ProcessorStats {
            workers: shared.live.load(Ordering::Acquire),
            busy: shared.busy.load(Ordering::Acquire),
            queued: shared.queued.load(Ordering::Acquire),
            completed: shared.completed.load(Ordering::Relaxed),
            failed: shared.failed.load(Ordering::Relaxed),
            timed_out: shared.timed_out.load(Ordering::Relaxed),
            recycled: shared.recycled.load(Ordering::Relaxed),
        }
    }

    /// Runs one task on the pool.
    pub async fn process<T: Send + 'static>(&self, task: Task<T>) -> Result<T, TaskError> {
        let result = match self.attempt(&task).await {
            Err(TaskError::WorkerCrashed { message }) => {
                tracing::warn!(
                    target = "uisync.scheduler",
                    task = %task.id,
                    kind = task.kind.as_str(),
                    label = %task.label,
                    panic = %message,
                    "retrying crashed task on a fresh worker"
                );
                self.attempt(&task).await
            }
            other => other,
        };
        self.record(&result);
        result
    }

    /// Runs a batch of tasks, returning results in input order.
    ///
    /// Batches smaller than the configured parallel threshold run one after another instead of
    /// fanning out across the pool. Both paths apply the same timeout and crash retry.
    pub async fn process_many<T: Send + 'static>(
        &self,
        tasks: Vec<Task<T>>,
    ) -> Vec<Result<T, TaskError>> {
        if tasks.len() < self.inner.parallel_threshold {
            let mut results = Vec::with_capacity(tasks.len());
            for task in tasks {
                results.push(self.process(task).await);
            }
            return results;
        }

        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| {
                let this = self.clone();
                tokio::spawn(async move { this.process(task).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => Err(TaskError::Cancelled),
                Err(err) => Err(TaskError::WorkerCrashed {
                    message: err.to_string(),
                }),
            });
        }
        results
    }

    fn record<T>(&self, result: &Result<T, TaskError>) {
        let shared = &self.inner.shared;
        match result {
            Ok(_) => shared.completed.fetch_add(1, Ordering::Relaxed),
            Err(TaskError::Timeout(_)) => shared.timed_out.fetch_add(1, Ordering::Relaxed),
            Err(_) => shared.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    async fn attempt<T: Send + 'static>(&self, task: &Task<T>) -> Result<T, TaskError> {
        if self.inner.inline {
            return self.run_inline(task).await;
        }

        let token = CancellationToken::new();
        let (started_tx, started_rx) = oneshot::channel();
        let (result_tx, result_rx) = oneshot::channel::<Result<T, String>>();
        let retired = Arc::new(AtomicBool::new(false));

        let job_fn = task.job.clone();
        let token_for_job = token.clone();
        let task_id = task.id;
        let kind = task.kind;
        let run = move || match catch_unwind(AssertUnwindSafe(|| job_fn(&token_for_job))) {
            Ok(value) => {
                let _ = result_tx.send(Ok(value));
                JobOutcome::Done
            }
            Err(panic) => {
                let message = panic_payload_to_str(&*panic).to_owned();
                tracing::error!(
                    target = "uisync.scheduler",
                    task = %task_id,
                    kind = kind.as_str(),
                    panic = %message,
                    "task panicked"
                );
                let _ = result_tx.send(Err(message));
                JobOutcome::Panicked
            }
        };

        self.inner.shared.queued.fetch_add(1, Ordering::AcqRel);
        let job = Job {
            task_id,
            kind,
            started: started_tx,
            run: Box::new(run),
            retired: retired.clone(),
        };
        if self.inner.tx.send(job).is_err() {
            self.inner.shared.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(TaskError::PoolClosed);
        }

        if started_rx.await.is_err() {
            return Err(TaskError::PoolClosed);
        }

        match tokio::time::timeout(self.inner.task_timeout, result_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(TaskError::WorkerCrashed { message }),
            Ok(Err(_)) => Err(TaskError::WorkerCrashed {
                message: "worker exited without a result".to_owned(),
            }),
            Err(_elapsed) => {
                token.cancel();
                retired.store(true, Ordering::Release);
                self.inner.shared.recycled.fetch_add(1, Ordering::Relaxed);
                let replaced = spawn_worker(&self.inner.shared);
                tracing::warn!(
                    target = "uisync.scheduler",
                    task = %task.id,
                    kind = task.kind.as_str(),
                    label = %task.label,
                    timeout_ms = self.inner.task_timeout.as_millis() as u64,
                    replaced,
                    "task timed out; recycling its worker"
                );
                Err(TaskError::Timeout(self.inner.task_timeout))
            }
        }
    }

    /// Fallback when no worker thread could be spawned: runs on tokio's blocking pool under the
    /// same timeout.
    async fn run_inline<T: Send + 'static>(&self, task: &Task<T>) -> Result<T, TaskError> {
        let token = CancellationToken::new();
        let job = task.job.clone();
        let job_token = token.clone();
        let handle =
            tokio::task::spawn_blocking(move || catch_unwind(AssertUnwindSafe(|| job(&job_token))));
        match tokio::time::timeout(self.inner.task_timeout, handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(panic))) => {
                let message = panic_payload_to_str(&*panic).to_owned();
                tracing::error!(
                    target = "uisync.scheduler",
                    task = %task.id,
                    kind = task.kind.as_str(),
                    panic = %message,
                    "inline task panicked"
                );
                Err(TaskError::WorkerCrashed { message })
            }
            Ok(Err(err)) => Err(TaskError::WorkerCrashed {
                message: err.to_string(),
            }),
            Err(_elapsed) => {
                token.cancel();
                tracing::warn!(
                    target = "uisync.scheduler",
                    task = %task.id,
                    kind = task.kind.as_str(),
                    timeout_ms = self.inner.task_timeout.as_millis() as u64,
                    "inline task timed out"
                );
                Err(TaskError::Timeout(self.inner.task_timeout))
            }
        }
    }
}

/// Starts one worker thread. Returns `false` when the OS refused to create it.
fn spawn_worker(shared: &Arc<Shared>) -> bool {
    let idx = shared.next_worker.fetch_add(1, Ordering::Relaxed);
    let shared_for_thread = shared.clone();
    shared.live.fetch_add(1, Ordering::AcqRel);
    let spawned = std::thread::Builder::new()
        .name(format!("uisync-worker-{idx}"))
        .spawn(move || worker_loop(shared_for_thread, idx));
    match spawned {
        Ok(_) => true,
        Err(err) => {
            shared.live.fetch_sub(1, Ordering::AcqRel);
            tracing::error!(
                target = "uisync.scheduler",
                worker = idx,
                error = %err,
                "failed to spawn worker thread"
            );
            false
        }
    }
}

fn worker_loop(shared: Arc<Shared>, idx: usize) {
    while let Ok(job) = shared.jobs.recv() {
        shared.queued.fetch_sub(1, Ordering::AcqRel);
        if job.started.send(()).is_err() {
            // The waiter is gone; nobody wants the result.
            continue;
        }

        shared.busy.fetch_add(1, Ordering::AcqRel);
        let outcome = (job.run)();
        shared.busy.fetch_sub(1, Ordering::AcqRel);

        match outcome {
            JobOutcome::Panicked => {
                shared.recycled.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target = "uisync.scheduler",
                    worker = idx,
                    task = %job.task_id,
                    kind = job.kind.as_str(),
                    "worker crashed; replacing it"
                );
                spawn_worker(&shared);
                break;
            }
            JobOutcome::Done if job.retired.load(Ordering::Acquire) => {
                tracing::debug!(
                    target = "uisync.scheduler",
                    worker = idx,
                    task = %job.task_id,
                    "retired worker finished its timed-out task"
                );
                break;
            }
            JobOutcome::Done => {}
        }
    }
    shared.live.fetch_sub(1, Ordering::AcqRel);
}
