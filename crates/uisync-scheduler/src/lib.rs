//! Execution plumbing for the sync core: the bounded [`ParallelProcessor`] worker pool for
//! CPU-bound parse/generate tasks, and the [`ProgressTracker`] for batch operations.

mod processor;
mod progress;
mod task;

pub use processor::{ParallelProcessor, ProcessorStats};
pub use progress::{
    ProgressHandler, ProgressReceiver, ProgressState, ProgressTracker, ProgressUpdate,
};
pub use task::{Task, TaskError, TaskId, TaskKind};
pub use tokio_util::sync::CancellationToken;
