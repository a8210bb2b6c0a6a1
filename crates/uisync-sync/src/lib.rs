//! The synchronization core: change queueing, conflict detection, the per-artifact conversion
//! pipeline and the authority-mode coordinator that wires them to the file watcher.
//!
//! ```text
//! SideWatcher ─▶ ModeCoordinator ─▶ ChangeQueue ─▶ ConflictDetector ─▶ SyncEngine
//!                 (echo / mode)                      (bidirectional)     parse ▸ IR ▸ validate
//!                                                                         ▸ version ▸ generate ▸ write
//! ```

mod conflict;
mod coordinator;
mod engine;
mod error;
mod queue;

pub use conflict::{ConflictDetector, ConflictReason, ConflictRecord, Resolution};
pub use coordinator::{
    ConflictHandler, CoordinatorBuilder, CoordinatorStats, ModeCoordinator, StatusHandler,
};
pub use engine::{
    EngineStats, FailureKind, SyncEngine, SyncFailure, SyncResult, SyncState, SyncStatus,
};
pub use error::{Result, SyncError};
pub use queue::{ChangeQueue, Priority, QueuedChange};
