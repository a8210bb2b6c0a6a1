use std::path::PathBuf;

use thiserror::Error;
use uisync_config::ConfigError;
use uisync_core::ArtifactId;
use uisync_storage::StorageError;
use uisync_vfs::WatchError;

/// Infrastructure failures. Per-artifact problems never surface here; they are reported as
/// [`crate::SyncStatus::Failed`] results instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to create storage directory {}: {source}", path.display())]
    StorageRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error("no file watcher backend configured")]
    NoWatcherBackend,
    #[error("no unresolved conflict for artifact {0}")]
    NoConflict(ArtifactId),
    #[error("coordinator is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, SyncError>;
