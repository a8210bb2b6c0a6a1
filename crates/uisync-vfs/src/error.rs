use std::path::PathBuf;

use thiserror::Error;
use uisync_core::Side;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("invalid glob {pattern:?} for side {side}: {message}")]
    InvalidGlob {
        side: Side,
        pattern: String,
        message: String,
    },
    #[error("failed to create watch root {}: {source}", path.display())]
    CreateRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no watch root could be bound ({})", failures.join("; "))]
    NoRootsBound { failures: Vec<String> },
    #[error("watcher already started")]
    AlreadyStarted,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
