//! File-system observation for both sides of a synchronized workspace.
//!
//! Backends implement [`FileWatcher`] and produce normalized [`FileChange`]s. [`SideWatcher`]
//! sits on top: it maps paths to sides, applies include/exclude globs, stabilizes rapid writes
//! and fans the resulting [`uisync_core::ChangeEvent`]s out to subscribers.

mod change;
mod error;
mod filter;
#[cfg(any(test, feature = "watch-notify"))]
mod notify_backend;
mod side_watcher;
mod stabilizer;
mod watch;

pub use change::FileChange;
pub use error::WatchError;
pub use filter::{FileClass, SideFilter};
#[cfg(feature = "watch-notify")]
pub use notify_backend::{EventNormalizer, NotifyFileWatcher};
pub use side_watcher::{ChangeHandler, SideWatcher};
pub use stabilizer::Stabilizer;
pub use watch::{
    FileWatcher, ManualFileWatcher, ManualFileWatcherHandle, WatchEvent, WatchMessage, WatchMode,
};
