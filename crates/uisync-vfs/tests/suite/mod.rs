#[cfg(feature = "watch-notify")]
mod notify_backend;
mod side_watcher;
