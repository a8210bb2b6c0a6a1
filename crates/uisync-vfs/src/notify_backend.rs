use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::EventKind;

use crate::change::FileChange;

pub(crate) fn notify_event_requests_rescan(event: &notify::Event) -> bool {
    matches!(event.attrs.flag(), Some(notify::event::Flag::Rescan))
        || (matches!(event.kind, EventKind::Other) && event.paths.is_empty())
}

/// Turns raw `notify` events into [`FileChange`]s, pairing split rename-from/rename-to events
/// into moves.
///
/// Unpaired rename-froms older than [`EventNormalizer::MAX_AGE`] are reported as deletions.
#[derive(Debug, Default)]
pub struct EventNormalizer {
    pending_renames: VecDeque<(Instant, PathBuf)>,
}

impl EventNormalizer {
    pub const MAX_AGE: Duration = Duration::from_secs(2);
    pub const MAX_PENDING_RENAMES: usize = 512;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: notify::Event, now: Instant) -> Vec<FileChange> {
        let mut out = self.gc_pending(now);

        match event.kind {
            EventKind::Create(_) => out.extend(
                event
                    .paths
                    .into_iter()
                    .map(|path| FileChange::Created { path }),
            ),
            EventKind::Remove(_) => out.extend(
                event
                    .paths
                    .into_iter()
                    .map(|path| FileChange::Deleted { path }),
            ),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut paths = event.paths.into_iter();
                while let Some(from) = paths.next() {
                    match paths.next() {
                        Some(to) => out.push(FileChange::Moved { from, to }),
                        None => out.push(FileChange::Modified { path: from }),
                    }
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in event.paths {
                    self.pending_renames.push_back((now, path));
                }
                out.extend(self.gc_pending(now));
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for to in event.paths {
                    match self.pending_renames.pop_front() {
                        Some((_, from)) => out.push(FileChange::Moved { from, to }),
                        None => out.push(FileChange::Created { path: to }),
                    }
                }
            }
            // Access events never change contents.
            EventKind::Access(_) => {}
            _ => out.extend(
                event
                    .paths
                    .into_iter()
                    .map(|path| FileChange::Modified { path }),
            ),
        }

        out
    }

    pub fn flush(&mut self, now: Instant) -> Vec<FileChange> {
        self.gc_pending(now)
    }

    pub fn flush_all(&mut self) -> Vec<FileChange> {
        self.pending_renames
            .drain(..)
            .map(|(_, path)| FileChange::Deleted { path })
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending_renames
            .front()
            .map(|(started_at, _)| *started_at + Self::MAX_AGE)
    }

    fn gc_pending(&mut self, now: Instant) -> Vec<FileChange> {
        let mut out = Vec::new();
        while let Some((t, _)) = self.pending_renames.front() {
            if now.saturating_duration_since(*t) <= Self::MAX_AGE
                && self.pending_renames.len() <= Self::MAX_PENDING_RENAMES
            {
                break;
            }
            if let Some((_, path)) = self.pending_renames.pop_front() {
                out.push(FileChange::Deleted { path });
            }
        }
        out
    }
}

#[cfg(feature = "watch-notify")]
pub use os::NotifyFileWatcher;

#[cfg(feature = "watch-notify")]
mod os {
    use std::io;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use crossbeam_channel as channel;
    use notify::{RecursiveMode, Watcher};
    use uisync_core::panic_payload_to_str;

    use super::{notify_event_requests_rescan, EventNormalizer};
    use crate::watch::{FileWatcher, WatchEvent, WatchMessage, WatchMode};

    const RAW_QUEUE_CAPACITY: usize = 4096;
    const EVENTS_QUEUE_CAPACITY: usize = 1024;
    const OVERFLOW_RETRY_INTERVAL: Duration = Duration::from_millis(50);

    fn notify_error_to_io(err: notify::Error) -> io::Error {
        io::Error::other(err)
    }

    fn send_or_overflow(
        tx: &channel::Sender<WatchMessage>,
        overflowed: &AtomicBool,
        msg: WatchMessage,
    ) -> bool {
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(channel::TrySendError::Full(_)) => {
                overflowed.store(true, Ordering::Release);
                true
            }
            Err(channel::TrySendError::Disconnected(_)) => false,
        }
    }

    fn run_drain_loop(
        raw_rx: channel::Receiver<notify::Result<notify::Event>>,
        events_tx: channel::Sender<WatchMessage>,
        stop_rx: channel::Receiver<()>,
        overflowed: Arc<AtomicBool>,
    ) {
        let mut normalizer = EventNormalizer::new();

        loop {
            if overflowed.load(Ordering::Acquire) {
                normalizer = EventNormalizer::new();
                while raw_rx.try_recv().is_ok() {}
                match events_tx.try_send(Ok(WatchEvent::Rescan)) {
                    Ok(()) => overflowed.store(false, Ordering::Release),
                    Err(channel::TrySendError::Full(_)) => {}
                    Err(channel::TrySendError::Disconnected(_)) => break,
                }
            }

            let tick = if overflowed.load(Ordering::Acquire) {
                channel::after(OVERFLOW_RETRY_INTERVAL)
            } else {
                match normalizer.next_deadline() {
                    Some(deadline) => {
                        channel::after(deadline.saturating_duration_since(Instant::now()))
                    }
                    None => channel::never(),
                }
            };

            channel::select! {
                recv(stop_rx) -> _ => {
                    let changes = normalizer.flush_all();
                    if !changes.is_empty() {
                        let _ = events_tx.try_send(Ok(WatchEvent::Changes { changes }));
                    }
                    break;
                },
                recv(raw_rx) -> msg => {
                    let Ok(res) = msg else {
                        let changes = normalizer.flush_all();
                        if !changes.is_empty() {
                            let _ = events_tx.try_send(Ok(WatchEvent::Changes { changes }));
                        }
                        break;
                    };
                    let keep_going = match res {
                        Ok(event) if notify_event_requests_rescan(&event) => {
                            overflowed.store(true, Ordering::Release);
                            true
                        }
                        Ok(event) => {
                            let changes = normalizer.push(event, Instant::now());
                            changes.is_empty()
                                || send_or_overflow(
                                    &events_tx,
                                    &overflowed,
                                    Ok(WatchEvent::Changes { changes }),
                                )
                        }
                        Err(err) => {
                            // Backend errors usually mean lost events.
                            overflowed.store(true, Ordering::Release);
                            send_or_overflow(&events_tx, &overflowed, Err(notify_error_to_io(err)))
                        }
                    };
                    if !keep_going {
                        break;
                    }
                },
                recv(tick) -> _ => {
                    let changes = normalizer.flush(Instant::now());
                    if !changes.is_empty()
                        && !send_or_overflow(
                            &events_tx,
                            &overflowed,
                            Ok(WatchEvent::Changes { changes }),
                        )
                    {
                        break;
                    }
                },
            }
        }
    }

    /// OS-backed watcher built on `notify`'s recommended backend.
    ///
    /// A drain thread normalizes raw events; bounded queues turn event storms into a single
    /// [`WatchEvent::Rescan`] instead of unbounded memory growth.
    pub struct NotifyFileWatcher {
        watcher: notify::RecommendedWatcher,
        events_rx: channel::Receiver<WatchMessage>,
        stop_tx: channel::Sender<()>,
        thread: Option<std::thread::JoinHandle<()>>,
    }

    impl NotifyFileWatcher {
        pub fn new() -> io::Result<Self> {
            let (raw_tx, raw_rx) = channel::bounded(RAW_QUEUE_CAPACITY);
            let (events_tx, events_rx) = channel::bounded(EVENTS_QUEUE_CAPACITY);
            let (stop_tx, stop_rx) = channel::bounded(0);
            let overflowed = Arc::new(AtomicBool::new(false));

            let overflowed_cb = Arc::clone(&overflowed);
            let watcher = notify::recommended_watcher(move |res| {
                if let Err(channel::TrySendError::Full(_)) = raw_tx.try_send(res) {
                    overflowed_cb.store(true, Ordering::Release);
                }
            })
            .map_err(notify_error_to_io)?;

            let thread = std::thread::Builder::new()
                .name("uisync-watch-drain".to_owned())
                .spawn(move || run_drain_loop(raw_rx, events_tx, stop_rx, overflowed))?;

            Ok(Self {
                watcher,
                events_rx,
                stop_tx,
                thread: Some(thread),
            })
        }
    }

    impl Drop for NotifyFileWatcher {
        fn drop(&mut self) {
            let _ = self.stop_tx.send(());
            if let Some(thread) = self.thread.take() {
                if let Err(panic) = thread.join() {
                    tracing::debug!(
                        target = "uisync.vfs",
                        panic = %panic_payload_to_str(&*panic),
                        "watch drain thread panicked"
                    );
                }
            }
        }
    }

    impl FileWatcher for NotifyFileWatcher {
        fn watch_path(&mut self, path: &Path, mode: WatchMode) -> io::Result<()> {
            let mode = match mode {
                WatchMode::Recursive => RecursiveMode::Recursive,
                WatchMode::NonRecursive => RecursiveMode::NonRecursive,
            };
            self.watcher.watch(path, mode).map_err(notify_error_to_io)
        }

        fn unwatch_path(&mut self, path: &Path) -> io::Result<()> {
            self.watcher.unwatch(path).map_err(notify_error_to_io)
        }

        fn receiver(&self) -> &channel::Receiver<WatchMessage> {
            &self.events_rx
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, Flag};

    fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
        notify::Event {
            kind,
            paths: paths.iter().map(PathBuf::from).collect(),
            attrs: Default::default(),
        }
    }

    #[test]
    fn pairs_split_renames_into_moves() {
        let mut normalizer = EventNormalizer::new();
        let now = Instant::now();
        assert!(normalizer
            .push(
                event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/a/Old.tsx"]),
                now,
            )
            .is_empty());
        let changes = normalizer.push(
            event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/a/New.tsx"]),
            now,
        );
        assert_eq!(
            changes,
            vec![FileChange::Moved {
                from: PathBuf::from("/a/Old.tsx"),
                to: PathBuf::from("/a/New.tsx"),
            }]
        );
    }

    #[test]
    fn stale_rename_from_becomes_delete() {
        let mut normalizer = EventNormalizer::new();
        let now = Instant::now();
        normalizer.push(
            event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/a/Gone.tsx"]),
            now,
        );
        assert_eq!(normalizer.next_deadline(), Some(now + EventNormalizer::MAX_AGE));
        let changes = normalizer.flush(now + Duration::from_secs(3));
        assert_eq!(
            changes,
            vec![FileChange::Deleted {
                path: PathBuf::from("/a/Gone.tsx")
            }]
        );
    }

    #[test]
    fn maps_basic_kinds() {
        let mut normalizer = EventNormalizer::new();
        let now = Instant::now();
        let created = normalizer.push(event(EventKind::Create(CreateKind::File), &["/a/X.tsx"]), now);
        let modified = normalizer.push(
            event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &["/a/X.tsx"]),
            now,
        );
        assert!(matches!(created[0], FileChange::Created { .. }));
        assert!(matches!(modified[0], FileChange::Modified { .. }));
    }

    #[test]
    fn rescan_flag_is_detected() {
        let mut rescan = event(EventKind::Any, &[]);
        rescan.attrs.set_flag(Flag::Rescan);
        assert!(notify_event_requests_rescan(&rescan));
        assert!(!notify_event_requests_rescan(&event(
            EventKind::Create(CreateKind::File),
            &["/a/X.tsx"]
        )));
    }
}
