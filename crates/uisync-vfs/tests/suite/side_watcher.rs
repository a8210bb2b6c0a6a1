use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel as channel;
use uisync_config::SyncConfig;
use uisync_core::{ChangeEvent, ChangeKind, Side};
use uisync_vfs::{FileChange, ManualFileWatcher, ManualFileWatcherHandle, SideWatcher, WatchEvent};

struct Fixture {
    dir: tempfile::TempDir,
    watcher: SideWatcher,
    handle: ManualFileWatcherHandle,
    events: channel::Receiver<ChangeEvent>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SyncConfig::with_roots(dir.path().join("a"), dir.path().join("b"));
        config.watcher.stabilization_ms = 30;

        let manual = ManualFileWatcher::new();
        let handle = manual.handle();
        let watcher = SideWatcher::new(&config, Box::new(manual)).unwrap();
        let (tx, events) = channel::unbounded();
        watcher.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        watcher.start().unwrap();

        Self {
            dir,
            watcher,
            handle,
            events,
        }
    }

    fn a(&self, rel: &str) -> PathBuf {
        self.dir.path().join("a").join(rel)
    }

    fn b(&self, rel: &str) -> PathBuf {
        self.dir.path().join("b").join(rel)
    }

    fn write(&self, path: &PathBuf) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "x").unwrap();
    }

    /// Collects events until `count` have arrived.
    fn collect(&self, count: usize) -> HashSet<(PathBuf, Side, ChangeKind)> {
        let mut out = HashSet::new();
        for _ in 0..count {
            let event = self
                .events
                .recv_timeout(Duration::from_secs(5))
                .expect("timed out waiting for change event");
            out.insert((event.path, event.side, event.kind));
        }
        out
    }

    fn assert_quiet(&self) {
        assert!(self
            .events
            .recv_timeout(Duration::from_millis(150))
            .is_err());
    }
}

#[test]
fn moves_become_remove_then_add() {
    let fx = Fixture::new();
    let from = fx.a("Old.tsx");
    let to = fx.a("New.tsx");
    fx.write(&to);

    fx.handle
        .push_changes(vec![FileChange::Moved {
            from: from.clone(),
            to: to.clone(),
        }])
        .unwrap();

    let events = fx.collect(2);
    assert!(events.contains(&(from, Side::A, ChangeKind::Remove)));
    assert!(events.contains(&(to, Side::A, ChangeKind::Add)));
    fx.assert_quiet();
}

#[test]
fn created_directory_reports_its_files() {
    let fx = Fixture::new();
    let one = fx.b("forms/login_form.dart");
    let two = fx.b("forms/fields/text_field.dart");
    fx.write(&one);
    fx.write(&two);
    fx.write(&fx.b("forms/README.md"));

    fx.handle
        .push_changes(vec![FileChange::Created {
            path: fx.b("forms"),
        }])
        .unwrap();

    let events = fx.collect(2);
    assert!(events.contains(&(one, Side::B, ChangeKind::Add)));
    assert!(events.contains(&(two, Side::B, ChangeKind::Add)));
    fx.assert_quiet();
}

#[test]
fn rescan_reports_every_tracked_file() {
    let fx = Fixture::new();
    let button = fx.a("Button.tsx");
    let card = fx.b("card.dart");
    fx.write(&button);
    fx.write(&card);
    fx.write(&fx.a("node_modules/pkg/Ignored.tsx"));

    fx.handle.push(WatchEvent::Rescan).unwrap();

    let events = fx.collect(2);
    assert!(events.contains(&(button, Side::A, ChangeKind::Change)));
    assert!(events.contains(&(card, Side::B, ChangeKind::Change)));
    fx.assert_quiet();
}

#[test]
fn backend_errors_do_not_stop_watching() {
    let fx = Fixture::new();
    fx.handle
        .push_error(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "subtree unreadable",
        ))
        .unwrap();
    let path = fx.a("Button.tsx");
    fx.handle
        .push_changes(vec![FileChange::Modified { path: path.clone() }])
        .unwrap();

    let events = fx.collect(1);
    assert!(events.contains(&(path, Side::A, ChangeKind::Change)));
}

#[test]
fn every_handler_receives_events() {
    let fx = Fixture::new();
    let (tx, second) = channel::unbounded();
    fx.watcher.subscribe(move |event: &ChangeEvent| {
        let _ = tx.send(event.path.clone());
    });
    fx.watcher.subscribe(|_: &ChangeEvent| panic!("faulty subscriber"));

    let path = fx.b("button.dart");
    fx.handle
        .push_changes(vec![FileChange::Modified { path: path.clone() }])
        .unwrap();

    assert_eq!(fx.collect(1).len(), 1);
    assert_eq!(second.recv_timeout(Duration::from_secs(5)).unwrap(), path);
}
