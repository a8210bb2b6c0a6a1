use std::time::Duration;

use crossbeam_channel as channel;
use uisync_config::SyncConfig;
use uisync_core::{ChangeKind, Side};
use uisync_vfs::SideWatcher;

#[test]
fn os_watcher_reports_one_stabilized_event_per_save() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SyncConfig::with_roots(dir.path().join("a"), dir.path().join("b"));
    config.watcher.stabilization_ms = 100;
    std::fs::create_dir_all(&config.side_a.root).unwrap();
    std::fs::create_dir_all(&config.side_b.root).unwrap();

    let watcher = SideWatcher::with_notify(&config).unwrap();
    let (tx, events) = channel::unbounded();
    watcher.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });
    watcher.start().unwrap();

    let path = config.side_a.root.join("Button.tsx");
    std::fs::write(&path, "component Button\n").unwrap();

    let event = events
        .recv_timeout(Duration::from_secs(5))
        .expect("timed out waiting for change event");
    assert_eq!(event.path, path);
    assert_eq!(event.side, Side::A);
    assert_eq!(event.kind, ChangeKind::Add);
    assert!(events.recv_timeout(Duration::from_millis(400)).is_err());

    watcher.stop();
}
