use uisync_config::{AuthorityMode, ConfigError, SyncConfig};
use uisync_core::{ChangeEvent, ChangeKind, Side};
use uisync_sync::{
    ConflictReason, ConflictRecord, FailureKind, ModeCoordinator, Resolution, SyncError,
    SyncResult, SyncStatus,
};
use uisync_test_utils::{button_source, TestWorkspace, ToyCollaborators};
use uisync_vfs::{FileChange, ManualFileWatcher, ManualFileWatcherHandle};

use crate::suite::support::{id, Recorder};

struct Fixture {
    ws: TestWorkspace,
    toys: ToyCollaborators,
    coordinator: ModeCoordinator,
    handle: ManualFileWatcherHandle,
    statuses: Recorder<SyncResult>,
    conflicts: Recorder<ConflictRecord>,
}

impl Fixture {
    fn new(configure: impl FnOnce(&mut SyncConfig)) -> Self {
        let mut ws = TestWorkspace::new();
        ws.config.watcher.stabilization_ms = 20;
        ws.config.queue.max_delay_ms = 20;
        configure(&mut ws.config);
        Self::open(ws)
    }

    fn open(ws: TestWorkspace) -> Self {
        let toys = ToyCollaborators::for_config(&ws.config);
        let manual = ManualFileWatcher::new();
        let handle = manual.handle();
        let coordinator = ModeCoordinator::builder(ws.config.clone(), toys.collaborators())
            .watcher_backend(Box::new(manual))
            .build()
            .unwrap();

        let statuses = Recorder::new();
        let sink = statuses.clone();
        coordinator.on_status_update(move |result| sink.push(result.clone()));
        let conflicts = Recorder::new();
        let sink = conflicts.clone();
        coordinator.on_conflict(move |record| sink.push(record.clone()));

        Self {
            ws,
            toys,
            coordinator,
            handle,
            statuses,
            conflicts,
        }
    }

    fn submit(&self, side: Side, rel: &str, kind: ChangeKind, timestamp: u64) {
        let path = self.ws.path(side, rel);
        self.coordinator
            .submit(ChangeEvent::new(path, side, kind, timestamp));
    }

    /// Drops the coordinator and reopens the same workspace.
    fn restart(self) -> Self {
        let Fixture { ws, coordinator, .. } = self;
        drop(coordinator);
        Self::open(ws)
    }
}

/// A button whose `variant` the toy generator cannot render.
fn ungeneratable_source(label: &str) -> String {
    format!("component Button\nnode button label=\"{label}\" variant=odd\"{label}\"\n")
}

#[tokio::test]
async fn non_authoritative_edits_are_only_logged() {
    let f = Fixture::new(|config| config.mode = AuthorityMode::AAuthoritative);
    f.ws.write(Side::B, "button.dart", &button_source("Click", "primary"));

    f.submit(Side::B, "button.dart", ChangeKind::Change, 1_000);
    assert!(f.coordinator.flush().await.is_empty());

    let statuses = f.statuses.snapshot();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].status, SyncStatus::Ignored);
    let stats = f.coordinator.stats();
    assert_eq!(stats.ignored, 1);
    assert_eq!(stats.engine.runs, 0);
    assert_eq!(f.toys.parse_calls(Side::B), 0);
    assert!(f.ws.read(Side::A, "Button.tsx").is_none());
}

#[tokio::test]
async fn authoritative_side_syncs_and_detector_stays_quiet() {
    let f = Fixture::new(|config| config.mode = AuthorityMode::BAuthoritative);
    f.ws.write(Side::B, "button.dart", &button_source("Click", "primary"));
    f.ws.write(Side::A, "Button.tsx", &button_source("Other", "primary"));

    f.submit(Side::B, "button.dart", ChangeKind::Change, 1_000);
    f.submit(Side::A, "Button.tsx", ChangeKind::Change, 1_001);
    let results = f.coordinator.flush().await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, SyncStatus::Synced);
    assert!(f.ws.read(Side::A, "Button.tsx").unwrap().contains("Click"));
    assert!(f.coordinator.get_conflicts().is_empty());
    assert!(!f.ws.root().join(".uisync/conflicts.json").exists());
}

#[tokio::test]
async fn edits_within_the_window_conflict_and_hold_the_artifact() {
    let f = Fixture::new(|config| config.conflicts.window_ms = 5_000);
    f.ws.write(Side::A, "Button.tsx", &button_source("From A", "primary"));
    f.ws.write(Side::B, "button.dart", &button_source("From B", "primary"));

    f.submit(Side::A, "Button.tsx", ChangeKind::Change, 10_000);
    f.submit(Side::B, "button.dart", ChangeKind::Change, 13_000);
    let results = f.coordinator.flush().await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status == SyncStatus::Conflicted));
    let raised = f.conflicts.snapshot();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].artifact_id, id("button"));
    assert_eq!(raised[0].reason, ConflictReason::ConcurrentEdits);
    assert_eq!(
        (raised[0].side_a_timestamp, raised[0].side_b_timestamp),
        (10_000, 13_000)
    );
    assert_eq!(f.coordinator.get_conflicts().len(), 1);
    assert!(f.ws.read(Side::B, "button.dart").unwrap().contains("From B"));
    assert!(f.ws.read(Side::A, "Button.tsx").unwrap().contains("From A"));
    assert_eq!(f.coordinator.stats().engine.runs, 0);
}

#[tokio::test]
async fn edits_outside_the_window_do_not_conflict() {
    let f = Fixture::new(|config| config.conflicts.window_ms = 2_000);
    f.ws.write(Side::A, "Button.tsx", &button_source("From A", "primary"));
    f.ws.write(Side::B, "button.dart", &button_source("From B", "primary"));

    f.submit(Side::A, "Button.tsx", ChangeKind::Change, 10_000);
    f.submit(Side::B, "button.dart", ChangeKind::Change, 13_000);
    f.coordinator.flush().await;

    assert!(f.conflicts.snapshot().is_empty());
    assert!(f.coordinator.get_conflicts().is_empty());
}

#[tokio::test]
async fn an_edit_after_the_other_side_synced_does_not_conflict() {
    let f = Fixture::new(|config| config.conflicts.window_ms = 5_000);
    f.ws.write(Side::A, "Button.tsx", &button_source("From A", "primary"));
    f.submit(Side::A, "Button.tsx", ChangeKind::Change, 10_000);
    let first = f.coordinator.flush().await;
    assert_eq!(first[0].status, SyncStatus::Synced);

    f.ws.write(Side::B, "button.dart", &button_source("From B", "primary"));
    f.submit(Side::B, "button.dart", ChangeKind::Change, 11_000);
    let second = f.coordinator.flush().await;
    assert_eq!(second[0].status, SyncStatus::Synced);
    assert!(f.ws.read(Side::A, "Button.tsx").unwrap().contains("From B"));
    assert!(f.conflicts.snapshot().is_empty());
    assert!(f.coordinator.get_conflicts().is_empty());
}

#[tokio::test]
async fn versions_that_never_reach_the_other_side_diverge() {
    let f = Fixture::new(|config| config.conflicts.window_ms = 2_000);
    f.ws.write(Side::A, "Button.tsx", &ungeneratable_source("a"));
    f.submit(Side::A, "Button.tsx", ChangeKind::Change, 10_000);
    let first = f.coordinator.flush().await;
    assert_eq!(first[0].failure().unwrap().kind, FailureKind::Generation);
    assert_eq!(first[0].version, Some(1));
    assert!(f.conflicts.snapshot().is_empty());

    f.ws.write(Side::B, "button.dart", &ungeneratable_source("b"));
    f.submit(Side::B, "button.dart", ChangeKind::Change, 30_000);
    let second = f.coordinator.flush().await;
    assert_eq!(second[0].version, Some(2));

    let raised = f.conflicts.snapshot();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].reason, ConflictReason::DivergedVersions);
    assert_eq!(
        (raised[0].side_a_timestamp, raised[0].side_b_timestamp),
        (10_000, 30_000)
    );

    f.submit(Side::A, "Button.tsx", ChangeKind::Change, 40_000);
    let held = f.coordinator.flush().await;
    assert_eq!(held[0].status, SyncStatus::Conflicted);
}

#[tokio::test]
async fn resolving_a_conflict_forces_the_winner_through() {
    let f = Fixture::new(|_| {});
    f.ws.write(Side::A, "Button.tsx", &button_source("From A", "primary"));
    f.ws.write(Side::B, "button.dart", &button_source("From B", "primary"));
    f.submit(Side::A, "Button.tsx", ChangeKind::Change, 10_000);
    f.submit(Side::B, "button.dart", ChangeKind::Change, 10_500);
    f.coordinator.flush().await;

    let button = id("button");
    let record = f
        .coordinator
        .resolve_conflict(&button, Resolution::UseB)
        .await
        .unwrap();
    assert!(record.resolved);
    assert_eq!(record.resolution, Some(Resolution::UseB));
    assert!(f.coordinator.get_conflicts().is_empty());
    assert_eq!(f.coordinator.resolved_conflicts().len(), 1);

    assert!(f.ws.read(Side::A, "Button.tsx").unwrap().contains("From B"));
    let last = f.statuses.snapshot().pop().unwrap();
    assert_eq!(last.status, SyncStatus::Synced);
    assert_eq!(last.side, Side::B);

    let persisted = std::fs::read_to_string(f.ws.root().join(".uisync/conflicts.json")).unwrap();
    assert!(!persisted.contains("\"button\""));

    let err = f
        .coordinator
        .resolve_conflict(&button, Resolution::UseA)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NoConflict(ref missing) if *missing == button));
}

#[tokio::test]
async fn skip_clears_the_record_without_writing() {
    let f = Fixture::new(|_| {});
    f.ws.write(Side::A, "Card.tsx", &button_source("A", "primary").replace("Button", "Card"));
    f.ws.write(Side::B, "card.dart", &button_source("B", "primary").replace("Button", "Card"));
    f.submit(Side::A, "Card.tsx", ChangeKind::Change, 1_000);
    f.submit(Side::B, "card.dart", ChangeKind::Change, 1_001);
    f.coordinator.flush().await;

    f.coordinator
        .resolve_conflict(&id("card"), Resolution::Skip)
        .await
        .unwrap();
    assert!(f.coordinator.get_conflicts().is_empty());
    assert_eq!(f.toys.generate_calls(Side::A), 0);
    assert_eq!(f.toys.generate_calls(Side::B), 0);
}

#[tokio::test]
async fn conflicts_survive_a_restart() {
    let f = Fixture::new(|_| {});
    f.ws.write(Side::A, "Button.tsx", &button_source("From A", "primary"));
    f.ws.write(Side::B, "button.dart", &button_source("From B", "primary"));
    f.submit(Side::A, "Button.tsx", ChangeKind::Change, 10_000);
    f.submit(Side::B, "button.dart", ChangeKind::Change, 10_100);
    f.coordinator.flush().await;

    let f = f.restart();
    assert_eq!(f.coordinator.get_conflicts()[0].artifact_id, id("button"));

    f.submit(Side::A, "Button.tsx", ChangeKind::Change, 60_000);
    let results = f.coordinator.flush().await;
    assert_eq!(results[0].status, SyncStatus::Conflicted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watcher_events_flow_through_to_the_other_side() {
    let f = Fixture::new(|_| {});
    f.coordinator.start().await.unwrap();
    assert!(matches!(
        f.coordinator.start().await,
        Err(SyncError::AlreadyRunning)
    ));

    let source = f.ws.write(Side::A, "Button.tsx", &button_source("Live", "primary"));
    f.handle
        .push_changes(vec![FileChange::Created { path: source }])
        .unwrap();
    f.statuses
        .wait_for(|seen| seen.iter().any(|r| r.status == SyncStatus::Synced))
        .await;
    let target = f.ws.path(Side::B, "button.dart");
    assert!(f.ws.read(Side::B, "button.dart").unwrap().contains("Live"));

    // The watcher sees the engine's own write.
    f.handle
        .push_changes(vec![FileChange::Created { path: target }])
        .unwrap();
    f.statuses
        .wait_for(|seen| seen.iter().any(|r| r.status == SyncStatus::Echo))
        .await;

    f.coordinator.stop().await;
    assert!(!f.coordinator.is_running().await);
    assert_eq!(f.toys.parse_calls(Side::B), 0);
    assert_eq!(f.coordinator.stats().engine.writes, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_drains_pending_changes() {
    let f = Fixture::new(|config| {
        config.watcher.stabilization_ms = 10_000;
        config.queue.max_delay_ms = 10_000;
    });
    f.coordinator.start().await.unwrap();

    let source = f.ws.write(Side::A, "Button.tsx", &button_source("Late", "primary"));
    f.handle
        .push_changes(vec![FileChange::Modified { path: source }])
        .unwrap();
    // Give the watcher thread a moment to pick the event up.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    f.coordinator.stop().await;

    assert!(f.ws.read(Side::B, "button.dart").unwrap().contains("Late"));
}

#[tokio::test]
async fn initial_scan_syncs_every_artifact_once() {
    let f = Fixture::new(|_| {});
    f.ws.write(Side::A, "Button.tsx", &button_source("Click", "primary"));
    f.ws.write(Side::B, "button.dart", &button_source("Click", "primary"));
    f.ws.write(
        Side::B,
        "forms/login_form.dart",
        &button_source("Login", "primary").replace("Button", "LoginForm"),
    );

    let results = f.coordinator.sync_all().await;
    assert_eq!(results.len(), 3);

    let status_of = |path: &std::path::Path| {
        results
            .iter()
            .find(|r| r.source_path == path)
            .map(|r| r.status.clone())
    };
    assert_eq!(
        status_of(&f.ws.path(Side::A, "Button.tsx")),
        Some(SyncStatus::Synced)
    );
    assert_eq!(
        status_of(&f.ws.path(Side::B, "button.dart")),
        Some(SyncStatus::Echo)
    );
    assert_eq!(
        status_of(&f.ws.path(Side::B, "forms/login_form.dart")),
        Some(SyncStatus::Synced)
    );
    assert!(f.ws.read(Side::A, "forms/LoginForm.tsx").is_some());
    assert!(f.coordinator.get_conflicts().is_empty());
}

#[tokio::test]
async fn initial_scan_holds_artifacts_that_differ_on_both_sides() {
    let f = Fixture::new(|_| {});
    f.ws.write(Side::A, "Button.tsx", &button_source("Click", "primary"));
    f.ws.write(Side::B, "button.dart", &button_source("Stale", "primary"));

    let results = f.coordinator.sync_all().await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status == SyncStatus::Conflicted));

    let raised = f.conflicts.snapshot();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].artifact_id, id("button"));
    assert_eq!(raised[0].reason, ConflictReason::DivergedVersions);
    assert!(f.ws.read(Side::B, "button.dart").unwrap().contains("Stale"));
    assert_eq!(f.toys.generate_calls(Side::B), 0);
    assert_eq!(f.coordinator.engine().store().latest_version(&id("button")), None);

    f.coordinator
        .resolve_conflict(&id("button"), Resolution::UseA)
        .await
        .unwrap();
    assert!(f.ws.read(Side::B, "button.dart").unwrap().contains("Click"));
}

#[tokio::test]
async fn initial_scan_skips_the_non_authoritative_side() {
    let f = Fixture::new(|config| config.mode = AuthorityMode::AAuthoritative);
    f.ws.write(Side::B, "card.dart", &button_source("B", "primary").replace("Button", "Card"));
    assert!(f.coordinator.sync_all().await.is_empty());
    assert!(f.ws.read(Side::A, "Card.tsx").is_none());
}

#[test]
fn building_with_an_invalid_config_fails() {
    let ws = TestWorkspace::new();
    let mut config = ws.config.clone();
    config.side_b.root = config.side_a.root.join("mobile");
    let toys = ToyCollaborators::for_config(&config);
    let err = ModeCoordinator::builder(config, toys.collaborators())
        .watcher_backend(Box::new(ManualFileWatcher::new()))
        .build()
        .err()
        .unwrap();
    assert!(matches!(
        err,
        SyncError::Config(ConfigError::Invalid(ref issues))
            if issues.iter().any(|issue| issue.toml_path == "side_b.root")
    ));
}

#[cfg(feature = "watch-notify")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn default_backend_watches_the_file_system() {
    let mut ws = TestWorkspace::new();
    ws.config.watcher.stabilization_ms = 50;
    ws.config.queue.max_delay_ms = 20;
    let toys = ToyCollaborators::for_config(&ws.config);
    let coordinator = ModeCoordinator::builder(ws.config.clone(), toys.collaborators())
        .build()
        .unwrap();
    let statuses = Recorder::new();
    let sink = statuses.clone();
    coordinator.on_status_update(move |result| sink.push(result.clone()));
    coordinator.start().await.unwrap();

    ws.write(Side::A, "Button.tsx", &button_source("Disk", "primary"));
    statuses
        .wait_for(|seen| seen.iter().any(|r| r.status == SyncStatus::Synced))
        .await;
    assert!(ws.read(Side::B, "button.dart").unwrap().contains("Disk"));

    // The generated file's own watcher event is recognised.
    statuses
        .wait_for(|seen| seen.iter().any(|r| r.status == SyncStatus::Echo))
        .await;
    coordinator.stop().await;
    assert_eq!(toys.parse_calls(Side::B), 0);
}

#[cfg(not(feature = "watch-notify"))]
#[test]
fn building_without_a_backend_fails() {
    let ws = TestWorkspace::new();
    let toys = ToyCollaborators::for_config(&ws.config);
    let err = ModeCoordinator::builder(ws.config.clone(), toys.collaborators())
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, SyncError::NoWatcherBackend));
}
