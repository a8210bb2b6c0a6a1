use std::time::Duration;

use uisync_config::AuthorityMode;
use uisync_core::{ChangeKind, Side};
use uisync_scheduler::ProgressState;
use uisync_sync::{FailureKind, SyncState, SyncStatus};
use uisync_test_utils::button_source;

use crate::suite::support::{change, id, EngineHarness, Recorder};

#[tokio::test]
async fn button_versions_only_when_the_ir_changes() {
    let h = EngineHarness::new();
    let button = id("button");
    let store = h.engine.store();

    h.ws.write(Side::A, "Button.tsx", &button_source("Click", "primary"));
    let first = h.sync(Side::A, "Button.tsx", ChangeKind::Add).await;
    assert_eq!(first.status, SyncStatus::Synced);
    assert_eq!(first.artifact_id, Some(button.clone()));
    assert_eq!(first.version, Some(1));
    assert_eq!(first.target_path, Some(h.ws.path(Side::B, "button.dart")));
    let generated = h.ws.read(Side::B, "button.dart").unwrap();
    assert!(generated.starts_with("# generated by uisync for side b\n"));
    assert!(generated.contains("primary"));
    let c1 = store.retrieve(&button, None).unwrap().unwrap().checksum;
    assert_eq!(h.toys.generate_calls(Side::B), 1);

    // Only the comment changes: same IR.
    let commented = button_source("Click", "primary")
        .replace("# Button component", "# Button component, used on the checkout page");
    h.ws.write(Side::A, "Button.tsx", &commented);
    let second = h.sync(Side::A, "Button.tsx", ChangeKind::Change).await;
    assert_eq!(second.status, SyncStatus::Unchanged);
    assert_eq!(second.version, Some(1));
    assert_eq!(second.target_path, None);
    assert_eq!(h.toys.generate_calls(Side::B), 1);
    assert_eq!(store.get_history(&button).unwrap().len(), 1);

    h.ws.write(Side::A, "Button.tsx", &button_source("Click", "secondary"));
    let third = h.sync(Side::A, "Button.tsx", ChangeKind::Change).await;
    assert_eq!(third.status, SyncStatus::Synced);
    assert_eq!(third.version, Some(2));
    assert_eq!(h.toys.generate_calls(Side::B), 2);
    let c2 = store.retrieve(&button, None).unwrap().unwrap().checksum;
    assert_ne!(c1, c2);
    assert!(h.ws.read(Side::B, "button.dart").unwrap().contains("secondary"));
}

#[tokio::test]
async fn unchanged_source_hits_the_cache_and_writes_nothing() {
    let h = EngineHarness::new();
    h.ws.write(Side::A, "Card.tsx", &button_source("Open", "primary").replace("Button", "Card"));

    let first = h.sync(Side::A, "Card.tsx", ChangeKind::Add).await;
    assert_eq!(first.status, SyncStatus::Synced);
    let target = h.ws.path(Side::B, "card.dart");
    let written_at = std::fs::metadata(&target).unwrap().modified().unwrap();

    let second = h.sync(Side::A, "Card.tsx", ChangeKind::Change).await;
    assert_eq!(second.status, SyncStatus::Unchanged);
    assert_eq!(h.toys.parse_calls(Side::A), 1);
    assert_eq!(h.toys.generate_calls(Side::B), 1);
    assert_eq!(
        std::fs::metadata(&target).unwrap().modified().unwrap(),
        written_at
    );
    assert_eq!(h.engine.store().get_history(&id("card")).unwrap().len(), 1);
    assert!(h.engine.cache().stats().hits >= 1);

    let stats = h.engine.stats();
    assert_eq!(stats.runs, 2);
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.unchanged, 1);
}

#[tokio::test]
async fn successive_edits_produce_gapless_versions() {
    let h = EngineHarness::new();
    for i in 1..=5 {
        // Growing labels keep every write's size distinct.
        let label = "x".repeat(i);
        h.ws.write(Side::A, "Counter.tsx", &button_source(&label, "primary"));
        let result = h.sync(Side::A, "Counter.tsx", ChangeKind::Change).await;
        assert_eq!(result.status, SyncStatus::Synced);
        assert_eq!(result.version, Some(i as u32));
    }

    let versions: Vec<u32> = h
        .engine
        .store()
        .get_history(&id("counter"))
        .unwrap()
        .iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(versions, vec![5, 4, 3, 2, 1]);
}

#[tokio::test]
async fn own_writes_are_recognised_as_echoes() {
    let h = EngineHarness::new();
    h.ws.write(Side::A, "Button.tsx", &button_source("Click", "primary"));
    h.sync(Side::A, "Button.tsx", ChangeKind::Add).await;

    let target = h.ws.path(Side::B, "button.dart");
    let echo = change(&target, Side::B, ChangeKind::Add);
    assert!(h.engine.is_echo(&echo.event));
    let result = h.engine.process_change(&echo).await;
    assert_eq!(result.status, SyncStatus::Echo);
    assert_eq!(h.toys.parse_calls(Side::B), 0);

    // A real edit on B flows back to A.
    h.ws.write(Side::B, "button.dart", &button_source("Tapped", "primary"));
    let edit = change(&target, Side::B, ChangeKind::Change);
    assert!(!h.engine.is_echo(&edit.event));
    let result = h.engine.process_change(&edit).await;
    assert_eq!(result.status, SyncStatus::Synced);
    assert_eq!(result.version, Some(2));
    assert!(h.ws.read(Side::A, "Button.tsx").unwrap().contains("Tapped"));
    let latest = h.engine.store().retrieve(&id("button"), None).unwrap().unwrap();
    assert_eq!(latest.origin, Side::B);
}

#[tokio::test]
async fn parse_errors_carry_their_position() {
    let h = EngineHarness::new();
    h.ws.write(Side::A, "Broken.tsx", "component Broken\nnode button label=\"oops\n");

    let result = h.sync(Side::A, "Broken.tsx", ChangeKind::Add).await;
    let failure = result.failure().expect("expected a failure");
    assert_eq!(failure.kind, FailureKind::Parse);
    assert_eq!(failure.line, Some(2));
    assert_eq!(failure.column, Some(13));
    assert!(h.ws.read(Side::B, "broken.dart").is_none());
    assert_eq!(h.engine.state(&id("broken")), SyncState::Idle);
    assert_eq!(h.engine.stats().failures, 1);
}

#[tokio::test]
async fn invalid_ir_is_never_stored_or_written() {
    let h = EngineHarness::new();
    h.ws.write(
        Side::A,
        "Bad.tsx",
        "component Bad\nnode button label=\"x\" on_press=\"missing\"\n",
    );

    let result = h.sync(Side::A, "Bad.tsx", ChangeKind::Add).await;
    assert_eq!(result.failure().unwrap().kind, FailureKind::Validation);
    assert_eq!(h.engine.store().latest_version(&id("bad")), None);
    assert!(h.ws.read(Side::B, "bad.dart").is_none());
    assert_eq!(h.toys.generate_calls(Side::B), 0);
}

#[tokio::test]
async fn crashing_parser_fails_only_its_artifact() {
    let h = EngineHarness::new();
    h.ws.write(Side::A, "Boom.tsx", "component Boom\n!panic\n");
    h.ws.write(Side::A, "Fine.tsx", &button_source("Fine", "primary"));

    let boom = h.sync(Side::A, "Boom.tsx", ChangeKind::Add).await;
    assert_eq!(boom.failure().unwrap().kind, FailureKind::Worker);

    let fine = h.sync(Side::A, "Fine.tsx", ChangeKind::Add).await;
    assert_eq!(fine.status, SyncStatus::Synced);
}

#[tokio::test]
async fn slow_parse_times_out() {
    let h = EngineHarness::with_config(|config| config.processor.task_timeout_ms = 50);
    h.ws.write(Side::A, "Slow.tsx", "component Slow\n!sleep 500\n");

    let result = h.sync(Side::A, "Slow.tsx", ChangeKind::Add).await;
    assert_eq!(result.failure().unwrap().kind, FailureKind::Timeout);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runs_for_one_artifact_never_overlap() {
    let h = EngineHarness::with_config(|config| {
        config.processor.max_workers = Some(4);
        // Every run parses, so overlapping runs would show up as overlapping parses.
        config.cache.enabled = false;
    });
    let source = format!("!sleep 100\n{}", button_source("Slow", "primary"));
    h.ws.write(Side::A, "Slow.tsx", &source);
    h.ws.write(Side::A, "Other.tsx", &source.replace("Button", "Other"));

    let slow = h.ws.path(Side::A, "Slow.tsx");
    let other = h.ws.path(Side::A, "Other.tsx");
    let changes = [
        change(&slow, Side::A, ChangeKind::Change),
        change(&slow, Side::A, ChangeKind::Change),
        change(&other, Side::A, ChangeKind::Change),
    ];
    let (a, b, c) = tokio::join!(
        h.engine.process_change(&changes[0]),
        h.engine.process_change(&changes[1]),
        h.engine.process_change(&changes[2]),
    );

    let mut statuses = vec![a.status, b.status];
    statuses.sort_by_key(|s| format!("{s:?}"));
    assert_eq!(statuses, vec![SyncStatus::Synced, SyncStatus::Unchanged]);
    assert_eq!(c.status, SyncStatus::Synced);
    assert_eq!(h.engine.store().get_history(&id("slow")).unwrap().len(), 1);

    let spans = h.toys.parse_spans(Side::A);
    let slow_spans: Vec<_> = spans.iter().filter(|span| span.path == slow).collect();
    assert_eq!(slow_spans.len(), 2);
    assert!(!slow_spans[0].overlaps(slow_spans[1]));
    let other_span = spans.iter().find(|span| span.path == other).unwrap();
    assert!(slow_spans.iter().any(|span| span.overlaps(other_span)));
}

#[tokio::test]
async fn dropping_a_run_midway_releases_the_artifact() {
    let h = EngineHarness::new();
    let source = format!("!sleep 300\n{}", button_source("Slow", "primary"));
    let path = h.ws.write(Side::A, "Slow.tsx", &source);
    let slow = id("slow");

    let pending = change(&path, Side::A, ChangeKind::Change);
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), h.engine.process_change(&pending)).await;
    assert!(abandoned.is_err());
    assert_eq!(h.engine.state(&slow), SyncState::Idle);

    let retry = h.sync(Side::A, "Slow.tsx", ChangeKind::Change);
    let result = tokio::time::timeout(Duration::from_secs(5), retry)
        .await
        .expect("artifact lock was never released");
    assert_eq!(result.status, SyncStatus::Synced);
    assert_eq!(h.engine.state(&slow), SyncState::Idle);
}

#[tokio::test]
async fn failed_write_is_retried_on_the_next_save() {
    let h = EngineHarness::new();
    let blocked = h.ws.path(Side::B, "button.dart");
    std::fs::create_dir_all(blocked.join("occupied")).unwrap();
    h.ws.write(Side::A, "Button.tsx", &button_source("Click", "primary"));

    let first = h.sync(Side::A, "Button.tsx", ChangeKind::Add).await;
    assert_eq!(first.failure().unwrap().kind, FailureKind::Io);
    assert_eq!(first.version, Some(1));

    std::fs::remove_dir_all(&blocked).unwrap();
    let retry = h.sync(Side::A, "Button.tsx", ChangeKind::Change).await;
    assert_eq!(retry.status, SyncStatus::Synced);
    assert_eq!(retry.version, Some(1));
    assert_eq!(retry.target_path, Some(blocked));
    assert!(h.ws.read(Side::B, "button.dart").unwrap().contains("Click"));
    assert_eq!(h.engine.store().get_history(&id("button")).unwrap().len(), 1);

    let settled = h.sync(Side::A, "Button.tsx", ChangeKind::Change).await;
    assert_eq!(settled.status, SyncStatus::Unchanged);
    assert_eq!(h.toys.generate_calls(Side::B), 2);
}

#[tokio::test]
async fn nested_sources_sync_back_into_the_same_file() {
    let h = EngineHarness::new();
    h.ws.write(Side::A, "components/Button.tsx", &button_source("Click", "primary"));
    let first = h.sync(Side::A, "components/Button.tsx", ChangeKind::Add).await;
    assert_eq!(first.artifact_id, Some(id("components.button")));
    assert_eq!(first.target_path, Some(h.ws.path(Side::B, "components/button.dart")));

    h.ws.write(Side::B, "components/button.dart", &button_source("Tapped", "primary"));
    let back = h.sync(Side::B, "components/button.dart", ChangeKind::Change).await;
    assert_eq!(back.status, SyncStatus::Synced);
    assert_eq!(back.target_path, Some(h.ws.path(Side::A, "components/Button.tsx")));
    assert!(h.ws.read(Side::A, "components/Button.tsx").unwrap().contains("Tapped"));
    assert!(!h.ws.path(Side::A, "Components").exists());
}

#[tokio::test]
async fn deleting_a_source_keeps_the_other_side_in_bidirectional_mode() {
    let h = EngineHarness::new();
    h.ws.write(Side::A, "Button.tsx", &button_source("Click", "primary"));
    h.sync(Side::A, "Button.tsx", ChangeKind::Add).await;

    h.ws.remove(Side::A, "Button.tsx");
    let result = h.sync(Side::A, "Button.tsx", ChangeKind::Remove).await;
    assert_eq!(result.status, SyncStatus::Deleted);
    assert_eq!(result.target_path, None);
    assert!(h.engine.store().get_history(&id("button")).unwrap().is_empty());
    assert!(h.ws.read(Side::B, "button.dart").is_some());
}

#[tokio::test]
async fn deleting_an_authoritative_source_removes_the_generated_file() {
    let h = EngineHarness::with_config(|config| config.mode = AuthorityMode::AAuthoritative);
    h.ws.write(Side::A, "Button.tsx", &button_source("Click", "primary"));
    h.sync(Side::A, "Button.tsx", ChangeKind::Add).await;
    let target = h.ws.path(Side::B, "button.dart");
    assert!(target.exists());

    h.ws.remove(Side::A, "Button.tsx");
    let result = h.sync(Side::A, "Button.tsx", ChangeKind::Remove).await;
    assert_eq!(result.status, SyncStatus::Deleted);
    assert_eq!(result.target_path, Some(target.clone()));
    assert!(!target.exists());

    // The removal the watcher reports next is the engine's own.
    let echo = change(&target, Side::B, ChangeKind::Remove);
    assert!(h.engine.is_echo(&echo.event));
    assert!(!h.engine.is_echo(&echo.event));
}

#[tokio::test]
async fn a_vanished_source_is_treated_as_deleted() {
    let h = EngineHarness::new();
    h.ws.write(Side::A, "Ghost.tsx", &button_source("Boo", "primary"));
    h.sync(Side::A, "Ghost.tsx", ChangeKind::Add).await;
    h.ws.remove(Side::A, "Ghost.tsx");

    let result = h.sync(Side::A, "Ghost.tsx", ChangeKind::Change).await;
    assert_eq!(result.status, SyncStatus::Deleted);

    let forced = h
        .engine
        .sync_path(&h.ws.path(Side::A, "Ghost.tsx"), Side::A, true)
        .await;
    assert_eq!(forced.failure().unwrap().kind, FailureKind::Io);
}

#[tokio::test]
async fn untracked_paths_are_ignored() {
    let h = EngineHarness::new();
    h.ws.write(Side::A, "notes.txt", "hello");
    let result = h.sync(Side::A, "notes.txt", ChangeKind::Add).await;
    assert_eq!(result.status, SyncStatus::Ignored);
    assert_eq!(result.artifact_id, None);
    assert_eq!(h.engine.stats().runs, 0);
}

#[tokio::test]
async fn large_batches_report_progress() {
    let h = EngineHarness::with_config(|config| config.progress.batch_threshold = 2);
    let updates = Recorder::new();
    let sink = updates.clone();
    h.engine.progress().on_progress(move |update| sink.push(update.clone()));

    let mut changes = Vec::new();
    for name in ["One", "Two", "Three"] {
        let source = button_source(name, "primary").replace("Button", name);
        let path = h.ws.write(Side::A, &format!("{name}.tsx"), &source);
        changes.push(change(&path, Side::A, ChangeKind::Add));
    }
    let results = h.engine.process_batch(changes).await;
    assert!(results.iter().all(|r| r.status == SyncStatus::Synced));
    assert_eq!(
        results
            .iter()
            .map(|r| r.artifact_id.clone().unwrap())
            .collect::<Vec<_>>(),
        vec![id("one"), id("two"), id("three")]
    );

    let updates = updates.snapshot();
    let last = updates.last().unwrap();
    assert_eq!(last.state, ProgressState::Completed);
    assert_eq!((last.current, last.total), (3, 3));
    assert!(h.engine.progress().active().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_a_batch_skips_what_has_not_started() {
    let h = EngineHarness::with_config(|config| config.progress.batch_threshold = 2);
    let source = format!("!sleep 300\n{}", button_source("Slow", "primary"));
    let path = h.ws.write(Side::A, "Slow.tsx", &source);
    let changes = (0..3)
        .map(|_| change(&path, Side::A, ChangeKind::Change))
        .collect();

    let progress = h.engine.progress().clone();
    let canceller = tokio::spawn(async move {
        loop {
            if let Some(batch) = progress.active().first() {
                progress.cancel(&batch.id);
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
    let results = h.engine.process_batch(changes).await;
    canceller.await.unwrap();

    assert_eq!(results[0].status, SyncStatus::Synced);
    assert_eq!(results[1].status, SyncStatus::Cancelled);
    assert_eq!(results[2].status, SyncStatus::Cancelled);
}
