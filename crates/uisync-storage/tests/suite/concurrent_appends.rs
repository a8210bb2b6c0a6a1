use std::sync::{Arc, Barrier};
use std::thread;

use uisync_core::{ArtifactId, ComponentIr, IrNode, Props, Side};
use uisync_storage::IrStore;

fn ir(content: String) -> ComponentIr {
    ComponentIr::new(
        "Label",
        IrNode::Text {
            content,
            props: Props::new(),
        },
    )
}

#[test]
fn same_artifact_appends_never_repeat_or_skip_versions() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(IrStore::open(tmp.path()).unwrap());
    let id = ArtifactId::new("label").unwrap();

    const THREADS: usize = 8;
    const PER_THREAD: usize = 5;
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = store.clone();
            let id = id.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                (0..PER_THREAD)
                    .map(|i| {
                        store
                            .append(&id, &ir(format!("{t}-{i}")), Side::A)
                            .unwrap()
                            .version
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut versions: Vec<u32> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    versions.sort_unstable();
    let expected: Vec<u32> = (1..=(THREADS * PER_THREAD) as u32).collect();
    assert_eq!(versions, expected);

    let history: Vec<u32> = store
        .get_history(&id)
        .unwrap()
        .into_iter()
        .map(|v| v.version)
        .collect();
    let mut newest_first = expected.clone();
    newest_first.reverse();
    assert_eq!(history, newest_first);
}

#[test]
fn different_artifacts_are_independent() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(IrStore::open(tmp.path()).unwrap());

    let handles: Vec<_> = ["a", "b", "c", "d"]
        .into_iter()
        .map(|name| {
            let store = store.clone();
            thread::spawn(move || {
                let id = ArtifactId::new(name).unwrap();
                for i in 0..3 {
                    store.append(&id, &ir(format!("{name}{i}")), Side::B).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let ids: Vec<_> = store.list().into_iter().map(|id| id.to_string()).collect();
    assert_eq!(ids, vec!["a", "b", "c", "d"]);
    for id in store.list() {
        assert_eq!(store.latest_version(&id), Some(3));
    }
}
