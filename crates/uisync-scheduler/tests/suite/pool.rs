use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uisync_config::ProcessorConfig;
use uisync_scheduler::{ParallelProcessor, Task, TaskError};

fn pool(workers: usize) -> ParallelProcessor {
    ParallelProcessor::new(&ProcessorConfig {
        max_workers: Some(workers),
        parallel_threshold: 3,
        task_timeout_ms: 10_000,
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrency_never_exceeds_pool_size() {
    let pool = pool(2);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks = (0..8)
        .map(|idx| {
            let running = running.clone();
            let peak = peak.clone();
            Task::parse(format!("file-{idx}"), move |_| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                idx
            })
        })
        .collect();

    let results = pool.process_many(tasks).await;
    let values: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(values, (0..8).collect::<Vec<_>>());
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);

    let stats = pool.stats();
    assert_eq!(stats.completed, 8);
    assert_eq!(stats.queued, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_crashing_task_does_not_fail_its_batch() {
    let pool = pool(2);
    let tasks: Vec<Task<u32>> = (0..4)
        .map(|idx| {
            Task::generate(format!("target-{idx}"), move |_| {
                if idx == 2 {
                    panic!("generator exploded");
                }
                idx
            })
        })
        .collect();

    let results = pool.process_many(tasks).await;
    assert_eq!(results[0], Ok(0));
    assert_eq!(results[1], Ok(1));
    assert!(matches!(results[2], Err(TaskError::WorkerCrashed { .. })));
    assert_eq!(results[3], Ok(3));

    // Crash replacement keeps the pool at full strength.
    assert_eq!(pool.process(Task::parse("after", |_| 9)).await, Ok(9));
}
