//! Integration tests for both pipeline modes on a real rayon pool.
//!
//! These verify tombstone accounting, exactly-once processing and that
//! failed or cancelled input ends up on the retry queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::{ThreadPool, ThreadPoolBuilder};

use strand_core::telemetry::init_test_tracing;
use strand_core::{CancellationToken, TaskError};
use strand_queue::{proc_in_order_async, process_queue, BlockingQueue, QueueError};

const POLL: Duration = Duration::from_millis(5);

fn pool(threads: usize) -> ThreadPool {
    init_test_tracing();
    ThreadPoolBuilder::new().num_threads(threads).build().unwrap()
}

fn counters(n: usize) -> Arc<Vec<AtomicUsize>> {
    Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect())
}

#[test]
fn process_queue_four_workers_ten_items() {
    let pool = pool(4);
    let source: BlockingQueue<usize> = (0..10).collect();
    let seen = counters(10);
    let mut failed = Vec::new();

    let processor = {
        let seen = Arc::clone(&seen);
        move |i: &usize, _: &CancellationToken| -> Result<bool, TaskError> {
            seen[*i].fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    };

    let token = CancellationToken::new();
    let (stats, completed) =
        process_queue(&pool, &source, &mut failed, 4, &token, &processor, POLL).unwrap();

    assert!(completed);
    assert!(failed.is_empty());
    assert!(source.is_empty());
    assert!(seen.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    assert_eq!(stats.processed, 10);
    assert_eq!(stats.tombstones_published, 4);
    assert_eq!(stats.tombstones_observed, 4);
}

#[test]
fn process_queue_more_workers_than_threads() {
    let pool = pool(2);
    let source: BlockingQueue<usize> = (0..25).collect();
    let total = AtomicUsize::new(0);
    let mut failed = Vec::new();

    let processor = |_: &usize, _: &CancellationToken| -> Result<bool, TaskError> {
        total.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    };

    let token = CancellationToken::new();
    let (stats, completed) =
        process_queue(&pool, &source, &mut failed, 6, &token, &processor, POLL).unwrap();

    assert!(completed);
    assert_eq!(total.load(Ordering::SeqCst), 25);
    assert_eq!(stats.tombstones_observed, 6);
}

#[test]
fn process_queue_failure_requeues_without_losing_items() {
    let pool = pool(4);
    let source: BlockingQueue<usize> = (0..40).collect();
    let processed = AtomicUsize::new(0);
    let mut failed = Vec::new();

    let processor = |i: &usize, _: &CancellationToken| -> Result<bool, TaskError> {
        if *i == 7 {
            return Err(TaskError::msg("item 7 is corrupt"));
        }
        processed.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    };

    let token = CancellationToken::new();
    let err = process_queue(&pool, &source, &mut failed, 4, &token, &processor, POLL).unwrap_err();

    match err {
        QueueError::Task(err) => assert_eq!(err.to_string(), "item 7 is corrupt"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(failed.contains(&7));
    assert_eq!(processed.load(Ordering::SeqCst) + failed.len(), 40);
    assert!(!token.is_canceled(), "internal abort must not cancel the caller");
}

#[test]
fn process_queue_abort_returns_false() {
    let pool = pool(2);
    let source: BlockingQueue<usize> = (0..20).collect();
    let mut failed = Vec::new();

    let processor = |i: &usize, _: &CancellationToken| -> Result<bool, TaskError> { Ok(*i != 3) };

    let token = CancellationToken::new();
    let (_, completed) =
        process_queue(&pool, &source, &mut failed, 2, &token, &processor, POLL).unwrap();
    assert!(!completed);
}

#[test]
fn concurrent_run_uses_effective_parallelism() {
    let pool = pool(4);
    let seen = counters(10);
    let processor = {
        let seen = Arc::clone(&seen);
        Arc::new(move |i: &usize, _: &CancellationToken| -> Result<bool, TaskError> {
            seen[*i].fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
    };

    let token = CancellationToken::new();
    let run = proc_in_order_async(&pool, 5, 10, &token, processor, POLL).unwrap();
    assert_eq!(run.workers(), 4);

    for i in 0..10 {
        run.push(i).unwrap();
    }
    run.finish();

    assert!(run.wait(POLL).unwrap());
    assert!(run.is_done());
    assert!(seen.iter().all(|c| c.load(Ordering::SeqCst) == 1));

    let stats = run.stats();
    assert_eq!(stats.tombstones_published, 4);
    assert_eq!(stats.tombstones_observed, 4);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["processed"], 10);
}

#[test]
fn push_after_finish_goes_to_retry_queue() {
    let pool = pool(2);
    let processor =
        Arc::new(|_: &u32, _: &CancellationToken| -> Result<bool, TaskError> { Ok(true) });

    let run = proc_in_order_async(&pool, 3, 3, &CancellationToken::new(), processor, POLL).unwrap();
    run.finish();
    assert!(matches!(run.push(42), Err(QueueError::Finished)));
    assert!(run.wait(POLL).unwrap());
    assert_eq!(run.take_failed(), vec![42]);
}

#[test]
fn caller_cancel_unblocks_unfinished_run() {
    let pool = pool(2);
    let processor =
        Arc::new(|_: &u32, _: &CancellationToken| -> Result<bool, TaskError> { Ok(true) });

    let token = CancellationToken::new();
    let run = proc_in_order_async(&pool, 4, 100, &token, processor, POLL).unwrap();
    run.push(1).unwrap();

    // never finished: only cancellation can end this run
    token.cancel();
    match run.wait(POLL) {
        Err(QueueError::Task(err)) => assert!(err.is_cancellation()),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(run.is_done());
    assert_eq!(run.stats().tombstones_observed, 3);
}

#[test]
fn dropped_unfinished_run_releases_its_workers() {
    let pool = pool(2);
    let processor =
        Arc::new(|_: &u32, _: &CancellationToken| -> Result<bool, TaskError> { Ok(true) });

    let token = CancellationToken::new();
    let run = proc_in_order_async(&pool, 2, 10, &token, Arc::clone(&processor), POLL).unwrap();
    assert_eq!(run.workers(), 1);
    run.push(1).unwrap();
    drop(run);

    // each worker holds a processor clone until it exits
    let deadline = Instant::now() + Duration::from_secs(5);
    while Arc::strong_count(&processor) > 1 && Instant::now() < deadline {
        std::thread::sleep(POLL);
    }
    assert_eq!(Arc::strong_count(&processor), 1);

    // both pool threads are free again
    let started = Instant::now();
    pool.join(
        || std::thread::sleep(Duration::from_millis(200)),
        || std::thread::sleep(Duration::from_millis(200)),
    );
    assert!(started.elapsed() < Duration::from_millis(390));
}

#[test]
fn concurrent_failure_without_finish_does_not_hang() {
    let pool = pool(3);
    let ok = Arc::new(AtomicUsize::new(0));
    let processor = {
        let ok = Arc::clone(&ok);
        Arc::new(move |i: &u32, _: &CancellationToken| -> Result<bool, TaskError> {
            if *i == 3 {
                return Err(TaskError::msg("bad"));
            }
            ok.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
    };

    let token = CancellationToken::new();
    let run = proc_in_order_async(&pool, 3, 10, &token, processor, POLL).unwrap();
    assert_eq!(run.workers(), 2);
    for i in 0..10 {
        // refused once the failure has shut the run down
        run.push(i).ok();
    }

    // the producer never calls finish()
    let started = Instant::now();
    match run.wait(POLL) {
        Err(QueueError::Task(err)) => {
            assert!(err.is_genuine());
            assert_eq!(err.to_string(), "bad");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(run.is_done());

    let failed = run.take_failed();
    assert!(failed.contains(&3));
    assert_eq!(ok.load(Ordering::SeqCst) + failed.len(), 10);
}
