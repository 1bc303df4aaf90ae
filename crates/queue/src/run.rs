//! The two operating modes of a pipeline on a rayon pool.

use std::sync::Arc;
use std::time::Duration;

use rayon::ThreadPool;
use tracing::debug;

use strand_core::{CancellationToken, CountLatch, Processor};

use crate::error::QueueError;
use crate::pipeline::{effective_parallelism, PipelineStats, QueuePipeline};
use crate::queue::BlockingQueue;

/// Drain-then-process: take every item currently queued in `source` and
/// process it on exactly `workers` pool tasks.
///
/// Items that were not processed successfully are appended to `failed`.
/// Blocks until every worker has observed its tombstone.
pub fn process_queue<T, P>(
    pool: &ThreadPool,
    source: &BlockingQueue<T>,
    failed: &mut Vec<T>,
    workers: usize,
    token: &CancellationToken,
    processor: &P,
    poll: Duration,
) -> Result<(PipelineStats, bool), QueueError>
where
    T: Send,
    P: Processor<T> + ?Sized,
{
    let pipeline = QueuePipeline::new(workers, token)?;
    let backlog = source.drain_items();
    debug!(workers, items = backlog.len(), "process_queue starting");
    for item in backlog {
        pipeline.push(item)?;
    }
    pipeline.finish();

    let shared = &pipeline;
    pool.scope(|s| {
        for worker in 0..workers {
            s.spawn(move |_| shared.run_worker(worker, processor, poll));
        }
    });

    let stats = pipeline.stats();
    failed.extend(pipeline.take_failed());
    debug!(?stats, "process_queue finished");
    let completed = pipeline.outcome(token)?;
    Ok((stats, completed))
}

/// Handle to a concurrent produce/consume run started by
/// [`proc_in_order_async`].
pub struct PipelineRun<T> {
    pipeline: Arc<QueuePipeline<T>>,
    tracker: Arc<CountLatch>,
    caller: CancellationToken,
}

/// Start `effective_parallelism(configured, backlog_bound)` workers on `pool`
/// that consume items as the caller pushes them.
pub fn proc_in_order_async<T, P>(
    pool: &ThreadPool,
    configured: usize,
    backlog_bound: usize,
    token: &CancellationToken,
    processor: Arc<P>,
    poll: Duration,
) -> Result<PipelineRun<T>, QueueError>
where
    T: Send + 'static,
    P: Processor<T> + ?Sized + 'static,
{
    let workers = effective_parallelism(configured, backlog_bound);
    let pipeline = Arc::new(QueuePipeline::new(workers, token)?);
    let tracker = Arc::new(CountLatch::new(workers));
    debug!(workers, configured, backlog_bound, "proc_in_order_async starting");

    for worker in 0..workers {
        let pipeline = Arc::clone(&pipeline);
        let tracker = Arc::clone(&tracker);
        let processor = Arc::clone(&processor);
        pool.spawn(move || {
            pipeline.run_worker(worker, &*processor, poll);
            tracker.count_down();
        });
    }

    Ok(PipelineRun {
        pipeline,
        tracker,
        caller: token.clone(),
    })
}

impl<T> PipelineRun<T> {
    pub fn workers(&self) -> usize {
        self.pipeline.parallelism()
    }

    /// Feed one item to the workers.
    pub fn push(&self, item: T) -> Result<(), QueueError> {
        self.pipeline.push(item)
    }

    pub fn finish(&self) {
        self.pipeline.finish();
    }

    pub fn drop_everything_and_panic(&self) {
        self.pipeline.drop_everything_and_panic();
    }

    /// True once every worker has observed its tombstone.
    pub fn is_done(&self) -> bool {
        self.tracker.is_open()
    }

    /// Wait for every worker, re-checking the caller's token every `poll`.
    /// A cancelled caller shuts the run down instead of waiting for input
    /// that will never arrive.
    pub fn wait(&self, poll: Duration) -> Result<bool, QueueError> {
        while !self.tracker.wait_timeout(poll) {
            if self.caller.is_canceled() && !self.pipeline.is_panicking() {
                debug!("caller cancelled; dropping pipeline backlog");
                self.pipeline.drop_everything_and_panic();
            }
        }
        self.pipeline.outcome(&self.caller)
    }

    pub fn take_failed(&self) -> Vec<T> {
        self.pipeline.take_failed()
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }
}

/// An unfinished run would leave its workers polling for input that can no
/// longer arrive, each holding a pool thread. Dropping the handle shuts such
/// a run down; a finished run is left to drain.
impl<T> Drop for PipelineRun<T> {
    fn drop(&mut self) {
        if self.tracker.is_open() || self.pipeline.is_finished() {
            return;
        }
        debug!(
            workers = self.pipeline.parallelism(),
            "pipeline run dropped before finish; shutting down"
        );
        self.pipeline.drop_everything_and_panic();
    }
}
