//! Entry point for parallel work on the shared work-stealing pool.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, trace};

use strand_core::{
    CancellationToken, CountLatch, EngineConfig, EngineError, Processor, ReadWritePermit, TaskError,
};
use strand_queue::{BlockingQueue, PipelineRun, QueueError};

use crate::future::TaskFuture;
use crate::splitter::{ApplyStats, SplitContext};

/// Per-call knobs for [`Launcher::apply_concurrently_with`].
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Run every leaf while holding this permit for reading.
    pub read_permit: Option<Arc<ReadWritePermit>>,
    /// Override the configured leaf size.
    pub split_threshold: Option<usize>,
    /// Process on the calling thread even when the pool could help.
    pub force_inline: bool,
}

/// Owns the work-stealing pool and decides how each call is executed.
pub struct Launcher {
    pool: ThreadPool,
    config: EngineConfig,
}

impl Launcher {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let threads = config.resolved_parallelism();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("strand-worker-{i}"))
            .build()
            .map_err(|e| EngineError::PoolBuild(e.to_string()))?;
        info!(threads, "launcher pool started");
        Ok(Self { pool, config })
    }

    pub fn parallelism(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply `processor` to every item exactly once.
    ///
    /// Returns `Ok(true)` when every item was processed, `Ok(false)` when a
    /// processor asked to stop, and `Err` for a genuine failure or when
    /// `token` itself was cancelled.
    pub fn apply_concurrently<T, P>(
        &self,
        items: &[T],
        token: &CancellationToken,
        processor: &P,
    ) -> Result<bool, TaskError>
    where
        T: Sync,
        P: Processor<T> + ?Sized,
    {
        self.apply_concurrently_with(items, token, &ApplyOptions::default(), processor)
    }

    pub fn apply_concurrently_with<T, P>(
        &self,
        items: &[T],
        token: &CancellationToken,
        options: &ApplyOptions,
        processor: &P,
    ) -> Result<bool, TaskError>
    where
        T: Sync,
        P: Processor<T> + ?Sized,
    {
        self.apply_concurrently_stats(items, token, options, processor).0
    }

    /// Like [`apply_concurrently_with`](Self::apply_concurrently_with) but
    /// also reports how the work was split.
    pub fn apply_concurrently_stats<T, P>(
        &self,
        items: &[T],
        token: &CancellationToken,
        options: &ApplyOptions,
        processor: &P,
    ) -> (Result<bool, TaskError>, ApplyStats)
    where
        T: Sync,
        P: Processor<T> + ?Sized,
    {
        let threads = self.parallelism();
        let threshold = options
            .split_threshold
            .unwrap_or_else(|| self.config.split_threshold_for(items.len(), threads));
        let ctx = SplitContext::new(
            items,
            processor,
            token.wrap(),
            options.read_permit.as_deref(),
            threshold,
        );

        if items.len() <= 1 || threads == 1 || options.force_inline {
            debug!(items = items.len(), "applying inline");
            ctx.run_inline();
        } else if self.pool.current_thread_index().is_some() {
            debug!(items = items.len(), threshold, "nested apply; splitting in place");
            self.pool.in_place_scope(|s| ctx.split(s, 0, items.len()));
            ctx.retry_failed_leaves();
        } else {
            debug!(items = items.len(), threshold, threads, "applying on pool");
            self.join_polling(&ctx, token, items.len());
            ctx.retry_failed_leaves();
        }

        let stats = ctx.stats();
        let result = ctx.outcome(token);
        debug!(?stats, ok = result.is_ok(), "apply finished");
        (result, stats)
    }

    /// Run the splitter on the pool while this thread polls for completion,
    /// re-checking the caller's token between waits.
    ///
    /// Each call spawns one scoped OS thread to enter the pool, since `ctx`
    /// borrows the caller's items and cannot be handed to `pool.spawn`. Nested
    /// and inline applies never reach this path.
    fn join_polling<T, P>(
        &self,
        ctx: &SplitContext<'_, T, P>,
        caller: &CancellationToken,
        len: usize,
    ) where
        T: Sync,
        P: Processor<T> + ?Sized,
    {
        let settled = CountLatch::new(1);
        let poll = self.config.join_poll_interval();
        thread::scope(|ts| {
            ts.spawn(|| {
                self.pool.scope(|s| ctx.split(s, 0, len));
                settled.count_down();
            });
            let mut noticed = false;
            while !settled.wait_timeout(poll) {
                if !noticed && caller.is_canceled() {
                    trace!("caller cancelled during join; stopping workers");
                    ctx.token().cancel();
                    noticed = true;
                }
            }
        });
    }

    /// Run one closure on the pool. `on_done` is invoked on the pool thread
    /// once the returned future is complete.
    pub fn submit_to_job_thread<R, F, D>(&self, task: F, on_done: D) -> TaskFuture<R>
    where
        R: Send + 'static,
        F: FnOnce() -> Result<R, TaskError> + Send + 'static,
        D: FnOnce(&TaskFuture<R>) + Send + 'static,
    {
        let future = TaskFuture::new();
        let handle = future.clone();
        self.pool.spawn(move || {
            if handle.claim() {
                let result = panic::catch_unwind(AssertUnwindSafe(task))
                    .unwrap_or_else(|payload| Err(TaskError::from_panic(payload)));
                handle.complete(result);
            }
            on_done(&handle);
        });
        future
    }

    /// Drain `source` and process its items on exactly `workers` pool
    /// tasks. Unprocessed items are appended to `failed`.
    pub fn process_queue<T, P>(
        &self,
        source: &BlockingQueue<T>,
        failed: &mut Vec<T>,
        workers: usize,
        token: &CancellationToken,
        processor: &P,
    ) -> Result<bool, QueueError>
    where
        T: Send,
        P: Processor<T> + ?Sized,
    {
        let (stats, completed) = strand_queue::process_queue(
            &self.pool,
            source,
            failed,
            workers,
            token,
            processor,
            self.config.queue_poll_interval(),
        )?;
        debug!(?stats, completed, "queue processed");
        Ok(completed)
    }

    /// Start consumers that process items as the caller pushes them.
    pub fn proc_in_order_async<T, P>(
        &self,
        backlog_bound: usize,
        token: &CancellationToken,
        processor: Arc<P>,
    ) -> Result<PipelineRun<T>, QueueError>
    where
        T: Send + 'static,
        P: Processor<T> + ?Sized + 'static,
    {
        strand_queue::proc_in_order_async(
            &self.pool,
            self.parallelism(),
            backlog_bound,
            token,
            processor,
            self.config.queue_poll_interval(),
        )
    }
}
