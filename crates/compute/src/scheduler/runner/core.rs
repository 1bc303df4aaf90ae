use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::info;

use strand_core::{EngineConfig, EngineError};

use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::types::Queued;

use super::execution::QueuedWork;

/// State shared between the scheduler handle and its pool threads.
pub(super) struct Shared {
    /// Runnable tasks, smallest key first.
    pub(super) queue: Mutex<BinaryHeap<Queued<Box<dyn QueuedWork>>>>,
    pub(super) metrics: RwLock<SchedulerMetrics>,
    pub(super) shutdown: AtomicBool,
    pub(super) next_job_seq: AtomicU64,
}

impl Shared {
    /// Pop and run the highest-priority task, if any is left.
    pub(super) fn run_next(&self) {
        let next = self.queue.lock().pop();
        if let Some(queued) = next {
            queued.work.run(self);
        }
    }
}

/// Dedicated pool that runs job tasks in priority order.
///
/// Each scheduled task pushes one entry onto a shared priority queue and
/// spawns one pool job that pops whichever entry is first at the time it
/// runs, so a saturated pool drains strictly by
/// `(priority, job sequence, task sequence)`.
pub struct JobScheduler {
    pub(super) shared: Arc<Shared>,
    pub(super) pool: ThreadPool,
    pub(super) config: EngineConfig,
}

impl JobScheduler {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let threads = config.resolved_scheduler_threads();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("strand-job-{i}"))
            .build()
            .map_err(|e| EngineError::PoolBuild(e.to_string()))?;
        info!(threads, fail_fast_read = config.fail_fast_on_acquire_read, "job scheduler started");

        Ok(Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(BinaryHeap::new()),
                metrics: RwLock::new(SchedulerMetrics::default()),
                shutdown: AtomicBool::new(false),
                next_job_seq: AtomicU64::new(1),
            }),
            pool,
            config,
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        let mut snapshot = self.shared.metrics.read().clone();
        snapshot.tasks_pending = self.shared.queue.lock().len();
        snapshot.worker_threads = self.threads();
        snapshot
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Refuse new jobs and cancel every task still waiting in the queue.
    /// Tasks already running finish normally.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let pending: Vec<_> = self.shared.queue.lock().drain().collect();
        let cancelled = pending.len();
        for queued in pending {
            queued.work.cancel(&self.shared);
        }
        info!(cancelled, "job scheduler shut down");
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
