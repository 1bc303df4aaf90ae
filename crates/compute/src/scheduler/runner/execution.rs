use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, warn};

use strand_core::{Cancelled, CancellationToken, EngineError, ReadWritePermit, TaskError};

use crate::error::JobError;
use crate::scheduler::job::{Job, TaskSlot};
use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::types::{Queued, TaskKey};

use super::core::{JobScheduler, Shared};

/// Type-erased queue entry.
pub(super) trait QueuedWork: Send {
    fn run(self: Box<Self>, shared: &Shared);
    fn cancel(self: Box<Self>, shared: &Shared);
}

struct PooledTask<R> {
    slot: Arc<TaskSlot<R>>,
    token: CancellationToken,
    /// Set when the scheduling thread held this permit for reading.
    permit: Option<Arc<ReadWritePermit>>,
    fail_fast: bool,
    job_seq: u64,
}

impl<R: Send + 'static> QueuedWork for PooledTask<R> {
    fn run(self: Box<Self>, shared: &Shared) {
        // claimed inline by the waiting caller, or cancelled
        if !self.slot.future.is_pending() {
            return;
        }
        match &self.permit {
            None => self.claim_and_execute(shared),
            Some(permit) if self.fail_fast => {
                if permit.try_read(|| self.claim_and_execute(shared)).is_none() {
                    warn!(job = self.job_seq, "read permit unavailable; cancelling job");
                    self.token.cancel();
                    let reason = Cancelled {
                        origin: self.token.id(),
                    };
                    if self.slot.future.cancel(reason) {
                        shared.metrics.write().record_cancellation();
                    }
                }
            }
            // Acquired before claiming: while this thread waits here the
            // caller can still claim and run the task inline.
            Some(permit) => permit.read(|| self.claim_and_execute(shared)),
        }
    }

    fn cancel(self: Box<Self>, shared: &Shared) {
        self.token.cancel();
        let reason = Cancelled {
            origin: self.token.id(),
        };
        if self.slot.future.cancel(reason) {
            shared.metrics.write().record_cancellation();
        }
    }
}

impl<R> PooledTask<R> {
    fn claim_and_execute(&self, shared: &Shared) {
        if self.slot.future.claim() {
            execute(&self.slot, &self.token, &shared.metrics);
        }
    }
}

/// Run a claimed task's body and publish its result.
fn execute<R>(slot: &TaskSlot<R>, token: &CancellationToken, metrics: &RwLock<SchedulerMetrics>) {
    let Some(body) = slot.take_body() else {
        slot.future.complete(Err(TaskError::msg("task body already taken")));
        return;
    };
    if let Err(cancelled) = token.check_canceled() {
        metrics.write().record_cancellation();
        slot.future.complete(Err(cancelled.into()));
        return;
    }

    let start = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| body(token)))
        .unwrap_or_else(|payload| Err(TaskError::from_panic(payload)));
    {
        let mut m = metrics.write();
        m.record_execution(start.elapsed());
        match &result {
            Ok(_) => {}
            Err(err) if err.is_genuine() => m.record_failure(),
            Err(_) => m.record_cancellation(),
        }
    }
    slot.future.complete(result);
}

impl JobScheduler {
    /// Submit every task of `job` to the pool.
    pub fn schedule<R: Send + 'static>(&self, job: &Job<R>) -> Result<(), JobError> {
        if self.is_shut_down() {
            return Err(EngineError::ShutDown.into());
        }
        let job_seq = self.shared.next_job_seq.fetch_add(1, Ordering::Relaxed);
        job.mark_scheduled(job_seq)?;

        let permit = job.read_permit().filter(|p| p.holds_read()).cloned();
        let fail_fast = self.config.fail_fast_on_acquire_read;
        {
            let mut queue = self.shared.queue.lock();
            for (task_seq, slot) in job.slots().iter().enumerate() {
                queue.push(Queued {
                    key: TaskKey {
                        priority: job.priority(),
                        job_seq,
                        task_seq,
                    },
                    work: Box::new(PooledTask {
                        slot: Arc::clone(slot),
                        token: job.token().clone(),
                        permit: permit.clone(),
                        fail_fast,
                        job_seq,
                    }),
                });
            }
        }
        self.shared.metrics.write().jobs_scheduled += 1;

        for _ in 0..job.len() {
            let shared = Arc::clone(&self.shared);
            self.pool.spawn(move || shared.run_next());
        }
        debug!(
            job = job_seq,
            priority = %job.priority(),
            tasks = job.len(),
            needs_permit = permit.is_some(),
            "job scheduled"
        );
        Ok(())
    }

    /// Schedule `job`, then run every still unclaimed task on this thread
    /// and wait for the rest.
    ///
    /// Running inline keeps the job progressing when every pool thread is
    /// busy. Waiting polls each future so that cancellation is noticed, and
    /// finishes with a join pass because a cancelled future reports done
    /// before its body has returned.
    pub fn schedule_and_wait_for_results<R: Send + 'static>(
        &self,
        job: &Job<R>,
    ) -> Result<Vec<R>, JobError> {
        self.schedule(job)?;
        let token = job.token();

        for slot in job.slots() {
            if token.is_canceled() {
                break;
            }
            if slot.future.claim() {
                execute(slot, token, &self.shared.metrics);
            }
        }

        let poll = self.config.future_poll_interval();
        for slot in job.slots() {
            while !slot.future.wait_timeout(poll) {
                if token.is_canceled() {
                    debug!(job = ?job.seq(), "job cancelled while waiting");
                    job.cancel()?;
                }
            }
        }
        for slot in job.slots() {
            slot.future.join();
        }

        job.finish();
        job.results()
    }
}
