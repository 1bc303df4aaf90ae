//! Bounded-parallelism consumer over a [`BlockingQueue`] with tombstone
//! shutdown.
//!
//! A pipeline run has a fixed worker count `P`. Termination is signalled by
//! tombstones: `finish()` publishes the first one, and every worker that
//! dequeues a tombstone republishes it for the next idle worker until `P`
//! have been published. Each worker exits after observing exactly one, so a
//! run publishes and observes exactly `P` tombstones.
//!
//! Failures never drop input. An item whose processor fails, or that is
//! dequeued after the run started shutting down, goes to the retry queue
//! returned by [`QueuePipeline::take_failed`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace, warn};

use strand_core::{CancellationToken, FailureSlot, Processor, TaskError};

use crate::error::QueueError;
use crate::queue::{BlockingQueue, QueueElement};

/// Worker count for a concurrent produce/consume run:
/// `max(1, min(configured, backlog_bound) - 1)`.
///
/// One slot of the configured parallelism is left for the producer.
pub fn effective_parallelism(configured: usize, backlog_bound: usize) -> usize {
    configured.min(backlog_bound).saturating_sub(1).max(1)
}

/// Counters for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub workers: usize,
    pub processed: usize,
    pub failed: usize,
    pub tombstones_published: usize,
    pub tombstones_observed: usize,
}

#[derive(Debug, Default)]
struct Tombstones {
    published: usize,
    observed: usize,
}

/// Shared state of one pipeline run.
pub struct QueuePipeline<T> {
    queue: BlockingQueue<T>,
    parallelism: usize,
    tombstones: Mutex<Tombstones>,
    /// Set by `drop_everything_and_panic`; items dequeued afterwards are
    /// requeued instead of processed.
    panicking: AtomicBool,
    aborted: AtomicBool,
    processed: AtomicUsize,
    failed: Mutex<Vec<T>>,
    slot: FailureSlot,
    token: CancellationToken,
}

impl<T> QueuePipeline<T> {
    /// A pipeline with `parallelism` workers running under an internal
    /// wrapper of `token`.
    pub fn new(parallelism: usize, token: &CancellationToken) -> Result<Self, QueueError> {
        if parallelism == 0 {
            return Err(QueueError::InvalidParallelism(parallelism));
        }
        Ok(Self {
            queue: BlockingQueue::new(),
            parallelism,
            tombstones: Mutex::new(Tombstones::default()),
            panicking: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            processed: AtomicUsize::new(0),
            failed: Mutex::new(Vec::new()),
            slot: FailureSlot::new(),
            token: token.wrap(),
        })
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// The run's internal token. Cancelling it stops this run only.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Enqueue one item. After `finish()` or a panic the item is moved to
    /// the retry queue and `QueueError::Finished` is returned.
    pub fn push(&self, item: T) -> Result<(), QueueError> {
        match self.queue.push(item) {
            Ok(()) => Ok(()),
            Err(item) => {
                self.failed.lock().push(item);
                Err(QueueError::Finished)
            }
        }
    }

    /// Signal that no more input will arrive.
    pub fn finish(&self) {
        self.queue.close();
        let mut tombstones = self.tombstones.lock();
        if tombstones.published == 0 {
            self.publish_locked(&mut tombstones);
        }
    }

    /// Stop the run as fast as possible: refuse input, move the backlog to
    /// the retry queue unless a tombstone is already visible, and publish
    /// every remaining tombstone. Idempotent.
    pub fn drop_everything_and_panic(&self) {
        if self.panicking.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.close();
        match self.queue.clear_unless_tombstone() {
            Some(backlog) if !backlog.is_empty() => {
                debug!(dropped = backlog.len(), "moving backlog to retry queue");
                self.failed.lock().extend(backlog);
            }
            Some(_) => {}
            None => trace!("tombstone already visible; backlog left for workers to requeue"),
        }
        let mut tombstones = self.tombstones.lock();
        while tombstones.published < self.parallelism {
            self.publish_locked(&mut tombstones);
        }
    }

    fn publish_locked(&self, tombstones: &mut Tombstones) {
        tombstones.published += 1;
        self.queue.push_tombstone();
    }

    fn observe_tombstone(&self) {
        let mut tombstones = self.tombstones.lock();
        tombstones.observed += 1;
        if tombstones.observed < self.parallelism && tombstones.published < self.parallelism {
            self.publish_locked(&mut tombstones);
        }
    }

    pub fn is_panicking(&self) -> bool {
        self.panicking.load(Ordering::Acquire)
    }

    /// `finish()` or a panic has closed the input side.
    pub fn is_finished(&self) -> bool {
        self.queue.is_closed()
    }

    /// Consume elements until a tombstone is observed.
    ///
    /// Idle workers wake every `poll` to check the token; a cancelled token
    /// makes the first worker that notices it shut the run down.
    pub fn run_worker<P>(&self, worker: usize, processor: &P, poll: Duration)
    where
        P: Processor<T> + ?Sized,
    {
        trace!(worker, "queue worker started");
        loop {
            match self.queue.take_timeout(poll) {
                None => {
                    if self.token.is_canceled() && !self.is_panicking() {
                        debug!(worker, "cancellation observed while idle");
                        self.drop_everything_and_panic();
                    }
                }
                Some(QueueElement::Tombstone) => {
                    self.observe_tombstone();
                    break;
                }
                Some(QueueElement::Item(item)) => self.handle(item, processor),
            }
        }
        trace!(worker, "queue worker observed tombstone");
    }

    fn handle<P>(&self, item: T, processor: &P)
    where
        P: Processor<T> + ?Sized,
    {
        if self.is_panicking() {
            self.failed.lock().push(item);
            return;
        }
        if let Err(cancelled) = self.token.check_canceled() {
            self.slot.record(cancelled.into());
            self.failed.lock().push(item);
            self.drop_everything_and_panic();
            return;
        }

        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| processor.process(&item, &self.token)))
            .unwrap_or_else(|payload| Err(TaskError::from_panic(payload)));

        match outcome {
            Ok(true) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                debug!("processor requested abort");
                self.aborted.store(true, Ordering::Release);
                self.token.cancel();
                self.drop_everything_and_panic();
            }
            Err(err) => {
                if err.is_genuine() {
                    warn!(error = %err, "queue item failed; requeued");
                }
                self.failed.lock().push(item);
                self.slot.record(err);
                self.token.cancel();
                self.drop_everything_and_panic();
            }
        }
    }

    /// Apply the top-level decision: a genuine failure wins, then a
    /// cancelled caller token, then an internal abort.
    pub fn outcome(&self, caller: &CancellationToken) -> Result<bool, QueueError> {
        if let Some(err) = self.slot.peek().filter(TaskError::is_genuine) {
            return Err(QueueError::Task(err));
        }
        if let Err(cancelled) = caller.original().check_canceled() {
            return Err(QueueError::Task(cancelled.into()));
        }
        if self.aborted.load(Ordering::Acquire) || self.is_panicking() || self.token.is_canceled() {
            return Ok(false);
        }
        Ok(true)
    }

    /// Hand back every item that was not processed successfully.
    pub fn take_failed(&self) -> Vec<T> {
        std::mem::take(&mut *self.failed.lock())
    }

    pub fn stats(&self) -> PipelineStats {
        let tombstones = self.tombstones.lock();
        PipelineStats {
            workers: self.parallelism,
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.lock().len(),
            tombstones_published: tombstones.published,
            tombstones_observed: tombstones.observed,
        }
    }
}
