//! Work-stealing applier over an indexed sequence.
//!
//! A node keeps forking the right half of its range onto the pool until the
//! range is at most `threshold` long, then registers the remainder as a
//! [`Leaf`] and claims its indices left to right. A worker that exhausts its
//! own leaf scans the other registered leaves, starting just after its own
//! position and wrapping, and re-enters the claim loop of every unfinished
//! one. Every index is claimed through [`ClaimArray`] so it runs at most once.
//!
//! With a read permit attached, a leaf only runs while its worker holds the
//! permit. A failed non-blocking attempt records the leaf for a blocking retry
//! on the calling thread after the parallel phase.

mod claim;
mod leaf;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::Scope;
use serde::Serialize;
use tracing::{debug, trace, warn};

use strand_core::{CancellationToken, FailureSlot, Processor, ReadWritePermit, TaskError};

use self::claim::ClaimArray;
use self::leaf::Leaf;

/// Counters describing how one apply call was executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyStats {
    /// Processor invocations.
    pub processed: usize,
    /// Leaves registered by the splitter.
    pub leaves: usize,
    /// Right halves handed to the pool.
    pub forked: usize,
    /// Times a worker entered a sibling's claim loop.
    pub helped: usize,
    /// Leaves retried on the calling thread after a failed permit attempt.
    pub failed_ranges_retried: usize,
}

/// Shared state of one apply call, borrowed by every worker in the scope.
pub(crate) struct SplitContext<'a, T, P: ?Sized> {
    items: &'a [T],
    processor: &'a P,
    token: CancellationToken,
    permit: Option<&'a ReadWritePermit>,
    threshold: usize,
    claims: ClaimArray,
    leaves: Mutex<Vec<Arc<Leaf>>>,
    failed_leaves: Mutex<Vec<Arc<Leaf>>>,
    slot: FailureSlot,
    aborted: AtomicBool,
    processed: AtomicUsize,
    forked: AtomicUsize,
    helped: AtomicUsize,
    retried: AtomicUsize,
}

impl<'a, T, P> SplitContext<'a, T, P>
where
    T: Sync,
    P: Processor<T> + ?Sized,
{
    /// `token` is the run's internal token; cancelling it stops this run.
    pub(crate) fn new(
        items: &'a [T],
        processor: &'a P,
        token: CancellationToken,
        permit: Option<&'a ReadWritePermit>,
        threshold: usize,
    ) -> Self {
        Self {
            items,
            processor,
            token,
            permit,
            threshold: threshold.max(1),
            claims: ClaimArray::new(items.len()),
            leaves: Mutex::new(Vec::new()),
            failed_leaves: Mutex::new(Vec::new()),
            slot: FailureSlot::new(),
            aborted: AtomicBool::new(false),
            processed: AtomicUsize::new(0),
            forked: AtomicUsize::new(0),
            helped: AtomicUsize::new(0),
            retried: AtomicUsize::new(0),
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Entry point for the root node inside a rayon scope.
    pub(crate) fn split<'s>(&'s self, scope: &Scope<'s>, lo: usize, hi: usize)
    where
        'a: 's,
    {
        let mut hi = hi;
        while hi - lo > self.threshold && !self.should_stop() {
            let mid = lo + (hi - lo) / 2;
            let right_hi = hi;
            self.forked.fetch_add(1, Ordering::Relaxed);
            scope.spawn(move |scope| self.split(scope, mid, right_hi));
            hi = mid;
        }

        let (leaf, position) = self.register(lo..hi);
        trace!(range = ?(lo, hi), position, "leaf registered");
        self.run_leaf(&leaf, true);
        self.help_siblings(position);
    }

    fn register(&self, range: std::ops::Range<usize>) -> (Arc<Leaf>, usize) {
        let leaf = Arc::new(Leaf::new(range));
        let mut leaves = self.leaves.lock();
        leaves.push(Arc::clone(&leaf));
        (leaf, leaves.len() - 1)
    }

    /// Round-robin over the registered leaves, starting after `position`.
    fn help_siblings(&self, position: usize) {
        let snapshot: Vec<Arc<Leaf>> = self.leaves.lock().clone();
        let count = snapshot.len();
        for step in 1..count {
            if self.should_stop() {
                return;
            }
            let sibling = &snapshot[(position + step) % count];
            if sibling.is_finished() {
                continue;
            }
            self.helped.fetch_add(1, Ordering::Relaxed);
            trace!(range = ?(sibling.range.start, sibling.range.end), "helping sibling");
            self.run_leaf(sibling, false);
        }
    }

    fn run_leaf(&self, leaf: &Arc<Leaf>, owner: bool) {
        let Some(permit) = self.permit else {
            self.claim_loop(leaf);
            return;
        };
        if permit.try_read(|| self.claim_loop(leaf)).is_some() {
            return;
        }
        if owner {
            debug!(range = ?(leaf.range.start, leaf.range.end), "read permit busy; leaf deferred");
            self.failed_leaves.lock().push(Arc::clone(leaf));
        }
    }

    /// Claim and process the leaf's indices in ascending order.
    fn claim_loop(&self, leaf: &Leaf) {
        for index in leaf.range.clone() {
            if self.should_stop() {
                return;
            }
            if !self.claims.try_claim(index) {
                continue;
            }
            leaf.note_claim();
            self.process(index);
        }
    }

    fn process(&self, index: usize) {
        let item = &self.items[index];
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| self.processor.process(item, &self.token)))
            .unwrap_or_else(|payload| Err(TaskError::from_panic(payload)));
        self.processed.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(true) => {}
            Ok(false) => {
                debug!(index, "processor requested abort");
                self.aborted.store(true, Ordering::Release);
                self.token.cancel();
            }
            Err(err) => {
                if err.is_genuine() {
                    warn!(index, error = %err, "processor failed");
                }
                self.slot.record(err);
                self.token.cancel();
            }
        }
    }

    fn should_stop(&self) -> bool {
        match self.token.check_canceled() {
            Ok(()) => false,
            Err(cancelled) => {
                self.slot.record(cancelled.into());
                true
            }
        }
    }

    /// Process every index on the calling thread, in order.
    pub(crate) fn run_inline(&self) {
        let leaf = Leaf::new(0..self.items.len());
        match self.permit {
            Some(permit) => permit.read(|| self.claim_loop(&leaf)),
            None => self.claim_loop(&leaf),
        }
    }

    /// Blocking retry of every leaf whose owner failed the permit attempt.
    /// Runs on the calling thread after all parallel work has settled.
    pub(crate) fn retry_failed_leaves(&self) {
        let failed = std::mem::take(&mut *self.failed_leaves.lock());
        let Some(permit) = self.permit else {
            return;
        };
        for leaf in failed {
            if self.should_stop() {
                return;
            }
            if leaf.is_finished() {
                continue;
            }
            self.retried.fetch_add(1, Ordering::Relaxed);
            debug!(
                range = ?(leaf.range.start, leaf.range.end),
                "retrying leaf under blocking read"
            );
            permit.read(|| self.claim_loop(&leaf));
        }
    }

    /// Apply the top-level decision against the caller's token.
    pub(crate) fn outcome(&self, caller: &CancellationToken) -> Result<bool, TaskError> {
        if let Some(err) = self.slot.peek().filter(TaskError::is_genuine) {
            return Err(err);
        }
        caller.original().check_canceled()?;
        if self.aborted.load(Ordering::Acquire) || self.token.is_canceled() {
            return Ok(false);
        }
        debug_assert_eq!(self.claims.claimed_count(), self.items.len());
        Ok(true)
    }

    pub(crate) fn stats(&self) -> ApplyStats {
        ApplyStats {
            processed: self.processed.load(Ordering::Relaxed),
            leaves: self.leaves.lock().len(),
            forked: self.forked.load(Ordering::Relaxed),
            helped: self.helped.load(Ordering::Relaxed),
            failed_ranges_retried: self.retried.load(Ordering::Relaxed),
        }
    }
}
