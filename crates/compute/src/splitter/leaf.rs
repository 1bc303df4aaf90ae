use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A contiguous sub-range owned by one splitter node once it stops
/// forking. Siblings that run out of work re-enter its claim loop.
#[derive(Debug)]
pub(crate) struct Leaf {
    pub(crate) range: Range<usize>,
    claimed: AtomicUsize,
}

impl Leaf {
    pub(crate) fn new(range: Range<usize>) -> Self {
        Self {
            range,
            claimed: AtomicUsize::new(0),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.range.len()
    }

    pub(crate) fn note_claim(&self) {
        self.claimed.fetch_add(1, Ordering::AcqRel);
    }

    /// Every index has been claimed by someone.
    pub(crate) fn is_finished(&self) -> bool {
        self.claimed.load(Ordering::Acquire) >= self.len()
    }
}
