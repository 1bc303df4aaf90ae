use std::sync::atomic::{AtomicBool, Ordering};

/// One claim flag per index of the sequence being applied.
///
/// Each flag moves from unclaimed to claimed exactly once; whoever wins the
/// compare-and-swap owns that index.
pub(crate) struct ClaimArray {
    flags: Box<[AtomicBool]>,
}

impl ClaimArray {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            flags: (0..len).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub(crate) fn try_claim(&self, index: usize) -> bool {
        self.flags[index]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[cfg(test)]
    pub(crate) fn is_claimed(&self, index: usize) -> bool {
        self.flags[index].load(Ordering::Acquire)
    }

    pub(crate) fn claimed_count(&self) -> usize {
        self.flags.iter().filter(|f| f.load(Ordering::Relaxed)).count()
    }
}
