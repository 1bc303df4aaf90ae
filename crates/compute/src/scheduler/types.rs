use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Task execution priority. Lower numeric value = runs earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(pub i32);

impl Priority {
    pub const HIGH: Priority = Priority(0);
    pub const NORMAL: Priority = Priority(5);
    pub const LOW: Priority = Priority(10);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Position of one task in the scheduler's queue.
///
/// Ordered by priority, then by the order jobs were scheduled, then by the
/// order tasks were added to their job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskKey {
    pub priority: Priority,
    pub job_seq: u64,
    pub task_seq: usize,
}

/// Wrapper that makes `BinaryHeap` (a max-heap) pop the smallest key first.
pub(crate) struct Queued<W> {
    pub(crate) key: TaskKey,
    pub(crate) work: W,
}

impl<W> PartialEq for Queued<W> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<W> Eq for Queued<W> {}

impl<W> Ord for Queued<W> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior
        other.key.cmp(&self.key)
    }
}

impl<W> PartialOrd for Queued<W> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Lifecycle of a [`Job`](super::Job).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Tasks may still be added.
    NotStarted,
    /// Submitted to the pool; some tasks may still be pending or running.
    Scheduled,
    /// Every task finished.
    Done,
    /// Cancelled before every task finished.
    Canceled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn key(priority: i32, job_seq: u64, task_seq: usize) -> TaskKey {
        TaskKey {
            priority: Priority(priority),
            job_seq,
            task_seq,
        }
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::HIGH < Priority::NORMAL);
        assert!(Priority::NORMAL < Priority::LOW);
        assert_eq!(Priority::from(3).to_string(), "P3");
    }

    #[test]
    fn keys_order_by_priority_then_job_then_task() {
        assert!(key(1, 9, 9) < key(2, 0, 0));
        assert!(key(1, 1, 9) < key(1, 2, 0));
        assert!(key(1, 1, 0) < key(1, 1, 1));
    }

    #[test]
    fn heap_pops_smallest_key_first() {
        let mut heap = BinaryHeap::new();
        for (i, k) in [key(5, 0, 0), key(1, 1, 1), key(3, 2, 0), key(1, 1, 0)]
            .into_iter()
            .enumerate()
        {
            heap.push(Queued { key: k, work: i });
        }
        let order: Vec<usize> = std::iter::from_fn(|| heap.pop().map(|q| q.work)).collect();
        assert_eq!(order, vec![3, 1, 2, 0]);
    }
}
