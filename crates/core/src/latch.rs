use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Counting completion latch: opens once `count_down` has been called as
/// many times as the initial count.
///
/// Waiters use bounded waits so that they can re-check cancellation between
/// attempts instead of blocking indefinitely.
#[derive(Debug)]
pub struct CountLatch {
    remaining: Mutex<usize>,
    opened: Condvar,
}

impl CountLatch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            opened: Condvar::new(),
        }
    }

    /// Decrement the count; wakes every waiter when it reaches zero.
    /// Extra calls after the latch opened are ignored.
    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        if *remaining == 0 {
            return;
        }
        *remaining -= 1;
        if *remaining == 0 {
            self.opened.notify_all();
        }
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.lock()
    }

    pub fn is_open(&self) -> bool {
        self.remaining() == 0
    }

    /// Wait up to `timeout`. Returns true if the latch is open.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut remaining = self.remaining.lock();
        if *remaining == 0 {
            return true;
        }
        self.opened.wait_for(&mut remaining, timeout);
        *remaining == 0
    }

    pub fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining != 0 {
            self.opened.wait(&mut remaining);
        }
    }
}
