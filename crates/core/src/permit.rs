//! Reader/writer coordination permit.
//!
//! Many readers may hold the permit concurrently, or exactly one writer.
//! The lock is task-fair: once a writer is waiting, new readers queue behind
//! it, so the non-blocking [`ReadWritePermit::try_read`] attempt fails while a
//! write is pending. That failure is always recoverable by the caller.
//!
//! Acquisition is reentrant per thread. A thread that already holds the read
//! (or write) permit runs nested read sections directly.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::trace;

static NEXT_PERMIT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Held {
    Read,
    Write,
}

thread_local! {
    /// (permit id, mode, depth) for every permit this thread holds.
    static HELD: RefCell<Vec<(u64, Held, usize)>> = const { RefCell::new(Vec::new()) };
}

/// The single serialization point shared by every engine component.
pub struct ReadWritePermit {
    id: u64,
    lock: RwLock<()>,
}

impl ReadWritePermit {
    pub fn new() -> Self {
        Self {
            id: NEXT_PERMIT_ID.fetch_add(1, Ordering::Relaxed),
            lock: RwLock::new(()),
        }
    }

    /// Whether the current thread holds this permit for reading (holding it
    /// for writing counts too).
    pub fn holds_read(&self) -> bool {
        self.held_mode().is_some()
    }

    /// Whether the current thread holds this permit for writing.
    pub fn holds_write(&self) -> bool {
        self.held_mode() == Some(Held::Write)
    }

    fn held_mode(&self) -> Option<Held> {
        HELD.with(|held| {
            held.borrow()
                .iter()
                .find(|(id, _, _)| *id == self.id)
                .map(|(_, mode, _)| *mode)
        })
    }

    /// Non-blocking attempt. Runs `f` under the read permit and returns its
    /// result, or returns `None` without running `f` if a writer holds or is
    /// waiting for the permit.
    pub fn try_read<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if self.holds_read() {
            return Some(self.nested(Held::Read, f));
        }
        let guard = match self.lock.try_read() {
            Some(guard) => guard,
            None => {
                trace!(permit = self.id, "read permit attempt failed");
                return None;
            }
        };
        let result = self.nested(Held::Read, f);
        drop(guard);
        Some(result)
    }

    /// Blocking acquisition. Waits behind any pending writer.
    pub fn read<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.holds_read() {
            return self.nested(Held::Read, f);
        }
        let guard = self.lock.read();
        let result = self.nested(Held::Read, f);
        drop(guard);
        result
    }

    /// Exclusive acquisition.
    ///
    /// Must not be called by a thread that holds only the read permit; that
    /// would wait on itself forever.
    pub fn write<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.holds_write() {
            return self.nested(Held::Write, f);
        }
        debug_assert!(
            !self.holds_read(),
            "read permit cannot be upgraded to write"
        );
        let guard = self.lock.write();
        let result = self.nested(Held::Write, f);
        drop(guard);
        result
    }

    /// Non-blocking exclusive acquisition.
    pub fn try_write<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if self.holds_write() {
            return Some(self.nested(Held::Write, f));
        }
        if self.holds_read() {
            return None;
        }
        let guard = self.lock.try_write()?;
        let result = self.nested(Held::Write, f);
        drop(guard);
        Some(result)
    }

    /// Run `f` with this thread recorded as a holder. The bookkeeping is
    /// unwound even if `f` panics.
    fn nested<R>(&self, mode: Held, f: impl FnOnce() -> R) -> R {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            match held.iter_mut().find(|(id, _, _)| *id == self.id) {
                Some(entry) => entry.2 += 1,
                None => held.push((self.id, mode, 1)),
            }
        });
        let _release = HeldRelease { id: self.id };
        f()
    }
}

impl Default for ReadWritePermit {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReadWritePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadWritePermit")
            .field("id", &self.id)
            .field("locked", &self.lock.is_locked())
            .finish()
    }
}

struct HeldRelease {
    id: u64,
}

impl Drop for HeldRelease {
    fn drop(&mut self) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().position(|(id, _, _)| *id == self.id) {
                held[pos].2 -= 1;
                if held[pos].2 == 0 {
                    held.swap_remove(pos);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn readers_share_the_permit() {
        let permit = Arc::new(ReadWritePermit::new());
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let permit = Arc::clone(&permit);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    // Both readers must be inside at once to pass the barrier.
                    permit.try_read(|| barrier.wait()).is_some()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }

    #[test]
    fn try_read_fails_while_writer_holds_permit() {
        let permit = Arc::new(ReadWritePermit::new());
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(AtomicBool::new(false));

        let writer = {
            let permit = Arc::clone(&permit);
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            thread::spawn(move || {
                permit.write(|| {
                    entered.wait();
                    while !release.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(1));
                    }
                })
            })
        };

        entered.wait();
        assert!(permit.try_read(|| ()).is_none());
        release.store(true, Ordering::Release);
        writer.join().unwrap();
        assert_eq!(permit.try_read(|| 7), Some(7));
    }

    #[test]
    fn read_is_reentrant() {
        let permit = ReadWritePermit::new();
        assert!(!permit.holds_read());
        let inner = permit.read(|| {
            assert!(permit.holds_read());
            permit.try_read(|| permit.read(|| 3))
        });
        assert_eq!(inner, Some(3));
        assert!(!permit.holds_read());
    }

    #[test]
    fn write_implies_read() {
        let permit = ReadWritePermit::new();
        let value = permit.write(|| {
            assert!(permit.holds_write());
            permit.read(|| 5)
        });
        assert_eq!(value, 5);
        assert!(!permit.holds_write());
    }

    #[test]
    fn try_write_refuses_upgrade() {
        let permit = ReadWritePermit::new();
        let upgraded = permit.read(|| permit.try_write(|| ()));
        assert!(upgraded.is_none());
        assert_eq!(permit.try_write(|| 1), Some(1));
    }

    #[test]
    fn bookkeeping_survives_panics() {
        let permit = ReadWritePermit::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            permit.read(|| panic!("inside read"));
        }));
        assert!(result.is_err());
        assert!(!permit.holds_read());
        assert!(permit.try_write(|| ()).is_some());
    }
}
