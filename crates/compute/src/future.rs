//! Completion cell shared between whoever runs a task and whoever waits
//! for it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use strand_core::{Cancelled, TaskError};

enum Status<R> {
    Pending,
    Running,
    /// `None` once the result has been taken.
    Completed(Option<Result<R, TaskError>>),
    Cancelled(Cancelled),
}

struct Cell<R> {
    status: Status<R>,
    /// The body either ran to the end or will never run. A cancelled future
    /// reports done before this is set when its body is still unwinding.
    body_finished: bool,
}

/// Handle to the eventual result of one task.
///
/// A task runs at most once: both the pool and the submitting thread may
/// try to [`claim`](Self::claim) it, and only the first claim succeeds.
pub struct TaskFuture<R> {
    inner: Arc<(Mutex<Cell<R>>, Condvar)>,
}

impl<R> Clone for TaskFuture<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> TaskFuture<R> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(Cell {
                    status: Status::Pending,
                    body_finished: false,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Move from pending to running. False if someone else claimed it or it
    /// was cancelled first.
    pub(crate) fn claim(&self) -> bool {
        let mut cell = self.inner.0.lock();
        if matches!(cell.status, Status::Pending) {
            cell.status = Status::Running;
            true
        } else {
            false
        }
    }

    /// Store the body's result. A future cancelled while running drops it.
    pub(crate) fn complete(&self, result: Result<R, TaskError>) {
        let (lock, changed) = &*self.inner;
        let mut cell = lock.lock();
        if matches!(cell.status, Status::Running | Status::Pending) {
            cell.status = Status::Completed(Some(result));
        }
        cell.body_finished = true;
        changed.notify_all();
    }

    /// Cancel without interrupting a running body. Returns false if the
    /// future had already completed or been cancelled.
    pub fn cancel(&self, reason: Cancelled) -> bool {
        let (lock, changed) = &*self.inner;
        let mut cell = lock.lock();
        match cell.status {
            Status::Pending => cell.body_finished = true,
            Status::Running => {}
            Status::Completed(_) | Status::Cancelled(_) => return false,
        }
        cell.status = Status::Cancelled(reason);
        changed.notify_all();
        true
    }

    /// Nobody has claimed or cancelled it yet.
    pub fn is_pending(&self) -> bool {
        matches!(self.inner.0.lock().status, Status::Pending)
    }

    pub fn is_done(&self) -> bool {
        matches!(
            self.inner.0.lock().status,
            Status::Completed(_) | Status::Cancelled(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.0.lock().status, Status::Cancelled(_))
    }

    /// Wait up to `timeout` for the future to be done.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, changed) = &*self.inner;
        let mut cell = lock.lock();
        if !matches!(cell.status, Status::Completed(_) | Status::Cancelled(_)) {
            changed.wait_for(&mut cell, timeout);
        }
        matches!(cell.status, Status::Completed(_) | Status::Cancelled(_))
    }

    /// Block until the future is done.
    pub fn wait(&self) {
        let (lock, changed) = &*self.inner;
        let mut cell = lock.lock();
        while !matches!(cell.status, Status::Completed(_) | Status::Cancelled(_)) {
            changed.wait(&mut cell);
        }
    }

    /// Block until the body has fully finished or is known never to run.
    pub fn join(&self) {
        let (lock, changed) = &*self.inner;
        let mut cell = lock.lock();
        while !cell.body_finished {
            changed.wait(&mut cell);
        }
    }

    /// Take the result out. `None` while still pending or running, or if it
    /// was already taken. Cancellation yields `Some(Err(..))` every time.
    pub fn take_result(&self) -> Option<Result<R, TaskError>> {
        let mut cell = self.inner.0.lock();
        match &mut cell.status {
            Status::Completed(result) => result.take(),
            Status::Cancelled(reason) => Some(Err((*reason).into())),
            Status::Pending | Status::Running => None,
        }
    }
}

impl<R> fmt::Debug for TaskFuture<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.inner.0.lock();
        let status = match cell.status {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Completed(_) => "completed",
            Status::Cancelled(_) => "cancelled",
        };
        f.debug_struct("TaskFuture")
            .field("status", &status)
            .field("body_finished", &cell.body_finished)
            .finish()
    }
}
