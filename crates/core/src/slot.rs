use parking_lot::Mutex;

use crate::error::TaskError;

/// Single shared cell holding the most important failure of a run.
///
/// A genuine failure always displaces a cancellation: the cancellation may
/// well have been caused by that failure being propagated to the shared
/// token. Otherwise the first recorded failure wins.
#[derive(Debug, Default)]
pub struct FailureSlot {
    winner: Mutex<Option<TaskError>>,
}

impl FailureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `err` into the slot. Returns true if it became the winner.
    pub fn record(&self, err: TaskError) -> bool {
        let mut winner = self.winner.lock();
        let replace = match winner.as_ref() {
            None => true,
            Some(current) => current.is_cancellation() && err.is_genuine(),
        };
        if replace {
            *winner = Some(err);
        }
        replace
    }

    pub fn is_empty(&self) -> bool {
        self.winner.lock().is_none()
    }

    pub fn has_genuine(&self) -> bool {
        self.winner.lock().as_ref().is_some_and(TaskError::is_genuine)
    }

    /// Clone of the current winner.
    pub fn peek(&self) -> Option<TaskError> {
        self.winner.lock().clone()
    }

    pub fn take(&self) -> Option<TaskError> {
        self.winner.lock().take()
    }

    pub fn into_inner(self) -> Option<TaskError> {
        self.winner.into_inner()
    }
}
