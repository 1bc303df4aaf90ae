use strand_core::{EngineError, TaskError};
use thiserror::Error;

use crate::scheduler::JobState;

/// Errors surfaced by the job scheduler.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job is {actual:?}, operation requires {expected:?}")]
    InvalidState { expected: JobState, actual: JobState },

    #[error("job results were already taken")]
    ResultsTaken,

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl JobError {
    /// The task failure carried by this error, if any.
    pub fn task_error(&self) -> Option<&TaskError> {
        match self {
            JobError::Task(err) => Some(err),
            _ => None,
        }
    }
}
