//! Queue error types.

use strand_core::TaskError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is finished; no more input accepted")]
    Finished,

    #[error("invalid parallelism: {0}")]
    InvalidParallelism(usize),

    /// A genuine failure or external cancellation surfaced by a run.
    #[error(transparent)]
    Task(#[from] TaskError),
}
