//! Parallel execution for the strand engine: a work-stealing splitter for
//! indexed data, a priority job scheduler, and the launcher tying both to
//! the queue pipeline.

pub mod error;
pub mod future;
pub mod launcher;
pub mod scheduler;
mod splitter;

pub use error::JobError;
pub use future::TaskFuture;
pub use launcher::{ApplyOptions, Launcher};
pub use scheduler::{Job, JobScheduler, JobState, Priority, SchedulerMetrics, TaskKey};
pub use splitter::ApplyStats;
