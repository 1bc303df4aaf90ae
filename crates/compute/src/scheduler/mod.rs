//! Priority-ordered job scheduler.
//!
//! A [`Job`] groups an ordered list of tasks under one [`Priority`]. The
//! [`JobScheduler`] runs tasks on a dedicated pool in
//! `(priority, job sequence, task sequence)` order. Callers that wait for
//! results also execute unclaimed tasks themselves.

pub mod job;
pub mod metrics;
pub mod runner;
pub mod types;

pub use job::Job;
pub use metrics::SchedulerMetrics;
pub use runner::JobScheduler;
pub use types::{JobState, Priority, TaskKey};
