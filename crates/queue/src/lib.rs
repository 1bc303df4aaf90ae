//! Producer/consumer pipeline over a blocking queue with tombstone shutdown.

pub mod error;
pub mod pipeline;
pub mod queue;
pub mod run;

pub use error::QueueError;
pub use pipeline::{effective_parallelism, PipelineStats, QueuePipeline};
pub use queue::{BlockingQueue, QueueElement};
pub use run::{proc_in_order_async, process_queue, PipelineRun};

/// Completion tracker for concurrent runs: opens once every worker has
/// observed its tombstone.
pub use strand_core::CountLatch as CompletionTracker;
