//! Shared contracts for the strand execution engine: cooperative
//! cancellation, the reader/writer permit, failure aggregation, latches,
//! configuration and tracing setup.

pub mod cancel;
pub mod config;
pub mod error;
pub mod latch;
pub mod permit;
pub mod processor;
pub mod slot;
pub mod telemetry;

pub use cancel::{CancellationToken, TokenId};
pub use config::EngineConfig;
pub use error::{BoxError, Cancelled, EngineError, SharedError, TaskError};
pub use latch::CountLatch;
pub use permit::ReadWritePermit;
pub use processor::Processor;
pub use slot::FailureSlot;
