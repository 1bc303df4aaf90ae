//! Job scheduler runner -- owns the dedicated pool and its priority queue.
//!
//! Split into focused submodules:
//! - `core`: JobScheduler struct, constructor, metrics and shutdown
//! - `execution`: job submission, inline execution and waiting

mod core;
mod execution;

pub use self::core::JobScheduler;
