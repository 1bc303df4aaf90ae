use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::cancel::{CancellationToken, TokenId};

/// Boxed error type accepted from processors and task bodies.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Cancellation signal raised by [`CancellationToken::check_canceled`].
///
/// `origin` names the token whose flag was actually set, which is not
/// necessarily the token that was checked: a wrapper reports its cancelled
/// ancestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled (token {origin})")]
pub struct Cancelled {
    pub origin: TokenId,
}

impl Cancelled {
    /// Whether this cancellation was raised by `token` itself.
    pub fn is_from(&self, token: &CancellationToken) -> bool {
        self.origin == token.id()
    }
}

/// Failure of a single unit of work.
///
/// Cancellation and genuine failures share one type so that workers can
/// merge them into a [`FailureSlot`](crate::FailureSlot) by priority.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error(transparent)]
    Failed(SharedError),

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Wrap an arbitrary error as a genuine failure without altering it.
    pub fn failed<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        TaskError::Failed(SharedError(Arc::new(err)))
    }

    /// Wrap an already boxed error as a genuine failure.
    pub fn from_boxed(err: BoxError) -> Self {
        TaskError::Failed(SharedError(Arc::from(err)))
    }

    /// Build a genuine failure from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        TaskError::from_boxed(message.into())
    }

    /// Convert a payload caught by `catch_unwind` into a failure.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TaskError::Panicked(message)
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Cancelled(_))
    }

    /// Anything that is not a cancellation.
    pub fn is_genuine(&self) -> bool {
        !self.is_cancellation()
    }

    /// Borrow the original error if it has type `E`.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            TaskError::Failed(shared) => shared.0.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// A genuine failure, shared so that the same error can be reported from
/// several places without re-wrapping it.
#[derive(Clone)]
pub struct SharedError(Arc<dyn StdError + Send + Sync + 'static>);

impl SharedError {
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }
}

impl fmt::Debug for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for SharedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// Errors raised while constructing engine components.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("thread pool build failed: {0}")]
    PoolBuild(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("engine has been shut down")]
    ShutDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct DiskOnFire;

    #[test]
    fn failed_keeps_original_error() {
        let err = TaskError::failed(DiskOnFire);
        assert!(err.is_genuine());
        assert!(err.downcast_ref::<DiskOnFire>().is_some());
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = TaskError::from_panic(Box::new("boom"));
        assert!(matches!(err, TaskError::Panicked(ref m) if m == "boom"));

        let err = TaskError::from_panic(Box::new(String::from("owned boom")));
        assert!(matches!(err, TaskError::Panicked(ref m) if m == "owned boom"));

        let err = TaskError::from_panic(Box::new(42_u32));
        assert!(err.is_genuine());
    }

    #[test]
    fn cancellation_is_not_genuine() {
        let token = CancellationToken::new();
        token.cancel();
        let err: TaskError = token.check_canceled().unwrap_err().into();
        assert!(err.is_cancellation());
        assert!(!err.is_genuine());
        assert!(err.downcast_ref::<DiskOnFire>().is_none());
    }
}
