use crate::cancel::CancellationToken;
use crate::error::TaskError;

/// Per-item unit of work.
///
/// `Ok(true)` continues, `Ok(false)` is a controlled abort that stops every
/// cooperating worker without being an error. The token handed in is the
/// run's own token; long-running processors should poll it.
pub trait Processor<T: ?Sized>: Send + Sync {
    fn process(&self, item: &T, token: &CancellationToken) -> Result<bool, TaskError>;
}

impl<T, F> Processor<T> for F
where
    T: ?Sized,
    F: Fn(&T, &CancellationToken) -> Result<bool, TaskError> + Send + Sync,
{
    fn process(&self, item: &T, token: &CancellationToken) -> Result<bool, TaskError> {
        self(item, token)
    }
}
