use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use strand_core::{Cancelled, CancellationToken, ReadWritePermit, TaskError};

use crate::error::JobError;
use crate::future::TaskFuture;

use super::types::{JobState, Priority};

/// A unit of work. Receives the job's token and should poll it when long
/// running.
pub(crate) type TaskBody<R> = Box<dyn FnOnce(&CancellationToken) -> Result<R, TaskError> + Send>;

/// One task of a job: its body until someone claims it, and its future.
pub(crate) struct TaskSlot<R> {
    body: Mutex<Option<TaskBody<R>>>,
    pub(crate) future: TaskFuture<R>,
}

impl<R> TaskSlot<R> {
    fn new(body: TaskBody<R>) -> Self {
        Self {
            body: Mutex::new(Some(body)),
            future: TaskFuture::new(),
        }
    }

    /// Only the claimer of the future may take the body.
    pub(crate) fn take_body(&self) -> Option<TaskBody<R>> {
        self.body.lock().take()
    }
}

/// An ordered list of tasks scheduled together at one priority.
///
/// Tasks can only be added before the job is scheduled. After scheduling
/// the job can be polled, cancelled and finally asked for its results.
pub struct Job<R> {
    priority: Priority,
    tasks: Vec<Arc<TaskSlot<R>>>,
    token: CancellationToken,
    read_permit: Option<Arc<ReadWritePermit>>,
    state: Mutex<JobState>,
    seq: AtomicU64,
}

impl<R: Send + 'static> Job<R> {
    pub fn new(priority: impl Into<Priority>) -> Self {
        Self::build(priority.into(), CancellationToken::new())
    }

    /// A job whose token observes `parent`. Cancelling the job never
    /// cancels `parent`.
    pub fn with_token(priority: impl Into<Priority>, parent: &CancellationToken) -> Self {
        Self::build(priority.into(), parent.child())
    }

    /// A job holding exactly one task.
    pub fn single<F>(priority: impl Into<Priority>, body: F) -> Self
    where
        F: FnOnce(&CancellationToken) -> Result<R, TaskError> + Send + 'static,
    {
        let mut job = Self::new(priority);
        job.tasks.push(Arc::new(TaskSlot::new(Box::new(body))));
        job
    }

    fn build(priority: Priority, token: CancellationToken) -> Self {
        Self {
            priority,
            tasks: Vec::new(),
            token,
            read_permit: None,
            state: Mutex::new(JobState::NotStarted),
            seq: AtomicU64::new(0),
        }
    }

    /// Pool threads running this job's tasks must hold `permit` whenever
    /// the scheduling thread held it at submission time.
    pub fn with_read_permit(mut self, permit: Arc<ReadWritePermit>) -> Self {
        self.read_permit = Some(permit);
        self
    }

    pub fn add_task<F>(&mut self, body: F) -> Result<(), JobError>
    where
        F: FnOnce(&CancellationToken) -> Result<R, TaskError> + Send + 'static,
    {
        let state = *self.state.get_mut();
        if state != JobState::NotStarted {
            return Err(JobError::InvalidState {
                expected: JobState::NotStarted,
                actual: state,
            });
        }
        self.tasks.push(Arc::new(TaskSlot::new(Box::new(body))));
        Ok(())
    }
}

impl<R> Job<R> {
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Sequence number assigned when the job was scheduled.
    pub fn seq(&self) -> Option<u64> {
        match self.seq.load(Ordering::Acquire) {
            0 => None,
            seq => Some(seq),
        }
    }

    pub(crate) fn read_permit(&self) -> Option<&Arc<ReadWritePermit>> {
        self.read_permit.as_ref()
    }

    pub(crate) fn slots(&self) -> &[Arc<TaskSlot<R>>] {
        &self.tasks
    }

    pub fn futures(&self) -> impl Iterator<Item = &TaskFuture<R>> {
        self.tasks.iter().map(|slot| &slot.future)
    }

    pub fn state(&self) -> JobState {
        let stored = *self.state.lock();
        match stored {
            JobState::Scheduled if self.all_futures_done() => {
                if self.token.is_canceled() {
                    JobState::Canceled
                } else {
                    JobState::Done
                }
            }
            other => other,
        }
    }

    fn all_futures_done(&self) -> bool {
        self.tasks.iter().all(|slot| slot.future.is_done())
    }

    fn require_started(&self) -> Result<JobState, JobError> {
        match self.state() {
            JobState::NotStarted => Err(JobError::InvalidState {
                expected: JobState::Scheduled,
                actual: JobState::NotStarted,
            }),
            state => Ok(state),
        }
    }

    pub(crate) fn mark_scheduled(&self, seq: u64) -> Result<(), JobError> {
        let mut state = self.state.lock();
        if *state != JobState::NotStarted {
            return Err(JobError::InvalidState {
                expected: JobState::NotStarted,
                actual: *state,
            });
        }
        *state = JobState::Scheduled;
        self.seq.store(seq, Ordering::Release);
        Ok(())
    }

    /// Record the terminal state once every task has settled.
    pub(crate) fn finish(&self) {
        let mut state = self.state.lock();
        if *state == JobState::Scheduled {
            *state = if self.token.is_canceled() {
                JobState::Canceled
            } else {
                JobState::Done
            };
        }
    }

    /// Cancel every task that has not finished. Running bodies are not
    /// interrupted, but the job reports cancelled immediately. Idempotent.
    pub fn cancel(&self) -> Result<(), JobError> {
        if self.require_started()? == JobState::Done {
            return Ok(());
        }
        *self.state.lock() = JobState::Canceled;
        self.token.cancel();
        let reason = Cancelled {
            origin: self.token.id(),
        };
        for slot in &self.tasks {
            slot.future.cancel(reason);
        }
        Ok(())
    }

    pub fn is_done(&self) -> Result<bool, JobError> {
        self.require_started()?;
        Ok(self.all_futures_done())
    }

    pub fn is_canceled(&self) -> Result<bool, JobError> {
        let state = self.require_started()?;
        Ok(state == JobState::Canceled || self.token.is_canceled())
    }

    /// Block until every task is done and every body has finished.
    pub fn wait(&self) -> Result<(), JobError> {
        self.require_started()?;
        for slot in &self.tasks {
            slot.future.wait();
        }
        for slot in &self.tasks {
            slot.future.join();
        }
        self.finish();
        Ok(())
    }

    /// Per-task results in the order tasks were added. A genuine failure
    /// wins over a cancellation. Results can be taken once.
    pub fn results(&self) -> Result<Vec<R>, JobError> {
        let state = self.require_started()?;
        if !self.all_futures_done() {
            return Err(JobError::InvalidState {
                expected: JobState::Done,
                actual: state,
            });
        }

        let mut values = Vec::with_capacity(self.tasks.len());
        let mut failure: Option<TaskError> = None;
        let mut cancellation: Option<TaskError> = None;
        for slot in &self.tasks {
            match slot.future.take_result() {
                Some(Ok(value)) => values.push(value),
                Some(Err(err)) if err.is_genuine() => {
                    failure.get_or_insert(err);
                }
                Some(Err(err)) => {
                    cancellation.get_or_insert(err);
                }
                None => return Err(JobError::ResultsTaken),
            }
        }
        if let Some(err) = failure.or(cancellation) {
            return Err(JobError::Task(err));
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_task_only_before_scheduling() {
        let mut job: Job<u32> = Job::new(1);
        job.add_task(|_| Ok(1)).unwrap();
        job.mark_scheduled(1).unwrap();

        let err = job.add_task(|_| Ok(2)).unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidState {
                expected: JobState::NotStarted,
                actual: JobState::Scheduled
            }
        ));
        assert!(matches!(job.mark_scheduled(2), Err(JobError::InvalidState { .. })));
    }

    #[test]
    fn queries_require_scheduling() {
        let job: Job<u32> = Job::single(Priority::HIGH, |_| Ok(1));
        assert_eq!(job.state(), JobState::NotStarted);
        assert!(job.is_done().is_err());
        assert!(job.is_canceled().is_err());
        assert!(job.cancel().is_err());
        assert!(job.results().is_err());
    }

    #[test]
    fn cancel_marks_every_pending_future() {
        let mut job: Job<u32> = Job::new(1);
        job.add_task(|_| Ok(1)).unwrap();
        job.add_task(|_| Ok(2)).unwrap();
        job.mark_scheduled(7).unwrap();

        job.cancel().unwrap();
        job.cancel().unwrap();
        assert!(job.is_canceled().unwrap());
        assert!(job.is_done().unwrap());
        assert!(job.futures().all(TaskFuture::is_cancelled));
        assert_eq!(job.state(), JobState::Canceled);

        let err = job.results().unwrap_err();
        assert!(err.task_error().is_some_and(TaskError::is_cancellation));
    }

    #[test]
    fn genuine_failure_beats_cancellation_in_results() {
        let mut job: Job<u32> = Job::new(1);
        job.add_task(|_| Ok(1)).unwrap();
        job.add_task(|_| Ok(2)).unwrap();
        job.mark_scheduled(1).unwrap();

        let slots = job.slots();
        slots[0].future.cancel(Cancelled {
            origin: job.token().id(),
        });
        assert!(slots[1].future.claim());
        slots[1].future.complete(Err(TaskError::msg("broken")));

        let err = job.results().unwrap_err();
        assert_eq!(err.task_error().map(ToString::to_string).as_deref(), Some("broken"));
    }

    #[test]
    fn job_token_is_child_of_parent() {
        let parent = CancellationToken::new();
        let job: Job<()> = Job::with_token(0, &parent);
        job.token().cancel();
        assert!(!parent.is_canceled());

        let job: Job<()> = Job::with_token(0, &parent);
        parent.cancel();
        assert!(job.token().is_canceled());
    }
}
