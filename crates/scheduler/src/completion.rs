//! Caller-side handles returned by `Scheduler::schedule`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value as JsonValue;
use tokio::sync::oneshot;

use tasker_core::JobId;

use crate::error::JobFailure;

/// Settled value of a one-shot job.
///
/// `Ok(None)` means the job completed without a recorded result.
pub type JobOutcome = Result<Option<JsonValue>, JobFailure>;

/// Future of a one-shot job.
///
/// Settles once, when the queue signals completion. The scheduler imposes no
/// timeout; wrap it in `tokio::time::timeout` for bounded waits.
#[derive(Debug)]
pub struct JobCompletion {
    job_id: JobId,
    receiver: oneshot::Receiver<JobOutcome>,
}

impl JobCompletion {
    pub(crate) fn new(job_id: JobId, receiver: oneshot::Receiver<JobOutcome>) -> Self {
        Self { job_id, receiver }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }
}

impl Future for JobCompletion {
    type Output = JobOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the resolver task died with the runtime.
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(JobFailure::Abandoned)))
    }
}

/// What `schedule` hands back.
#[derive(Debug)]
pub enum Scheduled {
    /// Awaitable one-shot job.
    OneShot(JobCompletion),
    /// Recurring job; nothing to await.
    Recurring(JobId),
}

impl Scheduled {
    pub fn job_id(&self) -> JobId {
        match self {
            Scheduled::OneShot(completion) => completion.job_id(),
            Scheduled::Recurring(job_id) => *job_id,
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Scheduled::Recurring(_))
    }

    pub fn into_completion(self) -> Option<JobCompletion> {
        match self {
            Scheduled::OneShot(completion) => Some(completion),
            Scheduled::Recurring(_) => None,
        }
    }
}
