use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tasker_core::{JobId, JobRecord};

use super::completion::CompletionSignal;

/// Where a job sits in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for its `run_at` time.
    Delayed,
    /// Queued, waiting for a worker.
    Inactive,
    /// Claimed by a worker.
    Active,
}

impl JobState {
    /// States a job can still be removed from.
    pub const PENDING: [JobState; 2] = [JobState::Delayed, JobState::Inactive];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Delayed => "delayed",
            JobState::Inactive => "inactive",
            JobState::Active => "active",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Delayed | JobState::Inactive)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Address of a job in the queue: its topic plus its identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub topic: String,
    pub job_id: JobId,
}

impl JobHandle {
    pub fn new(topic: impl Into<String>, job_id: JobId) -> Self {
        Self {
            topic: topic.into(),
            job_id,
        }
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.topic, self.job_id)
    }
}

/// A job as observed in the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub handle: JobHandle,
    pub state: JobState,
    pub record: JobRecord,
}

/// Work queue operation error.
#[derive(Debug, Error)]
pub enum WorkQueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Durable, multi-consumer job queue.
///
/// The scheduler side uses `enqueue`, `on_complete`, `list_pending` and
/// `remove`. Workers use `promote_due`, `claim_next` and `complete`.
///
/// ## Delivery
///
/// Completion may be signalled more than once for the same job (at-least-once);
/// listeners must tolerate duplicates. Implementations must make `claim_next`
/// atomic so one job is handed to at most one worker at a time.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Add a job to `topic`. Jobs whose `run_at` lies in the future start out
    /// delayed; everything else is inactive.
    async fn enqueue(&self, topic: &str, record: JobRecord) -> Result<JobHandle, WorkQueueError>;

    /// Listen for completion of `handle`.
    ///
    /// May be called before the job is enqueued, so that a fast worker cannot
    /// complete the job before anyone listens.
    fn on_complete(&self, handle: &JobHandle) -> CompletionSignal;

    /// Page through the jobs of `topic` in `state`.
    ///
    /// Delayed jobs are ordered by `run_at`, others by enqueue order.
    async fn list_pending(
        &self,
        topic: &str,
        state: JobState,
        offset: usize,
        limit: usize,
        order: SortOrder,
    ) -> Result<Vec<QueuedJob>, WorkQueueError>;

    /// Remove a delayed or inactive job. Returns `false` when the job was no
    /// longer removable (already claimed, finished, or gone).
    async fn remove(&self, handle: &JobHandle) -> Result<bool, WorkQueueError>;

    /// Move delayed jobs whose `run_at` has passed to inactive.
    async fn promote_due(&self, topic: &str) -> Result<usize, WorkQueueError>;

    /// Claim the oldest inactive job of `topic`, marking it active.
    async fn claim_next(&self, topic: &str) -> Result<Option<QueuedJob>, WorkQueueError>;

    /// Retire a finished job and signal its listeners.
    ///
    /// The job leaves the queue entirely; only the completion signal remains.
    async fn complete(&self, handle: &JobHandle) -> Result<(), WorkQueueError>;
}
