use serde_json::Value as JsonValue;
use thiserror::Error;

use tasker_core::DomainError;
use tasker_infra::WorkQueueError;

/// Failure to submit a job. Returned synchronously from `schedule`; no
/// future exists when this is returned.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid job: {0}")]
    Invalid(#[from] DomainError),

    #[error("failed to enqueue job: {0}")]
    Enqueue(#[from] WorkQueueError),
}

/// Failure of an introspection or cancellation scan.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to list pending jobs: {0}")]
    Queue(#[from] WorkQueueError),
}

/// Why a one-shot job's future rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobFailure {
    /// The worker recorded an error outcome.
    #[error("job failed: {0}")]
    Failed(JsonValue),

    /// The result store could not be read (strict fallback only).
    #[error("result store unavailable: {0}")]
    ResultUnavailable(String),

    /// The job left the queue without completing (e.g. it was unscheduled).
    #[error("job was removed before it completed")]
    Abandoned,
}
