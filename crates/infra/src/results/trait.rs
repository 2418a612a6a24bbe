use async_trait::async_trait;
use thiserror::Error;

use tasker_core::{JobId, Outcome};

/// Result store operation error.
#[derive(Debug, Error)]
pub enum ResultStoreError {
    #[error("result store connection error: {0}")]
    Connection(String),

    #[error("result store command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("stored result is not valid JSON: {0}")]
    Deserialization(String),

    #[error("result store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value store of per-job outcomes.
///
/// Reads are eventually consistent: an outcome may not be visible yet, or may
/// already have been reaped. Absence is a normal answer, not an error.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Read the outcome recorded for `job_id`.
    ///
    /// A stored value carrying neither `result` nor `err` reads as `None`.
    async fn get(&self, job_id: JobId) -> Result<Option<Outcome>, ResultStoreError>;

    /// Record the outcome of `job_id` (worker side).
    async fn put(&self, job_id: JobId, outcome: &Outcome) -> Result<(), ResultStoreError>;

    /// Reap the outcome of `job_id`. Returns whether anything was deleted.
    async fn delete(&self, job_id: JobId) -> Result<bool, ResultStoreError>;
}
