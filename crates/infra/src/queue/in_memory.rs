//! In-memory work queue for tests/dev.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use tasker_core::JobRecord;

use super::completion::{CompletionRegistry, CompletionSignal};
use super::r#trait::{JobHandle, JobState, QueuedJob, SortOrder, WorkQueue, WorkQueueError};

#[derive(Debug, Clone)]
struct Entry {
    record: JobRecord,
    state: JobState,
    /// Enqueue order, used for FIFO claiming.
    seq: u64,
}

impl Entry {
    fn to_queued(&self, handle: &JobHandle) -> QueuedJob {
        QueuedJob {
            handle: handle.clone(),
            state: self.state,
            record: self.record.clone(),
        }
    }
}

/// In-memory work queue.
///
/// - FIFO claiming within a topic
/// - Completion listeners via `CompletionRegistry`
/// - `set_unavailable` simulates a backend outage
#[derive(Debug, Default)]
pub struct InMemoryWorkQueue {
    jobs: RwLock<HashMap<JobHandle, Entry>>,
    completions: CompletionRegistry,
    next_seq: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `WorkQueueError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Current state of a job, if the queue still holds it.
    pub fn state_of(&self, handle: &JobHandle) -> Option<JobState> {
        self.read().get(handle).map(|e| e.state)
    }

    /// Number of jobs of `topic` in `state`.
    pub fn count(&self, topic: &str, state: JobState) -> usize {
        self.read()
            .iter()
            .filter(|(h, e)| h.topic == topic && e.state == state)
            .count()
    }

    /// Number of jobs held, in any state.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of jobs with a live completion listener.
    pub fn listener_count(&self) -> usize {
        self.completions.len()
    }

    fn check_available(&self) -> Result<(), WorkQueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(WorkQueueError::Unavailable("in-memory queue marked unavailable".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<JobHandle, Entry>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<JobHandle, Entry>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, topic: &str, record: JobRecord) -> Result<JobHandle, WorkQueueError> {
        self.check_available()?;

        let handle = JobHandle::new(topic, record.job_id);
        let mut jobs = self.write();
        if jobs.contains_key(&handle) {
            return Err(WorkQueueError::AlreadyExists(record.job_id));
        }

        let state = if record.is_ready(Utc::now()) {
            JobState::Inactive
        } else {
            JobState::Delayed
        };
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        jobs.insert(handle.clone(), Entry { record, state, seq });
        Ok(handle)
    }

    fn on_complete(&self, handle: &JobHandle) -> CompletionSignal {
        self.completions.register(handle.job_id)
    }

    async fn list_pending(
        &self,
        topic: &str,
        state: JobState,
        offset: usize,
        limit: usize,
        order: SortOrder,
    ) -> Result<Vec<QueuedJob>, WorkQueueError> {
        self.check_available()?;

        let jobs = self.read();
        let mut matching: Vec<_> = jobs
            .iter()
            .filter(|(h, e)| h.topic == topic && e.state == state)
            .collect();

        matching.sort_by_key(|(_, e)| (e.record.run_at.filter(|_| state == JobState::Delayed), e.seq));
        if order == SortOrder::Desc {
            matching.reverse();
        }

        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(h, e)| e.to_queued(h))
            .collect())
    }

    async fn remove(&self, handle: &JobHandle) -> Result<bool, WorkQueueError> {
        self.check_available()?;

        let mut jobs = self.write();
        let removable = jobs.get(handle).is_some_and(|e| e.state.is_pending());
        if removable {
            jobs.remove(handle);
            drop(jobs);
            self.completions.discard(handle.job_id);
        }
        Ok(removable)
    }

    async fn promote_due(&self, topic: &str) -> Result<usize, WorkQueueError> {
        self.check_available()?;

        let now = Utc::now();
        let mut jobs = self.write();
        let mut promoted = 0;
        for (handle, entry) in jobs.iter_mut() {
            if handle.topic == topic && entry.state == JobState::Delayed && entry.record.is_ready(now) {
                entry.state = JobState::Inactive;
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    async fn claim_next(&self, topic: &str) -> Result<Option<QueuedJob>, WorkQueueError> {
        self.check_available()?;

        let mut jobs = self.write();
        let next = jobs
            .iter()
            .filter(|(h, e)| h.topic == topic && e.state == JobState::Inactive)
            .min_by_key(|(_, e)| e.seq)
            .map(|(h, _)| h.clone());

        Ok(next.and_then(|handle| {
            let entry = jobs.get_mut(&handle)?;
            entry.state = JobState::Active;
            Some(entry.to_queued(&handle))
        }))
    }

    async fn complete(&self, handle: &JobHandle) -> Result<(), WorkQueueError> {
        self.check_available()?;

        self.write().remove(handle);
        // Signalled even for unknown or already-retired jobs: at-least-once.
        self.completions.notify(handle.job_id);
        Ok(())
    }
}
