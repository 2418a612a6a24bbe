use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use tasker_core::{EventId, Interval, JobId, JobRecord, Outcome};
use tasker_infra::{
    CompletionSignal, JobHandle, JobState, QueuedJob, ResultStore, SortOrder, WorkQueue,
};

use crate::completion::{JobCompletion, JobOutcome, Scheduled};
use crate::config::{ReapPolicy, ResultFallback, SchedulerConfig};
use crate::error::{JobFailure, ScheduleError, SchedulerError};
use crate::promoter::Promoter;

/// Submits jobs to a work queue and resolves one-shot jobs from a result
/// store.
///
/// A scheduler owns handles to its backends; several independent schedulers
/// may share the same backends as long as their topics differ.
///
/// Pending-job scans (`unschedule`, `is_scheduled`, `get_tasks`, `shutdown`)
/// are not atomic with respect to workers: a job claimed between scan and
/// removal is simply left alone.
pub struct Scheduler<Q: ?Sized, R: ?Sized> {
    queue: Arc<Q>,
    results: Arc<R>,
    config: SchedulerConfig,
}

impl<Q, R> Scheduler<Q, R>
where
    Q: WorkQueue + ?Sized + 'static,
    R: ResultStore + ?Sized + 'static,
{
    /// A `page_size` of zero is raised to one.
    pub fn new(queue: Arc<Q>, results: Arc<R>, mut config: SchedulerConfig) -> Self {
        config.page_size = config.page_size.max(1);
        info!(
            topic = %config.topic,
            page_size = config.page_size,
            result_fallback = ?config.result_fallback,
            reap_policy = ?config.reap_policy,
            "scheduler initialized"
        );
        Self {
            queue,
            results,
            config,
        }
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<Q> {
        &self.queue
    }

    pub fn results(&self) -> &Arc<R> {
        &self.results
    }

    /// Submit `event_id` with `context`.
    ///
    /// Without an interval the job is one-shot and the returned
    /// [`Scheduled::OneShot`] can be awaited for its outcome. With an interval
    /// the job is recurring; workers re-submit it each period and nothing is
    /// awaited.
    ///
    /// An enqueue failure is returned here; no future exists in that case.
    pub async fn schedule(
        &self,
        event_id: &str,
        context: JsonValue,
        interval: Option<Duration>,
    ) -> Result<Scheduled, ScheduleError> {
        let record = build_record(event_id, context, interval)?;
        self.submit(record).await
    }

    /// Like [`schedule`](Self::schedule), but the job only becomes claimable
    /// once `delay` has passed.
    pub async fn schedule_delayed(
        &self,
        event_id: &str,
        context: JsonValue,
        delay: Duration,
        interval: Option<Duration>,
    ) -> Result<Scheduled, ScheduleError> {
        let record = build_record(event_id, context, interval)?.delayed(delay)?;
        self.submit(record).await
    }

    /// Submit a prepared record under this scheduler's topic.
    pub async fn submit(&self, record: JobRecord) -> Result<Scheduled, ScheduleError> {
        let job_id = record.job_id;
        match record.interval {
            Some(interval) => debug!(
                job_id = %job_id,
                event_id = %record.event_id,
                interval = %interval,
                "scheduling job"
            ),
            None => debug!(
                job_id = %job_id,
                event_id = %record.event_id,
                interval = "(no interval)",
                "scheduling job"
            ),
        }

        if record.is_recurring() {
            self.queue.enqueue(&self.config.topic, record).await?;
            return Ok(Scheduled::Recurring(job_id));
        }

        // Listen before enqueueing so a fast worker cannot finish first.
        let handle = JobHandle::new(self.config.topic.clone(), job_id);
        let signal = self.queue.on_complete(&handle);
        self.queue.enqueue(&self.config.topic, record).await?;

        let (tx, rx) = oneshot::channel();
        tokio::spawn(settle(
            job_id,
            signal,
            self.results.clone(),
            self.config.result_fallback,
            self.config.reap_policy,
            tx,
        ));
        Ok(Scheduled::OneShot(JobCompletion::new(job_id, rx)))
    }

    /// Remove every pending job for `event_id`. Returns how many were removed.
    ///
    /// A failed removal is logged and the scan carries on.
    pub async fn unschedule(&self, event_id: &str) -> Result<usize, SchedulerError> {
        let matching = self
            .pending_jobs()
            .await?
            .into_iter()
            .filter(|job| job.record.event_id == event_id);

        let mut removed = 0;
        for job in matching {
            if self.remove(&job).await {
                removed += 1;
            }
        }
        debug!(event_id = %event_id, removed, "unscheduled event");
        Ok(removed)
    }

    /// Whether at least one pending job exists for `event_id`.
    pub async fn is_scheduled(&self, event_id: &str) -> Result<bool, SchedulerError> {
        let page_size = self.config.page_size;
        for state in JobState::PENDING {
            let mut offset = 0;
            loop {
                let page = self
                    .queue
                    .list_pending(&self.config.topic, state, offset, page_size, SortOrder::Asc)
                    .await?;
                if page.iter().any(|job| job.record.event_id == event_id) {
                    return Ok(true);
                }
                if page.len() < page_size {
                    break;
                }
                offset += page.len();
            }
        }
        Ok(false)
    }

    /// Pending job records, delayed first and then inactive.
    pub async fn get_tasks(&self) -> Result<Vec<JobRecord>, SchedulerError> {
        Ok(self
            .pending_jobs()
            .await?
            .into_iter()
            .map(|job| job.record)
            .collect())
    }

    /// Remove every pending job. In-flight jobs are left to finish and backend
    /// connections stay open. Returns how many jobs were removed.
    pub async fn shutdown(&self) -> Result<usize, SchedulerError> {
        let pending = self.pending_jobs().await?;
        let found = pending.len();

        let mut removed = 0;
        for job in &pending {
            if self.remove(job).await {
                removed += 1;
            }
        }
        info!(topic = %self.config.topic, found, removed, "scheduler shut down");
        Ok(removed)
    }

    /// Periodically promote due delayed jobs of this scheduler's topic.
    pub fn spawn_promoter(&self, period: Duration) -> Promoter {
        Promoter::spawn(self.queue.clone(), self.config.topic.clone(), period)
    }

    async fn pending_jobs(&self) -> Result<Vec<QueuedJob>, SchedulerError> {
        let page_size = self.config.page_size;
        let mut jobs = Vec::new();
        for state in JobState::PENDING {
            let mut offset = 0;
            loop {
                let page = self
                    .queue
                    .list_pending(&self.config.topic, state, offset, page_size, SortOrder::Asc)
                    .await?;
                let fetched = page.len();
                jobs.extend(page);
                if fetched < page_size {
                    break;
                }
                offset += fetched;
            }
        }
        Ok(jobs)
    }

    async fn remove(&self, job: &QueuedJob) -> bool {
        match self.queue.remove(&job.handle).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(
                    job_id = %job.record.job_id,
                    event_id = %job.record.event_id,
                    error = %e,
                    "failed to remove pending job"
                );
                false
            }
        }
    }
}

fn build_record(
    event_id: &str,
    context: JsonValue,
    interval: Option<Duration>,
) -> Result<JobRecord, ScheduleError> {
    let event_id = EventId::new(event_id)?;
    let record = JobRecord::new(event_id, context);
    Ok(match interval {
        Some(period) => record.recurring(Interval::new(period)?),
        None => record,
    })
}

/// Wait for a one-shot job to complete and settle its future.
///
/// Runs at most one resolution: the first completion signal wins and the
/// listener is dropped with it.
async fn settle<R>(
    job_id: JobId,
    mut signal: CompletionSignal,
    results: Arc<R>,
    fallback: ResultFallback,
    reap: ReapPolicy,
    mut tx: oneshot::Sender<JobOutcome>,
) where
    R: ResultStore + ?Sized,
{
    let fired = tokio::select! {
        fired = signal.wait() => Some(fired),
        _ = tx.closed() => None,
    };
    drop(signal);

    let outcome = match fired {
        Some(true) => read_outcome(job_id, results.as_ref(), fallback, reap).await,
        Some(false) => {
            debug!(job_id = %job_id, "job left the queue without completing");
            Err(JobFailure::Abandoned)
        }
        None => {
            debug!(job_id = %job_id, "completion dropped by caller");
            return;
        }
    };

    if tx.send(outcome).is_err() {
        debug!(job_id = %job_id, "completion dropped by caller");
    }
}

async fn read_outcome<R>(
    job_id: JobId,
    results: &R,
    fallback: ResultFallback,
    reap: ReapPolicy,
) -> JobOutcome
where
    R: ResultStore + ?Sized,
{
    let outcome = match results.get(job_id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            return match fallback {
                ResultFallback::Lenient => {
                    warn!(job_id = %job_id, error = %e, "result store unavailable, resolving empty");
                    Ok(None)
                }
                ResultFallback::Strict => Err(JobFailure::ResultUnavailable(e.to_string())),
            };
        }
    };

    let Some(outcome) = outcome else {
        debug!(job_id = %job_id, "job completed without a result");
        return Ok(None);
    };

    if reap == ReapPolicy::DeleteAfterRead {
        if let Err(e) = results.delete(job_id).await {
            warn!(job_id = %job_id, error = %e, "failed to reap result");
        }
    }

    debug!(job_id = %job_id, failed = outcome.is_failure(), "job completed");
    match outcome {
        Outcome::Success(value) => Ok(Some(value)),
        Outcome::Failure(err) => Err(JobFailure::Failed(err)),
    }
}
