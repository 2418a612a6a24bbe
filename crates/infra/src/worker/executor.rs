//! Worker that claims jobs, runs handlers, and reports outcomes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tasker_core::{DomainError, JobId, JobRecord, Outcome};

use crate::config::{ConfigError, env_lookup, parse_var};
use crate::queue::{QueuedJob, WorkQueue, WorkQueueError};
use crate::results::{ResultStore, ResultStoreError};

/// What a handler produced.
///
/// - `Ok(Some(value))`: success with a value
/// - `Ok(None)`: success with nothing worth recording
/// - `Err(value)`: failure, reported to the submitter
pub type HandlerResult = Result<Option<JsonValue>, JsonValue>;

/// Event handler function type.
pub type EventHandler = Box<dyn Fn(&JobRecord) -> HandlerResult + Send + Sync>;

/// Worker error.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] WorkQueueError),
    #[error(transparent)]
    Results(#[from] ResultStoreError),
    #[error("cannot compute next occurrence: {0}")]
    Reschedule(#[from] DomainError),
}

/// What happened to a job the worker ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: JobId,
    /// The handler returned an error, or no handler matched.
    pub failed: bool,
    /// A follow-up occurrence was enqueued.
    pub rescheduled: bool,
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to poll for new jobs when idle
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
    /// Topic to consume
    pub topic: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "tasker-worker".to_string(),
            topic: "work".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Load from `TASKER_WORKER_NAME`, `TASKER_TOPIC` and
    /// `TASKER_POLL_INTERVAL_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(name) = parse_var::<String, _>(&lookup, "TASKER_WORKER_NAME")? {
            config.name = name;
        }
        if let Some(topic) = parse_var::<String, _>(&lookup, "TASKER_TOPIC")? {
            config.topic = topic;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "TASKER_POLL_INTERVAL_MS")? {
            if ms == 0 {
                return Err(ConfigError::invalid("TASKER_POLL_INTERVAL_MS", "must be positive"));
            }
            config.poll_interval = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    /// Jobs whose handler failed; the error went to the result store.
    pub jobs_failed: u64,
    pub jobs_rescheduled: u64,
    /// Iterations that failed against the queue or result store.
    pub errors: u64,
    pub uptime_secs: u64,
}

impl WorkerStats {
    fn record(&mut self, report: &JobReport) {
        self.jobs_processed += 1;
        if report.failed {
            self.jobs_failed += 1;
        } else {
            self.jobs_succeeded += 1;
        }
        if report.rescheduled {
            self.jobs_rescheduled += 1;
        }
    }
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the current job to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "worker task ended abnormally");
        }
    }

    /// Get current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Queue consumer.
///
/// Claims jobs from a work queue, runs the handler registered for the job's
/// event, records the outcome, and signals completion.
pub struct Worker<Q: ?Sized, R: ?Sized> {
    queue: Arc<Q>,
    results: Arc<R>,
    handlers: HashMap<String, EventHandler>,
}

impl<Q, R> Worker<Q, R>
where
    Q: WorkQueue + ?Sized + 'static,
    R: ResultStore + ?Sized + 'static,
{
    pub fn new(queue: Arc<Q>, results: Arc<R>) -> Self {
        Self {
            queue,
            results,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for an event pattern.
    pub fn register_handler<F>(&mut self, event_pattern: impl Into<String>, handler: F)
    where
        F: Fn(&JobRecord) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.insert(event_pattern.into(), Box::new(handler));
    }

    pub fn has_handler(&self, event_id: &str) -> bool {
        self.get_handler(event_id).is_some()
    }

    fn get_handler(&self, event_id: &str) -> Option<&EventHandler> {
        if let Some(h) = self.handlers.get(event_id) {
            return Some(h);
        }

        // Category match, e.g. "sync.*" matches "sync.inventory".
        for (pattern, handler) in &self.handlers {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if event_id.starts_with(prefix) && event_id[prefix.len()..].starts_with('.') {
                    return Some(handler);
                }
            }
        }

        self.handlers.get("*")
    }

    /// Promote due jobs, then claim and execute at most one job.
    ///
    /// Returns a report on the job that ran, or `None` when the topic was idle.
    pub async fn run_once(&self, topic: &str) -> Result<Option<JobReport>, WorkerError> {
        if let Err(e) = self.queue.promote_due(topic).await {
            warn!(topic = %topic, error = %e, "failed to promote delayed jobs");
        }

        let Some(job) = self.queue.claim_next(topic).await? else {
            return Ok(None);
        };
        debug!(job_id = %job.record.job_id, event_id = %job.record.event_id, "claimed job");

        self.execute(&job).await.map(Some)
    }

    /// Execute a claimed job and report it.
    ///
    /// Order: record outcome, re-submit if recurring, signal completion.
    ///
    /// If a recurring job cannot be re-submitted the error is returned before
    /// completion, and the job stays active rather than silently ending its
    /// chain.
    pub async fn execute(&self, job: &QueuedJob) -> Result<JobReport, WorkerError> {
        let record = &job.record;
        let result = match self.get_handler(record.event_id.as_str()) {
            Some(handler) => handler(record),
            None => {
                warn!(job_id = %record.job_id, event_id = %record.event_id, "no handler for event");
                Err(JsonValue::String(format!("no handler for event: {}", record.event_id)))
            }
        };

        let outcome = match result {
            Ok(Some(value)) => Some(Outcome::Success(value)),
            Ok(None) => None,
            Err(err) => Some(Outcome::Failure(err)),
        };

        if let Some(outcome) = &outcome {
            if let Err(e) = self.results.put(record.job_id, outcome).await {
                // The submitter will see "no outcome" instead.
                error!(job_id = %record.job_id, error = %e, "failed to record job outcome");
            }
        }

        let next = record.next_occurrence(Utc::now())?;
        let rescheduled = next.is_some();
        if let Some(next) = next {
            match self.queue.enqueue(&job.handle.topic, next).await {
                Ok(handle) => debug!(
                    event_id = %record.event_id,
                    next_job_id = %handle.job_id,
                    "re-submitted recurring job"
                ),
                Err(e) => {
                    error!(
                        job_id = %record.job_id,
                        event_id = %record.event_id,
                        error = %e,
                        "failed to re-submit recurring job; leaving it active"
                    );
                    return Err(e.into());
                }
            }
        }

        self.queue.complete(&job.handle).await?;
        let report = JobReport {
            job_id: record.job_id,
            failed: outcome.as_ref().is_some_and(Outcome::is_failure),
            rescheduled,
        };
        debug!(job_id = %record.job_id, failed = report.failed, rescheduled, "job completed");
        Ok(report)
    }

    /// Spawn the worker loop on the tokio runtime.
    pub fn spawn(self, config: WorkerConfig) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let join = tokio::spawn(worker_loop(self, config, shutdown_rx, stats.clone()));

        WorkerHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }
}

async fn worker_loop<Q, R>(
    worker: Worker<Q, R>,
    config: WorkerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    stats: Arc<Mutex<WorkerStats>>,
) where
    Q: WorkQueue + ?Sized + 'static,
    R: ResultStore + ?Sized + 'static,
{
    info!(worker = %config.name, topic = %config.topic, "worker started");
    let start_time = Instant::now();

    while !*shutdown_rx.borrow() {
        let result = worker.run_once(&config.topic).await;

        let idle = {
            let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
            s.uptime_secs = start_time.elapsed().as_secs();
            match &result {
                Ok(Some(report)) => {
                    s.record(report);
                    false
                }
                Ok(None) => true,
                Err(_) => {
                    s.errors += 1;
                    true
                }
            }
        };

        if let Err(e) = result {
            error!(worker = %config.name, error = %e, "worker iteration failed");
        }

        if idle {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
        }
    }

    info!(worker = %config.name, "worker stopped");
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tasker_core::{EventId, Interval};

    use super::*;
    use crate::queue::{InMemoryWorkQueue, JobHandle, JobState};
    use crate::results::InMemoryResultStore;

    const TOPIC: &str = "work";

    fn setup() -> (
        Arc<InMemoryWorkQueue>,
        Arc<InMemoryResultStore>,
        Worker<InMemoryWorkQueue, InMemoryResultStore>,
    ) {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let results = Arc::new(InMemoryResultStore::new());
        let worker = Worker::new(queue.clone(), results.clone());
        (queue, results, worker)
    }

    fn record(event: &str) -> JobRecord {
        JobRecord::new(EventId::new(event).unwrap(), json!({"storeId": 7}))
    }

    #[tokio::test]
    async fn successful_job_records_result_then_signals() {
        let (queue, results, mut worker) = setup();
        worker.register_handler("sync.inventory", |job| {
            Ok(Some(json!({"store": job.context["storeId"], "updated": 12})))
        });

        let job = record("sync.inventory");
        let handle = JobHandle::new(TOPIC, job.job_id);
        let mut signal = queue.on_complete(&handle);
        queue.enqueue(TOPIC, job.clone()).await.unwrap();

        let ran = worker.run_once(TOPIC).await.unwrap().unwrap();
        assert_eq!(ran.job_id, job.job_id);
        assert!(!ran.failed);
        assert!(!ran.rescheduled);
        assert!(signal.wait().await);
        assert_eq!(
            results.get(job.job_id).await.unwrap(),
            Some(Outcome::success(json!({"store": 7, "updated": 12})))
        );
        assert_eq!(queue.state_of(&handle), None);
    }

    #[tokio::test]
    async fn failing_job_records_error() {
        let (queue, results, mut worker) = setup();
        worker.register_handler("sync.inventory", |_| Err(json!("boom")));

        let job = record("sync.inventory");
        queue.enqueue(TOPIC, job.clone()).await.unwrap();
        worker.run_once(TOPIC).await.unwrap();

        assert_eq!(results.get(job.job_id).await.unwrap(), Some(Outcome::failure("boom")));
    }

    #[tokio::test]
    async fn empty_result_writes_nothing() {
        let (queue, results, mut worker) = setup();
        worker.register_handler("tile.push", |_| Ok(None));

        queue.enqueue(TOPIC, record("tile.push")).await.unwrap();
        worker.run_once(TOPIC).await.unwrap();

        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn missing_handler_is_reported_as_failure() {
        let (queue, results, worker) = setup();
        let job = record("unknown.event");
        queue.enqueue(TOPIC, job.clone()).await.unwrap();

        worker.run_once(TOPIC).await.unwrap();
        let outcome = results.get(job.job_id).await.unwrap().unwrap();
        assert!(outcome.is_failure());
    }

    #[tokio::test]
    async fn recurring_job_is_resubmitted_delayed() {
        let (queue, _results, mut worker) = setup();
        worker.register_handler("tile.push", |_| Ok(None));

        let job = record("tile.push").recurring(Interval::from_secs(60).unwrap());
        queue.enqueue(TOPIC, job.clone()).await.unwrap();
        worker.run_once(TOPIC).await.unwrap();

        let delayed = queue
            .list_pending(TOPIC, JobState::Delayed, 0, 10, Default::default())
            .await
            .unwrap();
        assert_eq!(delayed.len(), 1);
        assert_eq!(delayed[0].record.event_id, job.event_id);
        assert_ne!(delayed[0].record.job_id, job.job_id);
        assert_eq!(delayed[0].record.interval, job.interval);
    }

    #[tokio::test]
    async fn longest_interval_is_resubmitted_without_panicking() {
        let (queue, _results, mut worker) = setup();
        worker.register_handler("tick", |_| Ok(None));

        let job = record("tick").recurring(Interval::new(tasker_core::MAX_INTERVAL).unwrap());
        queue.enqueue(TOPIC, job).await.unwrap();

        let report = worker.run_once(TOPIC).await.unwrap().unwrap();
        assert!(report.rescheduled);
        assert_eq!(queue.count(TOPIC, JobState::Delayed), 1);
        assert_eq!(worker.run_once(TOPIC).await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_resubmission_leaves_job_active() {
        let (queue, _results, mut worker) = setup();
        worker.register_handler("tile.push", |_| Ok(None));

        let job = record("tile.push").recurring(Interval::from_secs(60).unwrap());
        queue.enqueue(TOPIC, job).await.unwrap();
        let claimed = queue.claim_next(TOPIC).await.unwrap().unwrap();

        queue.set_unavailable(true);
        let err = worker.execute(&claimed).await.unwrap_err();
        queue.set_unavailable(false);

        assert!(matches!(err, WorkerError::Queue(WorkQueueError::Unavailable(_))));
        assert_eq!(queue.state_of(&claimed.handle), Some(JobState::Active));
        assert_eq!(queue.count(TOPIC, JobState::Delayed), 0);
    }

    #[tokio::test]
    async fn idle_topic_returns_none() {
        let (_queue, _results, worker) = setup();
        assert_eq!(worker.run_once(TOPIC).await.unwrap(), None);
    }

    #[test]
    fn handler_resolution() {
        let (_queue, _results, mut worker) = setup();
        worker.register_handler("sync.*", |_| Ok(None));
        assert!(worker.has_handler("sync.inventory"));
        assert!(!worker.has_handler("syncing"));
        assert!(!worker.has_handler("tile.push"));

        worker.register_handler("*", |_| Ok(None));
        assert!(worker.has_handler("tile.push"));
    }

    #[tokio::test]
    async fn spawned_worker_drains_queue_and_stops() {
        let (queue, results, mut worker) = setup();
        worker.register_handler("*", |job| Ok(Some(job.context.clone())));

        let mut ids = Vec::new();
        for _ in 0..3 {
            let job = record("sync.inventory");
            ids.push(job.job_id);
            queue.enqueue(TOPIC, job).await.unwrap();
        }

        let handle = worker.spawn(
            WorkerConfig::default().with_poll_interval(Duration::from_millis(5)),
        );
        for _ in 0..400 {
            if handle.stats().jobs_processed == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.shutdown().await;

        assert!(queue.is_empty());
        for id in ids {
            assert!(results.contains(id));
        }
    }

    #[tokio::test]
    async fn stats_count_outcomes() {
        let (queue, _results, mut worker) = setup();
        worker.register_handler("ok", |_| Ok(Some(json!(1))));
        worker.register_handler("boom", |_| Err(json!("boom")));
        worker.register_handler("tick", |_| Ok(None));

        queue.enqueue(TOPIC, record("ok")).await.unwrap();
        queue.enqueue(TOPIC, record("boom")).await.unwrap();
        queue
            .enqueue(TOPIC, record("tick").recurring(Interval::from_secs(60).unwrap()))
            .await
            .unwrap();

        let handle = worker.spawn(
            WorkerConfig::default().with_poll_interval(Duration::from_millis(5)),
        );
        for _ in 0..400 {
            if handle.stats().jobs_processed == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let stats = handle.stats();
        handle.shutdown().await;

        assert_eq!(stats.jobs_processed, 3);
        assert_eq!(stats.jobs_succeeded, 2);
        assert_eq!(stats.jobs_failed, 1);
        assert_eq!(stats.jobs_rescheduled, 1);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn config_from_lookup() {
        let config = WorkerConfig::from_lookup(|key| match key {
            "TASKER_TOPIC" => Some("jobs".to_string()),
            "TASKER_POLL_INTERVAL_MS" => Some("250".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.topic, "jobs");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.name, "tasker-worker");

        assert!(WorkerConfig::from_lookup(|_| Some("0".to_string())).is_err());
    }
}
