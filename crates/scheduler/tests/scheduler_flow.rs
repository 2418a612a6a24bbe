//! Scheduler behaviour against the in-memory backends.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::{Value as JsonValue, json};

use tasker_core::{JobId, Outcome};
use tasker_infra::{
    InMemoryResultStore, InMemoryWorkQueue, JobState, QueuedJob, ResultStore, WorkQueue, Worker,
    WorkerConfig,
};
use tasker_scheduler::{
    JobCompletion, JobFailure, ResultFallback, ScheduleError, Scheduler, SchedulerConfig,
};

const TOPIC: &str = "work";
const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    queue: Arc<InMemoryWorkQueue>,
    results: Arc<InMemoryResultStore>,
    scheduler: Scheduler<InMemoryWorkQueue, InMemoryResultStore>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    fn with_config(config: SchedulerConfig) -> Self {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let results = Arc::new(InMemoryResultStore::new());
        let scheduler = Scheduler::new(queue.clone(), results.clone(), config);
        Self {
            queue,
            results,
            scheduler,
        }
    }

    async fn one_shot(&self, event: &str, context: JsonValue) -> JobCompletion {
        self.scheduler
            .schedule(event, context, None)
            .await
            .unwrap()
            .into_completion()
            .unwrap()
    }

    /// Play the worker: claim the next job and record `raw` for it.
    async fn claim_and_record(&self, raw: Option<JsonValue>) -> QueuedJob {
        let job = self.queue.claim_next(TOPIC).await.unwrap().unwrap();
        if let Some(raw) = raw {
            self.results.put_raw(job.record.job_id, raw);
        }
        job
    }

    async fn finish(&self, raw: Option<JsonValue>) -> JobId {
        let job = self.claim_and_record(raw).await;
        self.queue.complete(&job.handle).await.unwrap();
        job.record.job_id
    }

    async fn events(&self) -> Vec<String> {
        self.scheduler
            .get_tasks()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.event_id.to_string())
            .collect()
    }
}

async fn settle(completion: JobCompletion) -> Result<Option<JsonValue>, JobFailure> {
    tokio::time::timeout(WAIT, completion)
        .await
        .expect("completion did not settle")
}

#[tokio::test]
async fn sync_inventory_resolves_with_worker_result() {
    let h = Harness::new();

    let completion = h.one_shot("sync.inventory", json!({"storeId": 7})).await;
    let job = h.claim_and_record(None).await;
    assert_eq!(job.record.job_id, completion.job_id());
    assert_eq!(job.record.context, json!({"storeId": 7}));

    h.results
        .put(job.record.job_id, &Outcome::success(json!({"updated": 12})))
        .await
        .unwrap();
    h.queue.complete(&job.handle).await.unwrap();

    assert_eq!(settle(completion).await, Ok(Some(json!({"updated": 12}))));
}

#[tokio::test]
async fn success_outcome_resolves_value() {
    let h = Harness::new();
    let completion = h.one_shot("answer", json!({})).await;

    h.finish(Some(json!({"result": 42}))).await;

    assert_eq!(settle(completion).await, Ok(Some(json!(42))));
}

#[tokio::test]
async fn error_outcome_rejects() {
    let h = Harness::new();
    let completion = h.one_shot("explode", json!({})).await;

    h.finish(Some(json!({"err": "boom"}))).await;

    assert_eq!(
        settle(completion).await,
        Err(JobFailure::Failed(json!("boom")))
    );
}

#[tokio::test]
async fn error_wins_when_both_keys_are_present() {
    let h = Harness::new();
    let completion = h.one_shot("mixed", json!({})).await;

    h.finish(Some(json!({"result": 1, "err": "bad"}))).await;

    assert_eq!(settle(completion).await, Err(JobFailure::Failed(json!("bad"))));
}

#[tokio::test]
async fn missing_outcome_resolves_empty() {
    let h = Harness::new();
    let completion = h.one_shot("quiet", json!({})).await;

    h.finish(None).await;

    assert_eq!(settle(completion).await, Ok(None));
}

#[tokio::test]
async fn record_without_outcome_keys_resolves_empty() {
    let h = Harness::new();
    let completion = h.one_shot("odd", json!({})).await;

    h.finish(Some(json!({"something": "else"}))).await;

    assert_eq!(settle(completion).await, Ok(None));
}

#[tokio::test]
async fn result_is_reaped_after_read() {
    let h = Harness::new();
    let completion = h.one_shot("answer", json!({})).await;

    let job_id = h.finish(Some(json!({"result": 42}))).await;
    settle(completion).await.unwrap();

    assert!(!h.results.contains(job_id));
}

#[tokio::test]
async fn store_outage_resolves_empty_when_lenient() {
    let h = Harness::new();
    let completion = h.one_shot("answer", json!({})).await;

    h.results.set_unavailable(true);
    h.finish(Some(json!({"result": 42}))).await;

    assert_eq!(settle(completion).await, Ok(None));
}

#[tokio::test]
async fn store_outage_rejects_when_strict() {
    let h = Harness::with_config(
        SchedulerConfig::default().with_result_fallback(ResultFallback::Strict),
    );
    let completion = h.one_shot("answer", json!({})).await;

    h.results.set_unavailable(true);
    h.finish(Some(json!({"result": 42}))).await;

    assert!(matches!(
        settle(completion).await,
        Err(JobFailure::ResultUnavailable(_))
    ));
}

#[tokio::test]
async fn duplicate_completion_settles_once() {
    let h = Harness::new();
    let completion = h.one_shot("answer", json!({})).await;

    let job = h.claim_and_record(Some(json!({"result": 1}))).await;
    h.queue.complete(&job.handle).await.unwrap();
    h.queue.complete(&job.handle).await.unwrap();
    h.queue.complete(&job.handle).await.unwrap();

    assert_eq!(settle(completion).await, Ok(Some(json!(1))));
    assert_eq!(h.queue.listener_count(), 0);
}

#[tokio::test]
async fn recurring_jobs_create_no_listener() {
    let h = Harness::new();

    for _ in 0..5 {
        let scheduled = h
            .scheduler
            .schedule("tick", json!({}), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(scheduled.is_recurring());
        assert!(scheduled.into_completion().is_none());
    }

    assert_eq!(h.queue.listener_count(), 0);
    assert_eq!(h.queue.count(TOPIC, JobState::Inactive), 5);
}

#[tokio::test]
async fn enqueue_failure_is_returned_synchronously() {
    let h = Harness::new();
    h.queue.set_unavailable(true);

    let err = h.scheduler.schedule("answer", json!({}), None).await.unwrap_err();

    assert!(matches!(err, ScheduleError::Enqueue(_)));
    assert_eq!(h.queue.listener_count(), 0);
}

#[tokio::test]
async fn unschedule_removes_only_matching_jobs() {
    let h = Harness::new();
    h.scheduler.schedule("x", json!({}), None).await.unwrap();
    h.scheduler.schedule("y", json!({}), None).await.unwrap();
    h.scheduler
        .schedule_delayed("x", json!({}), Duration::from_secs(60), None)
        .await
        .unwrap();

    assert_eq!(h.scheduler.unschedule("x").await.unwrap(), 2);
    assert_eq!(h.events().await, vec!["y"]);
}

#[tokio::test]
async fn unschedule_without_match_is_a_noop() {
    let h = Harness::new();
    h.scheduler.schedule("y", json!({}), None).await.unwrap();

    assert_eq!(h.scheduler.unschedule("x").await.unwrap(), 0);
    assert_eq!(h.events().await, vec!["y"]);
}

#[tokio::test]
async fn unschedule_leaves_claimed_jobs_alone() {
    let h = Harness::new();
    h.scheduler.schedule("x", json!({}), None).await.unwrap();
    let job = h.claim_and_record(None).await;

    assert_eq!(h.scheduler.unschedule("x").await.unwrap(), 0);
    assert_eq!(h.queue.state_of(&job.handle), Some(JobState::Active));
}

#[tokio::test]
async fn unscheduled_one_shot_is_abandoned() {
    let h = Harness::new();
    let completion = h.one_shot("x", json!({})).await;

    h.scheduler.unschedule("x").await.unwrap();

    assert_eq!(settle(completion).await, Err(JobFailure::Abandoned));
}

#[tokio::test]
async fn is_scheduled_reflects_pending_jobs() {
    let h = Harness::new();
    assert!(!h.scheduler.is_scheduled("x").await.unwrap());

    h.scheduler.schedule("x", json!({}), None).await.unwrap();
    assert!(h.scheduler.is_scheduled("x").await.unwrap());
    assert!(!h.scheduler.is_scheduled("y").await.unwrap());

    h.claim_and_record(None).await;
    assert!(!h.scheduler.is_scheduled("x").await.unwrap());
}

#[tokio::test]
async fn scans_page_to_exhaustion() {
    let h = Harness::with_config(SchedulerConfig::default().with_page_size(3));
    for i in 0..10 {
        h.scheduler
            .schedule(&format!("bulk.{i}"), json!({}), None)
            .await
            .unwrap();
    }
    h.scheduler.schedule("last", json!({}), None).await.unwrap();

    assert_eq!(h.scheduler.get_tasks().await.unwrap().len(), 11);
    assert!(h.scheduler.is_scheduled("last").await.unwrap());
    assert_eq!(h.scheduler.unschedule("last").await.unwrap(), 1);
    assert_eq!(h.scheduler.get_tasks().await.unwrap().len(), 10);
}

#[tokio::test]
async fn shutdown_empties_pending_jobs() {
    let h = Harness::new();
    for i in 0..12 {
        h.scheduler
            .schedule(&format!("job.{i}"), json!({"i": i}), None)
            .await
            .unwrap();
    }
    h.scheduler
        .schedule("tick", json!({}), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    h.scheduler
        .schedule_delayed("later", json!({}), Duration::from_secs(60), None)
        .await
        .unwrap();

    assert_eq!(h.scheduler.shutdown().await.unwrap(), 14);
    assert!(h.scheduler.get_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_does_not_touch_in_flight_jobs() {
    let h = Harness::new();
    h.scheduler.schedule("busy", json!({}), None).await.unwrap();
    h.scheduler.schedule("idle", json!({}), None).await.unwrap();
    let job = h.claim_and_record(None).await;

    assert_eq!(h.scheduler.shutdown().await.unwrap(), 1);
    assert_eq!(h.queue.state_of(&job.handle), Some(JobState::Active));
}

#[tokio::test]
async fn scan_failure_is_reported() {
    let h = Harness::new();
    h.scheduler.schedule("x", json!({}), None).await.unwrap();
    h.queue.set_unavailable(true);

    assert!(h.scheduler.get_tasks().await.is_err());
    assert!(h.scheduler.is_scheduled("x").await.is_err());
    assert!(h.scheduler.unschedule("x").await.is_err());
}

#[tokio::test]
async fn spawned_worker_resolves_one_shot_jobs() {
    let h = Harness::new();
    let mut worker = Worker::new(h.queue.clone(), h.results.clone());
    worker.register_handler("sync.inventory", |job| {
        assert_eq!(job.context["storeId"], 7);
        Ok(Some(json!({"updated": 12})))
    });
    worker.register_handler("sync.broken", |_| Err(json!("boom")));
    let handle = worker.spawn(
        WorkerConfig::default()
            .with_topic(TOPIC)
            .with_poll_interval(Duration::from_millis(5)),
    );

    let ok = h.one_shot("sync.inventory", json!({"storeId": 7})).await;
    let failed = h.one_shot("sync.broken", json!({})).await;

    assert_eq!(settle(ok).await, Ok(Some(json!({"updated": 12}))));
    assert_eq!(settle(failed).await, Err(JobFailure::Failed(json!("boom"))));
    assert!(h.results.is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn recurring_job_stays_scheduled_after_each_run() {
    let h = Harness::new();
    let mut worker = Worker::new(h.queue.clone(), h.results.clone());
    worker.register_handler("tick", |_| Ok(None));

    let first = h
        .scheduler
        .schedule("tick", json!({"n": 1}), Some(Duration::from_secs(60)))
        .await
        .unwrap();
    let ran = worker.run_once(TOPIC).await.unwrap().unwrap();
    assert_eq!(ran.job_id, first.job_id());
    assert!(ran.rescheduled);

    let tasks = h.scheduler.get_tasks().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_ne!(tasks[0].job_id, first.job_id());
    assert_eq!(tasks[0].context, json!({"n": 1}));
    assert_eq!(h.queue.count(TOPIC, JobState::Delayed), 1);
    assert!(h.scheduler.is_scheduled("tick").await.unwrap());

    assert_eq!(h.scheduler.unschedule("tick").await.unwrap(), 1);
    assert!(!h.scheduler.is_scheduled("tick").await.unwrap());
}

#[tokio::test]
async fn out_of_range_durations_never_reach_the_worker() {
    let h = Harness::new();

    let delayed = h
        .scheduler
        .schedule_delayed("later", json!({}), Duration::MAX, None)
        .await;
    assert!(matches!(delayed, Err(ScheduleError::Invalid(_))));

    for period in [Duration::MAX, Duration::from_secs(10_000_000_000_000)] {
        let recurring = h.scheduler.schedule("tick", json!({}), Some(period)).await;
        assert!(matches!(recurring, Err(ScheduleError::Invalid(_))));
    }

    assert!(h.scheduler.get_tasks().await.unwrap().is_empty());
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn unschedule_removes_exactly_the_matching_event(
        events in prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d"]), 0..30),
        target in prop::sample::select(vec!["a", "b", "c", "d", "e"]),
        page_size in 1usize..8,
    ) {
        let (before, removed, after) = runtime().block_on(async {
            let h = Harness::with_config(SchedulerConfig::default().with_page_size(page_size));
            for event in &events {
                h.scheduler.schedule(event, json!({}), None).await.unwrap();
            }
            let before = h.events().await;
            let removed = h.scheduler.unschedule(target).await.unwrap();
            (before, removed, h.events().await)
        });

        let expected: Vec<String> = before.iter().filter(|e| *e != target).cloned().collect();
        prop_assert_eq!(removed, before.len() - expected.len());
        prop_assert_eq!(after, expected);
    }

    #[test]
    fn one_shot_settles_once_per_job(signals in 1usize..6, value in any::<i64>()) {
        let (settled, listeners) = runtime().block_on(async {
            let h = Harness::new();
            let completion = h.one_shot("answer", json!({})).await;
            let job = h.claim_and_record(Some(json!({"result": value}))).await;
            for _ in 0..signals {
                h.queue.complete(&job.handle).await.unwrap();
            }
            (settle(completion).await, h.queue.listener_count())
        });

        prop_assert_eq!(settled, Ok(Some(json!(value))));
        prop_assert_eq!(listeners, 0);
    }
}
