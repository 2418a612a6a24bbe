//! Redis-backed work queue.
//!
//! ## Layout
//!
//! - **Job records**: `{prefix}:job:{job_id}` (JSON string)
//! - **State sets**: `{prefix}:{topic}:{state}` (sorted sets of job ids;
//!   delayed jobs are scored by `run_at`, everything else by enqueue time)
//! - **Completion channel**: `{prefix}:complete` (pub/sub, payload = job id)
//!
//! Claiming uses `ZPOPMIN`, so one inactive job is handed to one worker.
//! Completion is broadcast over pub/sub and picked up by a background listener
//! thread that feeds the local `CompletionRegistry`. `connect` returns only
//! once that thread is subscribed. Pub/sub is not durable: a signal published
//! while the listener is reconnecting is lost.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use tokio::sync::oneshot;
use tracing::{debug, error, instrument, warn};

use tasker_core::{JobId, JobRecord};

use crate::config::RedisConfig;

use super::completion::{CompletionRegistry, CompletionSignal};
use super::r#trait::{JobHandle, JobState, QueuedJob, SortOrder, WorkQueue, WorkQueueError};

/// How long the listener blocks on pub/sub before re-checking for shutdown.
const LISTENER_POLL: Duration = Duration::from_millis(500);

/// Pause before the listener reconnects after a connection failure.
const LISTENER_RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct Keys {
    prefix: String,
}

impl Keys {
    fn job(&self, job_id: JobId) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    fn state(&self, topic: &str, state: JobState) -> String {
        format!("{}:{}:{}", self.prefix, topic, state.as_str())
    }

    fn completions(&self) -> String {
        format!("{}:complete", self.prefix)
    }
}

pub struct RedisWorkQueue {
    conn: MultiplexedConnection,
    keys: Keys,
    completions: Arc<CompletionRegistry>,
    listener_stop: Arc<AtomicBool>,
}

impl RedisWorkQueue {
    /// Connect and start the completion listener.
    ///
    /// Waits until the listener has subscribed, so completions published
    /// after this returns are seen.
    pub async fn connect(config: &RedisConfig) -> Result<Self, WorkQueueError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| WorkQueueError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| WorkQueueError::Connection(e.to_string()))?;

        let keys = Keys {
            prefix: config.key_prefix.clone(),
        };
        let completions = Arc::new(CompletionRegistry::new());
        let listener_stop = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = oneshot::channel();
        spawn_completion_listener(
            client,
            keys.completions(),
            completions.clone(),
            listener_stop.clone(),
            ready_tx,
        )?;
        ready_rx
            .await
            .map_err(|_| WorkQueueError::Connection("completion listener exited".to_string()))?
            .map_err(|e| WorkQueueError::Connection(format!("completion listener: {e}")))?;

        Ok(Self {
            conn,
            keys,
            completions,
            listener_stop,
        })
    }

    async fn load_records(&self, topic: &str, state: JobState, ids: Vec<String>) -> Result<Vec<QueuedJob>, WorkQueueError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let mut parsed = Vec::with_capacity(ids.len());
        for id in ids {
            match id.parse::<JobId>() {
                Ok(job_id) => parsed.push(job_id),
                Err(e) => warn!(job_id = %id, error = %e, "skipping malformed job id"),
            }
        }
        if parsed.is_empty() {
            return Ok(vec![]);
        }

        let record_keys: Vec<String> = parsed.iter().map(|id| self.keys.job(*id)).collect();
        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&record_keys[..])
            .query_async(&mut conn)
            .await
            .map_err(|e| WorkQueueError::Command(format!("MGET failed: {}", e)))?;

        let mut jobs = Vec::with_capacity(parsed.len());
        for (job_id, payload) in parsed.into_iter().zip(raw) {
            // Removed between the range scan and the fetch.
            let Some(payload) = payload else {
                continue;
            };
            match serde_json::from_str::<JobRecord>(&payload) {
                Ok(record) => jobs.push(QueuedJob {
                    handle: JobHandle::new(topic, job_id),
                    state,
                    record,
                }),
                Err(e) => warn!(job_id = %job_id, error = %e, "skipping undecodable job record"),
            }
        }
        Ok(jobs)
    }
}

impl Drop for RedisWorkQueue {
    fn drop(&mut self) {
        self.listener_stop.store(true, Ordering::SeqCst);
    }
}

fn now_ms() -> f64 {
    Utc::now().timestamp_millis() as f64
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    #[instrument(skip(self, record), fields(job_id = %record.job_id), err)]
    async fn enqueue(&self, topic: &str, record: JobRecord) -> Result<JobHandle, WorkQueueError> {
        let payload = serde_json::to_string(&record)
            .map_err(|e| WorkQueueError::Serialization(e.to_string()))?;

        let (state, score) = match record.run_at {
            Some(at) if at > Utc::now() => (JobState::Delayed, at.timestamp_millis() as f64),
            _ => (JobState::Inactive, now_ms()),
        };

        let mut conn = self.conn.clone();
        let created: Option<String> = redis::cmd("SET")
            .arg(self.keys.job(record.job_id))
            .arg(&payload)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| WorkQueueError::Command(format!("SET failed: {}", e)))?;
        if created.is_none() {
            return Err(WorkQueueError::AlreadyExists(record.job_id));
        }

        let _: i64 = redis::cmd("ZADD")
            .arg(self.keys.state(topic, state))
            .arg(score)
            .arg(record.job_id.to_string())
            .query_async(&mut conn)
            .await
            .map_err(|e| WorkQueueError::Command(format!("ZADD failed: {}", e)))?;

        Ok(JobHandle::new(topic, record.job_id))
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
        if limit == 0 {
            return Ok(vec![]);
        }

        let command = match order {
            SortOrder::Asc => "ZRANGE",
            SortOrder::Desc => "ZREVRANGE",
        };
        let mut conn = self.conn.clone();
        let ids: Vec<String> = redis::cmd(command)
            .arg(self.keys.state(topic, state))
            .arg(offset)
            .arg(offset + limit - 1)
            .query_async(&mut conn)
            .await
            .map_err(|e| WorkQueueError::Command(format!("{} failed: {}", command, e)))?;

        self.load_records(topic, state, ids).await
    }

    #[instrument(skip(self), fields(job_id = %handle.job_id), err)]
    async fn remove(&self, handle: &JobHandle) -> Result<bool, WorkQueueError> {
        let member = handle.job_id.to_string();
        let mut conn = self.conn.clone();
        let (delayed, inactive): (i64, i64) = redis::pipe()
            .atomic()
            .cmd("ZREM")
            .arg(self.keys.state(&handle.topic, JobState::Delayed))
            .arg(&member)
            .cmd("ZREM")
            .arg(self.keys.state(&handle.topic, JobState::Inactive))
            .arg(&member)
            .query_async(&mut conn)
            .await
            .map_err(|e| WorkQueueError::Command(format!("ZREM failed: {}", e)))?;

        let removed = delayed + inactive > 0;
        if removed {
            let _: i64 = redis::cmd("DEL")
                .arg(self.keys.job(handle.job_id))
                .query_async(&mut conn)
                .await
                .map_err(|e| WorkQueueError::Command(format!("DEL failed: {}", e)))?;
            self.completions.discard(handle.job_id);
        }
        Ok(removed)
    }

    async fn promote_due(&self, topic: &str) -> Result<usize, WorkQueueError> {
        let delayed_key = self.keys.state(topic, JobState::Delayed);
        let inactive_key = self.keys.state(topic, JobState::Inactive);
        let now = now_ms();

        let mut conn = self.conn.clone();
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&delayed_key)
            .arg("-inf")
            .arg(now)
            .query_async(&mut conn)
            .await
            .map_err(|e| WorkQueueError::Command(format!("ZRANGEBYSCORE failed: {}", e)))?;

        let mut promoted = 0;
        for member in due {
            // Whoever wins the ZREM owns the promotion.
            let taken: i64 = redis::cmd("ZREM")
                .arg(&delayed_key)
                .arg(&member)
                .query_async(&mut conn)
                .await
                .map_err(|e| WorkQueueError::Command(format!("ZREM failed: {}", e)))?;
            if taken == 0 {
                continue;
            }
            let _: i64 = redis::cmd("ZADD")
                .arg(&inactive_key)
                .arg(now)
                .arg(&member)
                .query_async(&mut conn)
                .await
                .map_err(|e| WorkQueueError::Command(format!("ZADD failed: {}", e)))?;
            promoted += 1;
        }

        if promoted > 0 {
            debug!(topic = %topic, promoted, "promoted delayed jobs");
        }
        Ok(promoted)
    }

    async fn claim_next(&self, topic: &str) -> Result<Option<QueuedJob>, WorkQueueError> {
        let mut conn = self.conn.clone();
        let popped: Vec<(String, f64)> = redis::cmd("ZPOPMIN")
            .arg(self.keys.state(topic, JobState::Inactive))
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| WorkQueueError::Command(format!("ZPOPMIN failed: {}", e)))?;

        let Some((member, _)) = popped.into_iter().next() else {
            return Ok(None);
        };
        let job_id: JobId = member
            .parse()
            .map_err(|e| WorkQueueError::Deserialization(format!("job id {member}: {e}")))?;

        let payload: Option<String> = redis::cmd("GET")
            .arg(self.keys.job(job_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| WorkQueueError::Command(format!("GET failed: {}", e)))?;
        let Some(payload) = payload else {
            warn!(job_id = %job_id, "claimed job has no record; dropping");
            return Ok(None);
        };
        let record: JobRecord = serde_json::from_str(&payload)
            .map_err(|e| WorkQueueError::Deserialization(e.to_string()))?;

        let _: i64 = redis::cmd("ZADD")
            .arg(self.keys.state(topic, JobState::Active))
            .arg(now_ms())
            .arg(&member)
            .query_async(&mut conn)
            .await
            .map_err(|e| WorkQueueError::Command(format!("ZADD failed: {}", e)))?;

        Ok(Some(QueuedJob {
            handle: JobHandle::new(topic, job_id),
            state: JobState::Active,
            record,
        }))
    }

    #[instrument(skip(self), fields(job_id = %handle.job_id), err)]
    async fn complete(&self, handle: &JobHandle) -> Result<(), WorkQueueError> {
        let member = handle.job_id.to_string();
        let mut conn = self.conn.clone();
        // The job is retired outright; only the published id outlives it.
        let _: (i64, i64, i64) = redis::pipe()
            .atomic()
            .cmd("ZREM")
            .arg(self.keys.state(&handle.topic, JobState::Active))
            .arg(&member)
            .cmd("DEL")
            .arg(self.keys.job(handle.job_id))
            .cmd("PUBLISH")
            .arg(self.keys.completions())
            .arg(&member)
            .query_async(&mut conn)
            .await
            .map_err(|e| WorkQueueError::Command(format!("complete failed: {}", e)))?;
        Ok(())
    }
}

/// Sent once, after the first successful subscribe or the first failure.
type Ready = oneshot::Sender<Result<(), String>>;

/// Background thread that relays completion messages into the registry.
fn spawn_completion_listener(
    client: redis::Client,
    channel: String,
    registry: Arc<CompletionRegistry>,
    stop: Arc<AtomicBool>,
    ready: Ready,
) -> Result<(), WorkQueueError> {
    thread::Builder::new()
        .name("tasker-completions".to_string())
        .spawn(move || {
            let mut ready = Some(ready);
            while !stop.load(Ordering::SeqCst) {
                if let Err(e) = listen(&client, &channel, &registry, &stop, &mut ready) {
                    // Never subscribed: fail `connect` instead of retrying.
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(e.to_string()));
                        return;
                    }
                    error!(channel = %channel, error = %e, "completion listener disconnected");
                    thread::sleep(LISTENER_RECONNECT_DELAY);
                }
            }
        })
        .map(|_| ())
        .map_err(|e| WorkQueueError::Connection(format!("failed to spawn completion listener: {e}")))
}

fn listen(
    client: &redis::Client,
    channel: &str,
    registry: &CompletionRegistry,
    stop: &AtomicBool,
    ready: &mut Option<Ready>,
) -> redis::RedisResult<()> {
    let mut conn = client.get_connection()?;
    let mut pubsub = conn.as_pubsub();
    pubsub.subscribe(channel)?;
    pubsub.set_read_timeout(Some(LISTENER_POLL))?;
    if let Some(tx) = ready.take() {
        let _ = tx.send(Ok(()));
    }

    while !stop.load(Ordering::SeqCst) {
        let msg = match pubsub.get_message() {
            Ok(m) => m,
            Err(e) if e.is_timeout() => continue,
            Err(e) => return Err(e),
        };

        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(_) => continue,
        };

        match payload.parse::<JobId>() {
            Ok(job_id) => {
                registry.notify(job_id);
            }
            Err(e) => warn!(payload = %payload, error = %e, "ignoring malformed completion message"),
        }
    }
    Ok(())
}
