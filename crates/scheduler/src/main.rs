use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;

use tasker_infra::{ResultStore, WorkQueue, Worker, WorkerConfig};
use tasker_scheduler::{
    EventHandlerInfo, Plugin, PluginRegistry, Scheduler, SchedulerConfig, TaskDefinition,
};

const PROMOTE_PERIOD: Duration = Duration::from_secs(1);
const RESULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Demo plugin: an inventory sync event plus a periodic heartbeat.
struct SyncPlugin;

impl Plugin for SyncPlugin {
    fn task(&self) -> Option<TaskDefinition> {
        Some(TaskDefinition::new(
            "heartbeat",
            Duration::from_secs(30),
            |_| {
                tracing::info!("heartbeat");
                Ok(None)
            },
        ))
    }

    fn event_handlers(&self) -> Vec<EventHandlerInfo> {
        vec![EventHandlerInfo::new("inventory", |job| {
            let store_id = job.context.get("storeId").cloned();
            tracing::info!(store_id = ?store_id, "syncing inventory");
            match store_id {
                Some(_) => Ok(Some(json!({ "updated": 12 }))),
                None => Err(json!("missing storeId")),
            }
        })]
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tasker_observability::init();

    let config = SchedulerConfig::from_env().context("invalid scheduler configuration")?;
    let worker_config = WorkerConfig::from_env()
        .context("invalid worker configuration")?
        .with_topic(config.topic.clone());

    #[cfg(feature = "redis")]
    if std::env::var("REDIS_URL").is_ok() {
        let redis = tasker_infra::RedisConfig::from_env().context("invalid redis configuration")?;
        let queue = Arc::new(tasker_infra::queue::RedisWorkQueue::connect(&redis).await?);
        let results = Arc::new(tasker_infra::results::RedisResultStore::connect(&redis).await?);
        tracing::info!(url = %redis.url, "using redis backends");
        return run(queue, results, config, worker_config).await;
    }

    tracing::warn!("no REDIS_URL configured; using in-memory backends");
    let queue = Arc::new(tasker_infra::InMemoryWorkQueue::new());
    let results = Arc::new(tasker_infra::InMemoryResultStore::new());
    run(queue, results, config, worker_config).await
}

async fn run<Q, R>(
    queue: Arc<Q>,
    results: Arc<R>,
    config: SchedulerConfig,
    worker_config: WorkerConfig,
) -> anyhow::Result<()>
where
    Q: WorkQueue + 'static,
    R: ResultStore + 'static,
{
    let scheduler = Scheduler::new(queue.clone(), results.clone(), config);

    let mut registry = PluginRegistry::new();
    registry.register("sync", &SyncPlugin)?;

    let mut worker = Worker::new(queue, results);
    registry.install(&mut worker);
    let worker = worker.spawn(worker_config);
    let promoter = scheduler.spawn_promoter(PROMOTE_PERIOD);

    registry.schedule_tasks(&scheduler).await?;

    let completion = scheduler
        .schedule("sync.inventory", json!({ "storeId": 7 }), None)
        .await?
        .into_completion()
        .context("one-shot job returned no completion")?;
    let job_id = completion.job_id();
    match tokio::time::timeout(RESULT_TIMEOUT, completion).await {
        Ok(Ok(value)) => tracing::info!(job_id = %job_id, result = ?value, "job resolved"),
        Ok(Err(e)) => tracing::warn!(job_id = %job_id, error = %e, "job rejected"),
        Err(_) => tracing::warn!(job_id = %job_id, "timed out waiting for job"),
    }

    tracing::info!("running; press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    let removed = scheduler.shutdown().await?;
    tracing::info!(removed, "removed pending jobs");
    promoter.stop().await;
    worker.shutdown().await;
    Ok(())
}
