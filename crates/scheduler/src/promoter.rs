//! Background promotion of delayed jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tasker_infra::WorkQueue;

/// Handle to a task that moves due delayed jobs of one topic to inactive.
pub struct Promoter {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl Promoter {
    /// Promote due jobs every `period` until stopped.
    pub fn spawn<Q>(queue: Arc<Q>, topic: String, period: Duration) -> Self
    where
        Q: WorkQueue + ?Sized + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(promote_loop(queue, topic, period, shutdown_rx));
        Self {
            shutdown: shutdown_tx,
            join,
        }
    }

    /// Stop promoting and wait for the task to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

async fn promote_loop<Q>(
    queue: Arc<Q>,
    topic: String,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    Q: WorkQueue + ?Sized + 'static,
{
    info!(topic = %topic, period_ms = period.as_millis() as u64, "promoter started");

    while !*shutdown_rx.borrow() {
        match queue.promote_due(&topic).await {
            Ok(0) => {}
            Ok(promoted) => debug!(topic = %topic, promoted, "promoted delayed jobs"),
            Err(e) => warn!(topic = %topic, error = %e, "failed to promote delayed jobs"),
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = tokio::time::sleep(period) => {}
        }
    }

    info!(topic = %topic, "promoter stopped");
}
