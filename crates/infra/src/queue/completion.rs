//! Per-job completion listeners.
//!
//! Backends keep a `CompletionRegistry` and call `notify` whenever they see a
//! job complete. Each listener gets its own `CompletionSignal`, fed by an
//! unbounded channel so notifying never blocks the backend.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

use tasker_core::JobId;

/// Receiving end of a completion listener.
///
/// Yields once per completion signal. Once the backend drops the listener
/// (the job was removed, or the backend shut down) `wait` returns `false`.
#[derive(Debug)]
pub struct CompletionSignal {
    receiver: mpsc::UnboundedReceiver<()>,
}

impl CompletionSignal {
    fn new(receiver: mpsc::UnboundedReceiver<()>) -> Self {
        Self { receiver }
    }

    /// A signal that will never fire.
    pub fn closed() -> Self {
        let (_, receiver) = mpsc::unbounded_channel();
        Self::new(receiver)
    }

    /// Wait for the next completion signal. `false` means no signal will ever
    /// arrive.
    pub async fn wait(&mut self) -> bool {
        self.receiver.recv().await.is_some()
    }
}

/// Table size below which abandoned listeners are left for `notify` to prune.
const MIN_SWEEP: usize = 64;

#[derive(Debug)]
struct Listeners {
    by_job: HashMap<JobId, Vec<mpsc::UnboundedSender<()>>>,
    /// Table size that triggers the next full sweep.
    sweep_at: usize,
}

impl Default for Listeners {
    fn default() -> Self {
        Self {
            by_job: HashMap::new(),
            sweep_at: MIN_SWEEP,
        }
    }
}

impl Listeners {
    /// Drop listeners abandoned before their job ever completed.
    ///
    /// Runs once the table has doubled since the last sweep, so the cost is
    /// amortized over registrations.
    fn sweep_if_due(&mut self) {
        if self.by_job.len() < self.sweep_at {
            return;
        }
        self.by_job.retain(|_, txs| {
            txs.retain(|tx| !tx.is_closed());
            !txs.is_empty()
        });
        self.sweep_at = (self.by_job.len() * 2).max(MIN_SWEEP);
    }
}

/// Listener table keyed by job.
#[derive(Debug, Default)]
pub struct CompletionRegistry {
    listeners: Mutex<Listeners>,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener for `job_id`.
    pub fn register(&self, job_id: JobId) -> CompletionSignal {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = self.lock();
        listeners.sweep_if_due();

        let txs = listeners.by_job.entry(job_id).or_default();
        txs.retain(|tx| !tx.is_closed());
        txs.push(tx);
        CompletionSignal::new(rx)
    }

    /// Signal every live listener of `job_id`. Returns how many were reached.
    ///
    /// Listeners stay registered so that a duplicate signal reaches them too;
    /// dropped listeners are pruned here.
    pub fn notify(&self, job_id: JobId) -> usize {
        let mut listeners = self.lock();
        let Some(txs) = listeners.by_job.get_mut(&job_id) else {
            return 0;
        };

        txs.retain(|tx| tx.send(()).is_ok());
        let reached = txs.len();
        if txs.is_empty() {
            listeners.by_job.remove(&job_id);
        }
        reached
    }

    /// Drop every listener of `job_id` without signalling.
    pub fn discard(&self, job_id: JobId) {
        self.lock().by_job.remove(&job_id);
    }

    /// Number of jobs with at least one live listener.
    pub fn len(&self) -> usize {
        self.lock()
            .by_job
            .values()
            .filter(|txs| txs.iter().any(|tx| !tx.is_closed()))
            .count()
    }

    /// Number of jobs with a table entry, live or not.
    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.lock().by_job.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
