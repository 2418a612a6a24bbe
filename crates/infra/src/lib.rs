//! Infrastructure layer: work queue and result store backends, the worker
//! loop, and backend configuration.

pub mod config;
pub mod queue;
pub mod results;
pub mod worker;

pub use config::{ConfigError, RedisConfig};
pub use queue::{
    CompletionRegistry, CompletionSignal, InMemoryWorkQueue, JobHandle, JobState, QueuedJob,
    SortOrder, WorkQueue, WorkQueueError,
};
pub use results::{InMemoryResultStore, ResultStore, ResultStoreError};
pub use worker::{
    EventHandler, HandlerResult, JobReport, Worker, WorkerConfig, WorkerError, WorkerHandle,
    WorkerStats,
};
