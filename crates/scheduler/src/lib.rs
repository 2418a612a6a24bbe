//! `tasker-scheduler`
//!
//! **Responsibility:** the caller-facing scheduling façade.
//!
//! Callers submit named events with a JSON context, either one-shot (awaitable)
//! or recurring. Jobs go to a shared work queue, out-of-process workers run
//! them, and one-shot submissions resolve from the result store once the
//! queue signals completion.
//!
//! The scheduler owns no queue state of its own; everything it reports comes
//! from the injected `WorkQueue` and `ResultStore`.

pub mod completion;
pub mod config;
pub mod error;
pub mod plugin;
pub mod promoter;
pub mod scheduler;

pub use completion::{JobCompletion, JobOutcome, Scheduled};
pub use config::{ReapPolicy, ResultFallback, SchedulerConfig};
pub use error::{JobFailure, ScheduleError, SchedulerError};
pub use plugin::{EventHandlerInfo, Plugin, PluginRegistry, RegistryError, TaskDefinition};
pub use promoter::Promoter;
pub use scheduler::Scheduler;
