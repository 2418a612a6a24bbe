//! Worker side of the queue protocol.
//!
//! ## Design
//!
//! - Handlers are registered per event id (exact, `prefix.*`, or `*`)
//! - The outcome is written to the result store *before* completion is
//!   signalled, so a listener that wakes up on completion can read it
//! - Recurring jobs are re-submitted as a new delayed job one interval out
//!
//! ## Components
//!
//! - `Worker`: claims jobs and runs handlers
//! - `WorkerHandle`: controls a spawned worker loop

pub mod executor;

pub use executor::{
    EventHandler, HandlerResult, JobReport, Worker, WorkerConfig, WorkerError, WorkerHandle,
    WorkerStats,
};
