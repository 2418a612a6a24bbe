//! `tasker-core`: scheduling building blocks.
//!
//! This crate contains **pure** primitives (no queue or store IO): job and event
//! identity, the job record submitted to a work queue, and the outcome record a
//! worker leaves behind in a result store.

pub mod error;
pub mod id;
pub mod job;
pub mod outcome;

pub use error::DomainError;
pub use id::{EventId, JobId};
pub use job::{Interval, JobRecord, MAX_INTERVAL};
pub use outcome::Outcome;
