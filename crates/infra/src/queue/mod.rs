//! Work queue boundary.
//!
//! The queue holds job records for a topic, hands them to workers, and
//! signals when a job completes. Queue state lives in shared infrastructure;
//! nothing here assumes it is held locally.
//!
//! ## Job states
//!
//! ```text
//! enqueue ─► delayed ─(promote_due)─► inactive ─(claim_next)─► active ─(complete)─► (retired)
//!               │                        │
//!               └──────── remove ────────┴─► (gone)
//! ```

pub mod completion;
pub mod in_memory;
pub mod r#trait;

#[cfg(feature = "redis")]
pub mod redis;

pub use completion::{CompletionRegistry, CompletionSignal};
pub use in_memory::InMemoryWorkQueue;
pub use r#trait::{JobHandle, JobState, QueuedJob, SortOrder, WorkQueue, WorkQueueError};

#[cfg(feature = "redis")]
pub use redis::RedisWorkQueue;
