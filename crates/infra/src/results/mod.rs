//! Result store boundary.
//!
//! Workers write one outcome record per finished job, keyed by job id; the
//! scheduler reads it back when resolving a one-shot submission.

pub mod in_memory;
pub mod r#trait;

#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryResultStore;
pub use r#trait::{ResultStore, ResultStoreError};

#[cfg(feature = "redis")]
pub use redis::RedisResultStore;
