//! In-memory result store for tests/dev.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use tasker_core::{JobId, Outcome};

use super::r#trait::{ResultStore, ResultStoreError};

/// In-memory result store.
///
/// Holds raw JSON records so tests can plant records of any shape.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    records: RwLock<HashMap<JobId, JsonValue>>,
    unavailable: AtomicBool,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw record as-is, bypassing `Outcome`.
    pub fn put_raw(&self, job_id: JobId, raw: JsonValue) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, raw);
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every operation fail with `ResultStoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), ResultStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ResultStoreError::Unavailable(
                "in-memory result store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn get(&self, job_id: JobId) -> Result<Option<Outcome>, ResultStoreError> {
        self.check_available()?;
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(&job_id).and_then(Outcome::from_raw))
    }

    async fn put(&self, job_id: JobId, outcome: &Outcome) -> Result<(), ResultStoreError> {
        self.check_available()?;
        self.put_raw(job_id, outcome.to_raw());
        Ok(())
    }

    async fn delete(&self, job_id: JobId) -> Result<bool, ResultStoreError> {
        self.check_available()?;
        let removed = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id);
        Ok(removed.is_some())
    }
}
