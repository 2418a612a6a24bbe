//! Redis-backed result store.
//!
//! Outcomes live under `{prefix}:result:{job_id}` as JSON strings, optionally
//! with an expiry so unread results do not accumulate.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::instrument;

use tasker_core::{JobId, Outcome};

use crate::config::RedisConfig;

use super::r#trait::{ResultStore, ResultStoreError};

pub struct RedisResultStore {
    conn: MultiplexedConnection,
    prefix: String,
    ttl: Option<Duration>,
}

impl RedisResultStore {
    pub async fn connect(config: &RedisConfig) -> Result<Self, ResultStoreError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| ResultStoreError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ResultStoreError::Connection(e.to_string()))?;

        Ok(Self {
            conn,
            prefix: config.key_prefix.clone(),
            ttl: config.result_ttl,
        })
    }

    fn key(&self, job_id: JobId) -> String {
        format!("{}:result:{}", self.prefix, job_id)
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    #[instrument(skip(self), err)]
    async fn get(&self, job_id: JobId) -> Result<Option<Outcome>, ResultStoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.key(job_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| ResultStoreError::Command(format!("GET failed: {}", e)))?;

        match raw {
            Some(raw) => Outcome::from_json(&raw)
                .map_err(|e| ResultStoreError::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, outcome), err)]
    async fn put(&self, job_id: JobId, outcome: &Outcome) -> Result<(), ResultStoreError> {
        let payload = serde_json::to_string(&outcome.to_raw())
            .map_err(|e| ResultStoreError::Serialization(e.to_string()))?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(job_id)).arg(&payload);
        if let Some(ttl) = self.ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }

        let mut conn = self.conn.clone();
        let _: () = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| ResultStoreError::Command(format!("SET failed: {}", e)))?;
        Ok(())
    }

    async fn delete(&self, job_id: JobId) -> Result<bool, ResultStoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(self.key(job_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| ResultStoreError::Command(format!("DEL failed: {}", e)))?;
        Ok(removed > 0)
    }
}
