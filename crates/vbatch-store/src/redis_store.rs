//! Redis-backed batch store.
//!
//! Layout:
//! - `{prefix}:batch:{id}` holds the batch (with its videos) as JSON
//! - `{prefix}:user:{user_id}:batches` is a sorted set of batch IDs scored
//!   by creation time in milliseconds

use std::time::Instant;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use vbatch_models::{Batch, BatchId};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_request;
use crate::store::BatchStore;

const BACKEND: &str = "redis";

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    pub redis_url: String,
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vbatch".to_string(),
        }
    }
}

impl RedisStoreConfig {
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("STORE_KEY_PREFIX").unwrap_or_else(|_| "vbatch".to_string()),
        }
    }
}

/// Batch store on top of Redis strings and sorted sets.
pub struct RedisBatchStore {
    client: redis::Client,
    config: RedisStoreConfig,
}

impl RedisBatchStore {
    /// Create a store. Does not connect until the first request.
    pub fn new(config: RedisStoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    pub fn batch_key(&self, id: &BatchId) -> String {
        format!("{}:batch:{}", self.config.key_prefix, id)
    }

    pub fn user_index_key(&self, user_id: &str) -> String {
        format!("{}:user:{}:batches", self.config.key_prefix, user_id)
    }

    async fn connection(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn create_inner(&self, batch: &Batch) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(batch)?;

        let created: Option<String> = redis::cmd("SET")
            .arg(self.batch_key(&batch.id))
            .arg(&payload)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        if created.is_none() {
            return Err(StoreError::already_exists(batch.id.as_str()));
        }

        let _: () = conn
            .zadd(
                self.user_index_key(&batch.user_id),
                batch.id.as_str(),
                batch.created_at.timestamp_millis(),
            )
            .await?;

        debug!(batch_id = %batch.id, "Created batch record");
        Ok(())
    }

    async fn get_inner(&self, id: &BatchId) -> StoreResult<Option<Batch>> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn.get(self.batch_key(id)).await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn update_inner(&self, batch: &Batch) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(batch)?;

        let updated: Option<String> = redis::cmd("SET")
            .arg(self.batch_key(&batch.id))
            .arg(&payload)
            .arg("XX")
            .query_async(&mut conn)
            .await?;
        match updated {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found(batch.id.as_str())),
        }
    }

    async fn list_inner(&self, user_id: &str, limit: usize, offset: usize) -> StoreResult<Vec<Batch>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;

        let stop = offset.saturating_add(limit) - 1;
        let ids: Vec<String> = conn
            .zrevrange(self.user_index_key(user_id), offset as isize, stop as isize)
            .await?;

        let mut batches = Vec::with_capacity(ids.len());
        for id in ids {
            let payload: Option<String> = conn.get(self.batch_key(&BatchId::from_string(id))).await?;
            // Index entries can outlive a record removed out of band.
            if let Some(json) = payload {
                batches.push(serde_json::from_str(&json)?);
            }
        }
        Ok(batches)
    }

    async fn delete_inner(&self, id: &BatchId) -> StoreResult<()> {
        let batch = self
            .get_inner(id)
            .await?
            .ok_or_else(|| StoreError::not_found(id.as_str()))?;

        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .del(self.batch_key(id))
            .ignore()
            .zrem(self.user_index_key(&batch.user_id), id.as_str())
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(batch_id = %id, "Deleted batch record");
        Ok(())
    }
}

fn observe<T>(operation: &'static str, started: Instant, result: StoreResult<T>) -> StoreResult<T> {
    record_request(
        BACKEND,
        operation,
        result.is_ok(),
        started.elapsed().as_secs_f64() * 1000.0,
    );
    result
}

#[async_trait]
impl BatchStore for RedisBatchStore {
    async fn create(&self, batch: &Batch) -> StoreResult<()> {
        let started = Instant::now();
        observe("create", started, self.create_inner(batch).await)
    }

    async fn get(&self, id: &BatchId) -> StoreResult<Option<Batch>> {
        let started = Instant::now();
        observe("get", started, self.get_inner(id).await)
    }

    async fn update(&self, batch: &Batch) -> StoreResult<()> {
        let started = Instant::now();
        observe("update", started, self.update_inner(batch).await)
    }

    async fn list(&self, user_id: &str, limit: usize, offset: usize) -> StoreResult<Vec<Batch>> {
        let started = Instant::now();
        observe("list", started, self.list_inner(user_id, limit, offset).await)
    }

    async fn delete(&self, id: &BatchId) -> StoreResult<()> {
        let started = Instant::now();
        observe("delete", started, self.delete_inner(id).await)
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }
}
