//! The batch store contract.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use vbatch_models::{Batch, BatchId};

use crate::error::StoreResult;
use crate::memory::MemoryBatchStore;
use crate::redis_store::{RedisBatchStore, RedisStoreConfig};

/// Durable record of batches and their videos.
///
/// A batch is stored as one document including its videos, so deleting a
/// batch removes its jobs with it.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Insert a new batch. Fails with `AlreadyExists` for a known ID.
    async fn create(&self, batch: &Batch) -> StoreResult<()>;

    async fn get(&self, id: &BatchId) -> StoreResult<Option<Batch>>;

    /// Replace an existing batch. Fails with `NotFound` for an unknown ID.
    async fn update(&self, batch: &Batch) -> StoreResult<()>;

    /// A user's batches, newest first.
    async fn list(&self, user_id: &str, limit: usize, offset: usize) -> StoreResult<Vec<Batch>>;

    /// Remove a batch and its videos. Fails with `NotFound` for an unknown ID.
    async fn delete(&self, id: &BatchId) -> StoreResult<()>;

    /// Backend label for logs and metrics.
    fn backend(&self) -> &'static str;
}

/// Which store implementation to run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis,
}

impl StoreBackend {
    /// Read `STORE_BACKEND` (`memory` or `redis`, default `memory`).
    pub fn from_env() -> Self {
        match std::env::var("STORE_BACKEND")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "redis" => StoreBackend::Redis,
            _ => StoreBackend::Memory,
        }
    }
}

/// Build the store selected by the environment.
pub fn build_store(backend: StoreBackend) -> StoreResult<Arc<dyn BatchStore>> {
    let store: Arc<dyn BatchStore> = match backend {
        StoreBackend::Memory => Arc::new(MemoryBatchStore::new()),
        StoreBackend::Redis => Arc::new(RedisBatchStore::new(RedisStoreConfig::from_env())?),
    };
    info!(backend = store.backend(), "Batch store ready");
    Ok(store)
}
