//! In-memory batch store.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;

use vbatch_models::{Batch, BatchId};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_request;
use crate::store::BatchStore;

const BACKEND: &str = "memory";

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryBatchStore {
    batches: RwLock<HashMap<BatchId, Batch>>,
}

impl MemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.batches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.read().is_empty()
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
impl BatchStore for MemoryBatchStore {
    async fn create(&self, batch: &Batch) -> StoreResult<()> {
        let started = Instant::now();
        let result = {
            let mut batches = self.batches.write();
            if batches.contains_key(&batch.id) {
                Err(StoreError::already_exists(batch.id.as_str()))
            } else {
                batches.insert(batch.id.clone(), batch.clone());
                Ok(())
            }
        };
        observe("create", started, result)
    }

    async fn get(&self, id: &BatchId) -> StoreResult<Option<Batch>> {
        let started = Instant::now();
        let batch = self.batches.read().get(id).cloned();
        observe("get", started, Ok(batch))
    }

    async fn update(&self, batch: &Batch) -> StoreResult<()> {
        let started = Instant::now();
        let result = match self.batches.write().get_mut(&batch.id) {
            Some(existing) => {
                *existing = batch.clone();
                Ok(())
            }
            None => Err(StoreError::not_found(batch.id.as_str())),
        };
        observe("update", started, result)
    }

    async fn list(&self, user_id: &str, limit: usize, offset: usize) -> StoreResult<Vec<Batch>> {
        let started = Instant::now();
        let mut owned: Vec<Batch> = self
            .batches
            .read()
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        let page = owned.into_iter().skip(offset).take(limit).collect();
        observe("list", started, Ok(page))
    }

    async fn delete(&self, id: &BatchId) -> StoreResult<()> {
        let started = Instant::now();
        let result = match self.batches.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found(id.as_str())),
        };
        observe("delete", started, result)
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vbatch_models::{BatchConfig, VideoConfig};

    fn batch(user: &str, minutes_ago: i64) -> Batch {
        let mut batch = Batch::new(
            user,
            format!("batch {minutes_ago}"),
            BatchConfig::default(),
            vec![VideoConfig::new("topic")],
        );
        batch.created_at -= Duration::minutes(minutes_ago);
        batch
    }

    #[tokio::test]
    async fn test_create_get_update_delete() {
        let store = MemoryBatchStore::new();
        let mut b = batch("u1", 0);

        store.create(&b).await.unwrap();
        assert!(matches!(store.create(&b).await, Err(StoreError::AlreadyExists(_))));

        b.name = "renamed".into();
        store.update(&b).await.unwrap();
        assert_eq!(store.get(&b.id).await.unwrap().unwrap().name, "renamed");

        store.delete(&b.id).await.unwrap();
        assert!(store.get(&b.id).await.unwrap().is_none());
        assert!(store.delete(&b.id).await.unwrap_err().is_not_found());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_batch() {
        let store = MemoryBatchStore::new();
        let err = store.update(&batch("u1", 0)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_is_per_user_newest_first_and_paged() {
        let store = MemoryBatchStore::new();
        for minutes in [30, 10, 20] {
            store.create(&batch("u1", minutes)).await.unwrap();
        }
        store.create(&batch("u2", 5)).await.unwrap();

        let names: Vec<String> = store
            .list("u1", 10, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["batch 10", "batch 20", "batch 30"]);

        let page = store.list("u1", 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "batch 20");

        assert!(store.list("u1", 10, 5).await.unwrap().is_empty());
        assert_eq!(store.len(), 4);
    }
}
