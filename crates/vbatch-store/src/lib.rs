//! Batch persistence.
//!
//! This crate provides:
//! - The [`BatchStore`] contract used by the orchestrator
//! - An in-memory store for single-process deployments and tests
//! - A Redis store (JSON documents plus a per-user index)
//! - Retry with exponential backoff and jitter
//! - Request/retry metrics

pub mod error;
pub mod memory;
pub mod metrics;
pub mod redis_store;
pub mod retry;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryBatchStore;
pub use redis_store::{RedisBatchStore, RedisStoreConfig};
pub use retry::{with_retry, RetryConfig};
pub use store::{build_store, BatchStore, StoreBackend};
