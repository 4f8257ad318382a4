//! Batch lifecycle event sinks.
//!
//! This crate provides:
//! - The [`Notifier`] contract: synchronous, never blocks the caller
//! - In-process fan-out over a tokio broadcast channel
//! - Redis Pub/Sub publishing through a bounded buffer and a publisher task

pub mod broadcast;
pub mod error;
pub mod notifier;
pub mod redis_pubsub;

pub use broadcast::BroadcastNotifier;
pub use error::{NotifyError, NotifyResult};
pub use notifier::{FanoutNotifier, Notifier, NoopNotifier};
pub use redis_pubsub::{RedisNotifier, RedisNotifierConfig};
