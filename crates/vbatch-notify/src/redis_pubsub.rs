//! Lifecycle events via Redis Pub/Sub.
//!
//! `notify` only enqueues into a bounded buffer; a background task drains
//! the buffer and publishes each event to `vbatch:events:{batch_id}`. When
//! the buffer is full the event is dropped and counted.

use std::pin::Pin;

use metrics::counter;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use vbatch_models::{BatchId, BatchNotification};

use crate::error::{NotifyError, NotifyResult};
use crate::notifier::Notifier;

/// Counter of events dropped because the publisher fell behind.
pub const DROPPED_TOTAL: &str = "vbatch_notifications_dropped_total";

/// Redis notifier configuration.
#[derive(Debug, Clone)]
pub struct RedisNotifierConfig {
    pub redis_url: String,
    /// Events buffered ahead of the publisher
    pub buffer: usize,
}

impl Default for RedisNotifierConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            buffer: 1024,
        }
    }
}

impl RedisNotifierConfig {
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            buffer: std::env::var("WORKER_NOTIFY_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024),
        }
    }
}

/// Publishes batch events to Redis without blocking the caller.
pub struct RedisNotifier {
    client: redis::Client,
    tx: mpsc::Sender<BatchNotification>,
    publisher: JoinHandle<()>,
}

impl RedisNotifier {
    /// Open the client and start the publisher task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: RedisNotifierConfig) -> NotifyResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let (tx, rx) = mpsc::channel(config.buffer.max(1));
        let publisher = tokio::spawn(run_publisher(client.clone(), rx));
        Ok(Self {
            client,
            tx,
            publisher,
        })
    }

    /// Get the channel name for a batch.
    pub fn channel_name(batch_id: &BatchId) -> String {
        format!("vbatch:events:{}", batch_id)
    }

    /// Try to enqueue an event for publishing.
    pub fn try_notify(&self, notification: BatchNotification) -> NotifyResult<()> {
        self.tx.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(n) => NotifyError::buffer_full(n.event.kind()),
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
        })
    }

    /// Stop accepting events and wait for the buffer to drain.
    pub async fn shutdown(self) {
        let Self { tx, publisher, .. } = self;
        drop(tx);
        if let Err(e) = publisher.await {
            warn!("Event publisher task failed: {}", e);
        }
    }

    /// Subscribe to events for a batch.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        batch_id: &BatchId,
    ) -> NotifyResult<Pin<Box<dyn futures_util::Stream<Item = BatchNotification> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(Self::channel_name(batch_id)).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

impl Notifier for RedisNotifier {
    fn notify(&self, notification: BatchNotification) {
        let batch_id = notification.batch_id.clone();
        let seq = notification.seq;
        if let Err(e) = self.try_notify(notification) {
            counter!(DROPPED_TOTAL).increment(1);
            warn!(batch_id = %batch_id, seq, "Dropping batch event: {}", e);
        }
    }
}

async fn run_publisher(client: redis::Client, mut rx: mpsc::Receiver<BatchNotification>) {
    let mut conn = None;
    while let Some(notification) = rx.recv().await {
        if let Err(e) = publish(&client, &mut conn, &notification).await {
            warn!(
                batch_id = %notification.batch_id,
                seq = notification.seq,
                "Failed to publish batch event: {}",
                e
            );
            // Reconnect on the next event.
            conn = None;
        }
    }
    debug!("Event publisher stopped");
}

async fn publish(
    client: &redis::Client,
    conn: &mut Option<redis::aio::MultiplexedConnection>,
    notification: &BatchNotification,
) -> NotifyResult<()> {
    let payload = serde_json::to_string(notification)?;
    if conn.is_none() {
        *conn = Some(client.get_multiplexed_async_connection().await?);
    }
    let Some(conn) = conn.as_mut() else {
        return Err(NotifyError::Closed);
    };

    let channel = RedisNotifier::channel_name(&notification.batch_id);
    debug!("Publishing {} to {}", notification.event.kind(), channel);
    conn.publish::<_, _, ()>(channel, payload).await?;
    Ok(())
}
