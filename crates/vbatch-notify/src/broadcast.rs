//! In-process event fan-out.

use tokio::sync::broadcast;
use tracing::trace;

use vbatch_models::BatchNotification;

use crate::notifier::Notifier;

/// Publishes events to any number of in-process subscribers.
///
/// Slow subscribers lag and lose the oldest events; the sender never waits.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<BatchNotification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchNotification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, notification: BatchNotification) {
        // No subscribers is not an error.
        if self.tx.send(notification).is_err() {
            trace!("No event subscribers");
        }
    }
}
