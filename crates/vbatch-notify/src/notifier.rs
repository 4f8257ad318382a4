//! The notifier contract and trivial sinks.

use std::sync::Arc;

use vbatch_models::BatchNotification;

/// Sink for batch lifecycle events.
///
/// `notify` is called while the batch aggregate is locked, so
/// implementations must hand the event off without waiting on I/O.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: BatchNotification);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: BatchNotification) {}
}

/// Delivers every event to each inner notifier in order.
#[derive(Default, Clone)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, notification: BatchNotification) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.notify(notification.clone());
            }
            last.notify(notification);
        }
    }
}
