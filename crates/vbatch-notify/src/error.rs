//! Notifier error types.

use thiserror::Error;

pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Event buffer full, dropped {0}")]
    BufferFull(String),

    #[error("Publisher stopped")]
    Closed,

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NotifyError {
    pub fn buffer_full(kind: impl Into<String>) -> Self {
        Self::BufferFull(kind.into())
    }

    /// Publishing may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifyError::Redis(e) => {
                e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
            }
            _ => false,
        }
    }
}
