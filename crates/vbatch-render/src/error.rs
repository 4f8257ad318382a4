//! Renderer error types.

use thiserror::Error;

pub type RenderResult<T> = Result<T, RenderError>;

/// Whether retrying a failed render can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Timeouts, overload, unavailable service
    Transient,
    /// Bad input or a rejected request; retrying won't help
    Permanent,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Render timed out after {0} seconds")]
    Timeout(u64),

    #[error("Renderer overloaded: {0}")]
    Overloaded(String),

    #[error("Renderer unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid video config: {0}")]
    InvalidConfig(String),

    #[error("Render rejected: {0}")]
    Rejected(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Render cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl RenderError {
    pub fn overloaded(msg: impl Into<String>) -> Self {
        Self::Overloaded(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Classify by kind. Cancellation is never retried.
    pub fn class(&self) -> ErrorClass {
        match self {
            RenderError::Timeout(_)
            | RenderError::Overloaded(_)
            | RenderError::Unavailable(_)
            | RenderError::Network(_) => ErrorClass::Transient,
            RenderError::InvalidConfig(_)
            | RenderError::Rejected(_)
            | RenderError::InvalidResponse(_)
            | RenderError::Cancelled => ErrorClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RenderError::Timeout(_) => "timeout",
            RenderError::Overloaded(_) => "overloaded",
            RenderError::Unavailable(_) => "unavailable",
            RenderError::InvalidConfig(_) => "invalid_config",
            RenderError::Rejected(_) => "rejected",
            RenderError::InvalidResponse(_) => "invalid_response",
            RenderError::Cancelled => "cancelled",
            RenderError::Network(_) => "network",
        }
    }
}
