//! Orchestrator error types.

use thiserror::Error;

use vbatch_models::{BatchStatus, TransitionError, ValidationError};
use vbatch_render::{ErrorClass, RenderError};
use vbatch_store::StoreError;

pub type BatchResult<T> = Result<T, BatchError>;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transient job failure: {0}")]
    TransientJob(String),

    #[error("Permanent job failure: {0}")]
    PermanentJob(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Revision {revision} was not persisted: {reason}")]
    NotPersisted { revision: u64, reason: String },

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("{operation} is not allowed while batch is {status}")]
    InvalidState {
        operation: &'static str,
        status: BatchStatus,
    },

    #[error("Invalid job state: {0}")]
    InvalidJobState(String),
}

impl BatchError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_state(operation: &'static str, status: BatchStatus) -> Self {
        Self::InvalidState { operation, status }
    }

    pub fn invalid_job_state(msg: impl Into<String>) -> Self {
        Self::InvalidJobState(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            BatchError::TransientJob(_) => true,
            BatchError::Persistence(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            BatchError::NotFound(_) => true,
            BatchError::Persistence(e) => e.is_not_found(),
            _ => false,
        }
    }
}

impl From<RenderError> for BatchError {
    fn from(e: RenderError) -> Self {
        match (&e, e.class()) {
            (RenderError::Cancelled, _) => BatchError::Cancelled,
            (_, ErrorClass::Transient) => BatchError::TransientJob(e.to_string()),
            (_, ErrorClass::Permanent) => BatchError::PermanentJob(e.to_string()),
        }
    }
}
