//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for render attempts with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use vbatch_models::{BatchId, JobId};

/// Job logger for structured logging with consistent formatting.
///
/// Every line carries the batch ID, job ID and attempt number.
#[derive(Debug, Clone)]
pub struct JobLogger {
    batch_id: String,
    job_id: String,
    attempt: u32,
}

impl JobLogger {
    pub fn new(batch_id: &BatchId, job_id: &JobId, attempt: u32) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            job_id: job_id.to_string(),
            attempt,
        }
    }

    /// Log the start of a render attempt.
    pub fn log_start(&self, message: &str) {
        info!(
            batch_id = %self.batch_id,
            job_id = %self.job_id,
            attempt = self.attempt,
            "Job started: {}", message
        );
    }

    /// Log a failed attempt that will be retried.
    pub fn log_retry(&self, message: &str) {
        warn!(
            batch_id = %self.batch_id,
            job_id = %self.job_id,
            attempt = self.attempt,
            "Job retry scheduled: {}", message
        );
    }

    /// Log a warning during job execution.
    pub fn log_warning(&self, message: &str) {
        warn!(
            batch_id = %self.batch_id,
            job_id = %self.job_id,
            attempt = self.attempt,
            "Job warning: {}", message
        );
    }

    /// Log a failure that ends the job.
    pub fn log_error(&self, message: &str) {
        error!(
            batch_id = %self.batch_id,
            job_id = %self.job_id,
            attempt = self.attempt,
            "Job error: {}", message
        );
    }

    /// Log the completion of a job.
    pub fn log_completion(&self, message: &str) {
        info!(
            batch_id = %self.batch_id,
            job_id = %self.job_id,
            attempt = self.attempt,
            "Job completed: {}", message
        );
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Create a tracing span for this attempt.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            batch_id = %self.batch_id,
            job_id = %self.job_id,
            attempt = self.attempt
        )
    }
}
