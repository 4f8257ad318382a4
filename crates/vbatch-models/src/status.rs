//! Batch and job status machines.
//!
//! Both machines are closed enums with an exhaustive transition table.
//! Moves outside the table are programming errors and surface as
//! [`TransitionError`] instead of being silently ignored.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A status move that the transition table does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {machine} transition: {from} -> {to}")]
pub struct TransitionError {
    pub machine: &'static str,
    pub from: &'static str,
    pub to: &'static str,
}

/// Batch lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Created, not yet handed to the scheduler
    #[default]
    Pending,
    /// Handed to the scheduler, nothing admitted yet
    Queued,
    /// At least one job has been admitted
    Processing,
    /// Admission suspended, in-flight jobs keep running
    Paused,
    /// All jobs settled with at least one success (or no failures)
    Completed,
    /// All jobs settled and none succeeded
    Failed,
    /// Cancelled by the owner
    Cancelled,
}

impl BatchStatus {
    pub const ALL: [BatchStatus; 7] = [
        BatchStatus::Pending,
        BatchStatus::Queued,
        BatchStatus::Processing,
        BatchStatus::Paused,
        BatchStatus::Completed,
        BatchStatus::Failed,
        BatchStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Queued => "queued",
            BatchStatus::Processing => "processing",
            BatchStatus::Paused => "paused",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }

    /// Whether `Cancel` is accepted from this status.
    pub fn is_cancellable(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        match self {
            Pending => matches!(next, Queued | Cancelled),
            Queued => matches!(next, Processing | Cancelled),
            Processing => matches!(next, Paused | Completed | Failed | Cancelled),
            Paused => matches!(next, Processing | Completed | Failed | Cancelled),
            Completed | Failed | Cancelled => false,
        }
    }

    /// Validate a move against the table and return the new status.
    pub fn transition(self, next: BatchStatus) -> Result<BatchStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                machine: "batch",
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BatchStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown batch status: {s}"))
    }
}

/// Per-video job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created with the batch
    #[default]
    Pending,
    /// Waiting for admission (initially or after a retryable failure)
    Queued,
    /// A render attempt is running
    Processing,
    /// Render succeeded
    Completed,
    /// Render failed permanently or retries were exhausted
    Failed,
    /// Withdrawn while the batch was paused, never started
    Skipped,
    /// Batch was cancelled
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Skipped,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match self {
            Pending => matches!(next, Queued | Skipped | Cancelled),
            Queued => matches!(next, Processing | Skipped | Cancelled),
            // Processing -> Queued is the retry path.
            Processing => matches!(next, Completed | Failed | Cancelled | Queued),
            Completed | Failed | Skipped | Cancelled => false,
        }
    }

    pub fn transition(self, next: JobStatus) -> Result<JobStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                machine: "job",
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status: {s}"))
    }
}
