//! Per-video job records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::batch::BatchId;
use crate::config::VideoConfig;
use crate::status::{JobStatus, TransitionError};

/// Unique identifier for a video job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Finished artifact returned by the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoResult {
    /// Where the rendered video lives (object key or URL)
    pub location: String,
    /// Rendered duration in seconds
    pub duration_secs: f64,
    /// File size in bytes
    pub size_bytes: u64,
    /// Optional thumbnail location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

/// One video inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BatchVideo {
    /// Unique job ID
    pub id: JobId,

    /// Owning batch
    pub batch_id: BatchId,

    /// Creation order within the batch (admission order)
    pub index: usize,

    /// What to render
    pub config: VideoConfig,

    /// Current status
    #[serde(default)]
    pub status: JobStatus,

    /// Render attempts started so far
    #[serde(default)]
    pub attempt_count: u32,

    /// Progress of the current attempt (0.0 - 1.0)
    #[serde(default)]
    pub progress: f64,

    /// Artifact on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<VideoResult>,

    /// Failure reason, or the last retryable error while a retry is pending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchVideo {
    /// Create a pending job for `config` at position `index`.
    pub fn new(batch_id: BatchId, index: usize, config: VideoConfig) -> Self {
        Self {
            id: JobId::new(),
            batch_id,
            index,
            config,
            status: JobStatus::Pending,
            attempt_count: 0,
            progress: 0.0,
            result: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, maintaining attempt count, progress and timestamps.
    ///
    /// Returns the previous status.
    pub fn transition(&mut self, next: JobStatus) -> Result<JobStatus, TransitionError> {
        let previous = self.status;
        self.status = previous.transition(next)?;
        let now = Utc::now();

        match next {
            JobStatus::Processing => {
                self.attempt_count += 1;
                self.progress = 0.0;
                self.started_at.get_or_insert(now);
            }
            JobStatus::Queued => {
                self.progress = 0.0;
            }
            JobStatus::Completed => {
                self.progress = 1.0;
                self.error_message = None;
                self.completed_at = Some(now);
            }
            JobStatus::Failed | JobStatus::Skipped | JobStatus::Cancelled => {
                self.completed_at = Some(now);
            }
            JobStatus::Pending => {}
        }

        Ok(previous)
    }

    /// Record intermediate progress for the running attempt.
    ///
    /// Ignored unless the job is processing. Returns whether it was applied.
    pub fn set_progress(&mut self, progress: f64) -> bool {
        if self.status != JobStatus::Processing || !progress.is_finite() {
            return false;
        }
        self.progress = progress.clamp(0.0, 1.0);
        true
    }
}
