//! Batch records and aggregate counters.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::{BatchConfig, VideoConfig};
use crate::status::{BatchStatus, JobStatus, TransitionError};
use crate::video::{BatchVideo, JobId};

/// Unique identifier for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    /// Generate a new random batch ID.
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

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BatchId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job counts per status bucket.
///
/// `pending` covers both pending and queued jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct BatchCounters {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub in_progress: u32,
    pub pending: u32,
    pub skipped: u32,
    pub cancelled: u32,
}

impl BatchCounters {
    /// Count the videos by status.
    pub fn from_videos(videos: &[BatchVideo]) -> Self {
        let mut counters = Self {
            total: videos.len() as u32,
            ..Default::default()
        };
        for video in videos {
            match video.status {
                JobStatus::Pending | JobStatus::Queued => counters.pending += 1,
                JobStatus::Processing => counters.in_progress += 1,
                JobStatus::Completed => counters.completed += 1,
                JobStatus::Failed => counters.failed += 1,
                JobStatus::Skipped => counters.skipped += 1,
                JobStatus::Cancelled => counters.cancelled += 1,
            }
        }
        counters
    }

    /// Sum of all buckets; equals `total` for a consistent snapshot.
    pub fn accounted(&self) -> u32 {
        self.completed + self.failed + self.in_progress + self.pending + self.skipped + self.cancelled
    }

    pub fn is_consistent(&self) -> bool {
        self.accounted() == self.total
    }

    /// `completed / total`, or 0 for an empty batch.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.completed) / f64::from(self.total)
        }
    }
}

/// A failed video surfaced on the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobErrorEntry {
    pub job_id: JobId,
    pub index: usize,
    pub message: String,
}

/// A batch of videos generated as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Batch {
    /// Unique batch ID
    pub id: BatchId,

    /// User ID (owner)
    pub user_id: String,

    /// Display name
    pub name: String,

    /// Shared generation settings
    pub config: BatchConfig,

    /// Videos in creation order
    pub videos: Vec<BatchVideo>,

    /// Status buckets, recomputed on every job transition
    #[serde(default)]
    pub counters: BatchCounters,

    /// `completed / total`
    #[serde(default)]
    pub progress: f64,

    #[serde(default)]
    pub status: BatchStatus,

    /// Failed videos, populated once the batch settles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub job_errors: Vec<JobErrorEntry>,

    /// Populated only when the batch outcome is `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,

    /// Bumped on every recorded change
    #[serde(default)]
    pub revision: u64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Batch {
    /// Create a pending batch with one pending video per config.
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        config: BatchConfig,
        videos: Vec<VideoConfig>,
    ) -> Self {
        let id = BatchId::new();
        let now = Utc::now();
        let videos: Vec<BatchVideo> = videos
            .into_iter()
            .enumerate()
            .map(|(index, config)| BatchVideo::new(id.clone(), index, config))
            .collect();
        let counters = BatchCounters::from_videos(&videos);

        Self {
            id,
            user_id: user_id.into(),
            name: name.into(),
            config,
            videos,
            counters,
            progress: counters.progress(),
            status: BatchStatus::Pending,
            job_errors: Vec::new(),
            error_summary: None,
            revision: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn total(&self) -> usize {
        self.videos.len()
    }

    pub fn video(&self, job_id: &JobId) -> Option<&BatchVideo> {
        self.videos.iter().find(|v| &v.id == job_id)
    }

    pub fn video_mut(&mut self, job_id: &JobId) -> Option<&mut BatchVideo> {
        self.videos.iter_mut().find(|v| &v.id == job_id)
    }

    /// Recount status buckets and progress, bumping the revision.
    pub fn recompute(&mut self) {
        self.counters = BatchCounters::from_videos(&self.videos);
        self.progress = self.counters.progress();
        self.revision += 1;
        self.updated_at = Utc::now();
    }

    /// Every video has reached a terminal job status.
    pub fn all_jobs_settled(&self) -> bool {
        self.videos.iter().all(BatchVideo::is_terminal)
    }

    /// Outcome for a batch whose videos have all settled.
    ///
    /// `failed` only when every video failed. Anything else, including
    /// failures alongside skipped videos, is a `completed` batch with a
    /// per-video error list.
    pub fn settled_outcome(&self) -> BatchStatus {
        let counters = BatchCounters::from_videos(&self.videos);
        if counters.failed > 0 && counters.failed == counters.total {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        }
    }

    /// Failed videos with their error messages, in creation order.
    pub fn collect_job_errors(&self) -> Vec<JobErrorEntry> {
        self.videos
            .iter()
            .filter(|v| v.status == JobStatus::Failed)
            .map(|v| JobErrorEntry {
                job_id: v.id.clone(),
                index: v.index,
                message: v
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            })
            .collect()
    }

    /// Move the batch status, maintaining timestamps.
    ///
    /// Returns the previous status.
    pub fn transition(&mut self, next: BatchStatus) -> Result<BatchStatus, TransitionError> {
        let previous = self.status;
        self.status = previous.transition(next)?;
        let now = Utc::now();
        if next == BatchStatus::Processing {
            self.started_at.get_or_insert(now);
        }
        self.updated_at = now;
        Ok(previous)
    }

    /// Close out a batch whose videos have all settled.
    ///
    /// A live batch moves to its [`settled_outcome`](Self::settled_outcome);
    /// a cancelled batch keeps its status. Returns false when videos are
    /// still outstanding.
    pub fn settle(&mut self) -> Result<bool, TransitionError> {
        if !self.all_jobs_settled() {
            return Ok(false);
        }
        if !self.status.is_terminal() {
            let outcome = self.settled_outcome();
            self.transition(outcome)?;
        }
        self.job_errors = self.collect_job_errors();
        self.error_summary = (self.status == BatchStatus::Failed).then(|| {
            format!(
                "all {} videos failed; first error: {}",
                self.job_errors.len(),
                self.job_errors
                    .first()
                    .map(|e| e.message.as_str())
                    .unwrap_or("unknown error")
            )
        });
        self.completed_at.get_or_insert_with(Utc::now);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(n: usize) -> Batch {
        let videos = (0..n).map(|i| VideoConfig::new(format!("topic {i}"))).collect();
        Batch::new("user-1", "launch week", BatchConfig::default(), videos)
    }

    fn finish(batch: &mut Batch, index: usize, status: JobStatus) {
        let video = &mut batch.videos[index];
        video.transition(JobStatus::Queued).unwrap();
        if status != JobStatus::Skipped && status != JobStatus::Cancelled {
            video.transition(JobStatus::Processing).unwrap();
        }
        if status == JobStatus::Failed {
            video.error_message = Some(format!("render {index} failed"));
        }
        video.transition(status).unwrap();
    }

    #[test]
    fn test_new_batch_is_consistent() {
        let batch = batch(4);
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.counters.total, 4);
        assert_eq!(batch.counters.pending, 4);
        assert!(batch.counters.is_consistent());
        assert_eq!(batch.progress, 0.0);
        assert!(batch.videos.iter().all(|v| v.batch_id == batch.id));
        assert_eq!(
            batch.videos.iter().map(|v| v.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn test_empty_batch_progress_is_zero() {
        assert_eq!(BatchCounters::default().progress(), 0.0);
    }

    #[test]
    fn test_recompute_tracks_buckets() {
        let mut batch = batch(5);
        finish(&mut batch, 0, JobStatus::Completed);
        finish(&mut batch, 1, JobStatus::Failed);
        finish(&mut batch, 2, JobStatus::Skipped);
        batch.videos[3].transition(JobStatus::Queued).unwrap();
        batch.videos[3].transition(JobStatus::Processing).unwrap();
        batch.recompute();

        let c = batch.counters;
        assert_eq!((c.completed, c.failed, c.skipped, c.in_progress, c.pending), (1, 1, 1, 1, 1));
        assert!(c.is_consistent());
        assert!((batch.progress - 0.2).abs() < f64::EPSILON);
        assert_eq!(batch.revision, 1);
    }

    #[test]
    fn test_outcome_all_succeeded() {
        let mut batch = batch(3);
        batch.transition(BatchStatus::Queued).unwrap();
        batch.transition(BatchStatus::Processing).unwrap();
        for i in 0..3 {
            finish(&mut batch, i, JobStatus::Completed);
        }
        assert!(batch.settle().unwrap());
        assert_eq!(batch.status, BatchStatus::Completed);
        assert!(batch.job_errors.is_empty());
        assert!(batch.error_summary.is_none());
        assert!(batch.completed_at.is_some());
    }

    #[test]
    fn test_outcome_partial_success_is_completed() {
        let mut batch = batch(3);
        batch.transition(BatchStatus::Queued).unwrap();
        batch.transition(BatchStatus::Processing).unwrap();
        finish(&mut batch, 0, JobStatus::Completed);
        finish(&mut batch, 1, JobStatus::Failed);
        finish(&mut batch, 2, JobStatus::Completed);

        assert!(batch.settle().unwrap());
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.job_errors.len(), 1);
        assert_eq!(batch.job_errors[0].index, 1);
        assert!(batch.error_summary.is_none());
    }

    #[test]
    fn test_outcome_all_failed() {
        let mut batch = batch(2);
        batch.transition(BatchStatus::Queued).unwrap();
        batch.transition(BatchStatus::Processing).unwrap();
        finish(&mut batch, 0, JobStatus::Failed);
        finish(&mut batch, 1, JobStatus::Failed);

        assert!(batch.settle().unwrap());
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(batch.job_errors.len(), 2);
        let summary = batch.error_summary.as_deref().unwrap();
        assert!(summary.contains("render 0 failed"));
    }

    #[test]
    fn test_outcome_failed_and_skipped_is_completed() {
        let mut batch = batch(2);
        batch.transition(BatchStatus::Queued).unwrap();
        batch.transition(BatchStatus::Processing).unwrap();
        batch.transition(BatchStatus::Paused).unwrap();
        finish(&mut batch, 0, JobStatus::Failed);
        finish(&mut batch, 1, JobStatus::Skipped);

        assert!(batch.settle().unwrap());
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.job_errors.len(), 1);
        assert!(batch.error_summary.is_none());
    }

    #[test]
    fn test_cancelled_batch_keeps_status_on_settle() {
        let mut batch = batch(2);
        batch.transition(BatchStatus::Queued).unwrap();
        batch.transition(BatchStatus::Cancelled).unwrap();
        finish(&mut batch, 0, JobStatus::Cancelled);
        finish(&mut batch, 1, JobStatus::Cancelled);

        assert!(batch.settle().unwrap());
        assert_eq!(batch.status, BatchStatus::Cancelled);
        assert!(batch.error_summary.is_none());
    }

    #[test]
    fn test_settle_waits_for_outstanding_videos() {
        let mut batch = batch(2);
        batch.transition(BatchStatus::Queued).unwrap();
        batch.transition(BatchStatus::Processing).unwrap();
        finish(&mut batch, 0, JobStatus::Completed);
        assert!(!batch.settle().unwrap());
        assert_eq!(batch.status, BatchStatus::Processing);
    }

    #[test]
    fn test_serializes_status_strings() {
        let batch = batch(1);
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["videos"][0]["status"], "pending");
        let back: Batch = serde_json::from_value(json).unwrap();
        assert_eq!(back, batch);
    }
}
