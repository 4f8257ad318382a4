//! Lifecycle events published to notifiers.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::batch::{Batch, BatchCounters, BatchId};
use crate::status::{BatchStatus, JobStatus};
use crate::video::{BatchVideo, JobId, VideoResult};

/// Batch and job lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    /// Batch accepted and persisted
    BatchCreated {
        user_id: String,
        name: String,
        total: u32,
    },

    /// Batch status moved (queued, processing, paused, resumed, cancelled)
    BatchStatusChanged {
        from: BatchStatus,
        to: BatchStatus,
    },

    /// Counters recomputed after a job transition
    BatchProgress {
        status: BatchStatus,
        counters: BatchCounters,
        progress: f64,
    },

    /// A job reached a terminal status
    JobTerminal {
        job_id: JobId,
        index: usize,
        status: JobStatus,
        attempt_count: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<VideoResult>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A job failed transiently and was queued again
    JobRetryScheduled {
        job_id: JobId,
        attempt_count: u32,
        error: String,
    },

    /// Batch reached its final status and all jobs settled; emitted once
    BatchTerminal {
        status: BatchStatus,
        counters: BatchCounters,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_summary: Option<String>,
    },
}

impl BatchEvent {
    pub fn batch_created(batch: &Batch) -> Self {
        BatchEvent::BatchCreated {
            user_id: batch.user_id.clone(),
            name: batch.name.clone(),
            total: batch.counters.total,
        }
    }

    pub fn batch_progress(batch: &Batch) -> Self {
        BatchEvent::BatchProgress {
            status: batch.status,
            counters: batch.counters,
            progress: batch.progress,
        }
    }

    pub fn job_terminal(video: &BatchVideo) -> Self {
        BatchEvent::JobTerminal {
            job_id: video.id.clone(),
            index: video.index,
            status: video.status,
            attempt_count: video.attempt_count,
            result: video.result.clone(),
            error: video.error_message.clone(),
        }
    }

    pub fn batch_terminal(batch: &Batch) -> Self {
        BatchEvent::BatchTerminal {
            status: batch.status,
            counters: batch.counters,
            error_summary: batch.error_summary.clone(),
        }
    }

    /// Event name as published on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            BatchEvent::BatchCreated { .. } => "batch_created",
            BatchEvent::BatchStatusChanged { .. } => "batch_status_changed",
            BatchEvent::BatchProgress { .. } => "batch_progress",
            BatchEvent::JobTerminal { .. } => "job_terminal",
            BatchEvent::JobRetryScheduled { .. } => "job_retry_scheduled",
            BatchEvent::BatchTerminal { .. } => "batch_terminal",
        }
    }
}

/// Event envelope with per-batch ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BatchNotification {
    pub batch_id: BatchId,
    /// Monotonically increasing per batch
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: BatchEvent,
}

impl BatchNotification {
    pub fn new(batch_id: BatchId, seq: u64, event: BatchEvent) -> Self {
        Self {
            batch_id,
            seq,
            timestamp: Utc::now(),
            event,
        }
    }
}
