//! Batch submission payload and validation.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use crate::config::{BatchConfig, VideoConfig};

/// Maximum videos accepted in a single batch.
pub const MAX_VIDEOS_PER_BATCH: usize = 500;

/// A rejected submission. Nothing is created when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("batch must contain at least one video")]
    EmptyBatch,

    #[error("batch contains {count} videos, the limit is {limit}")]
    TooManyVideos { count: usize, limit: usize },

    #[error("invalid batch config: {0}")]
    InvalidBatchConfig(String),

    #[error("invalid video config at index {index}: {message}")]
    InvalidVideoConfig { index: usize, message: String },

    #[error("invalid submission: {0}")]
    Malformed(String),
}

/// Request to generate a batch of videos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BatchSubmission {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub config: BatchConfig,
    pub videos: Vec<VideoConfig>,
}

impl BatchSubmission {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        config: BatchConfig,
        videos: Vec<VideoConfig>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            config,
            videos,
        }
    }

    /// Parse a submission payload.
    ///
    /// Decoding failures (missing fields, negative counts, wrong types) are
    /// reported as [`ValidationError::Malformed`].
    pub fn from_json(payload: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(payload).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Check everything that must hold before any job is created.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::Malformed("user_id is required".to_string()));
        }
        validate_batch(&self.config, &self.videos)
    }
}

/// Validate a batch config together with its video list.
pub fn validate_batch(config: &BatchConfig, videos: &[VideoConfig]) -> Result<(), ValidationError> {
    if videos.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    if videos.len() > MAX_VIDEOS_PER_BATCH {
        return Err(ValidationError::TooManyVideos {
            count: videos.len(),
            limit: MAX_VIDEOS_PER_BATCH,
        });
    }

    config
        .validate()
        .map_err(|e| ValidationError::InvalidBatchConfig(e.to_string()))?;

    for (index, video) in videos.iter().enumerate() {
        video
            .validate()
            .map_err(|e| ValidationError::InvalidVideoConfig {
                index,
                message: e.to_string(),
            })?;
    }

    Ok(())
}
