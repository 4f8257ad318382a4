//! Batch and per-video generation settings.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::Validate;

/// Upper bound for `max_concurrent`.
pub const MAX_CONCURRENT_LIMIT: u32 = 64;

/// Upper bound for `retry_attempts`.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

fn default_duration_secs() -> u32 {
    60
}

fn default_parallel_processing() -> bool {
    true
}

fn default_max_concurrent() -> u32 {
    3
}

fn default_retry_attempts() -> u32 {
    2
}

/// Settings shared by every video in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct BatchConfig {
    /// Visual template applied to every video
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Script writing style (e.g. "educational", "storytelling")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_style: Option<String>,

    /// Default target duration in seconds
    #[serde(default = "default_duration_secs")]
    #[validate(range(min = 1, max = 3600, message = "duration_secs must be between 1 and 3600"))]
    pub duration_secs: u32,

    /// Narration voice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Target publishing platforms (informational for downstream consumers)
    #[serde(default)]
    pub platforms: Vec<String>,

    /// When false, videos are rendered one at a time regardless of `max_concurrent`
    #[serde(default = "default_parallel_processing")]
    pub parallel_processing: bool,

    /// Maximum videos rendering at once
    #[serde(default = "default_max_concurrent")]
    #[validate(range(min = 1, max = 64, message = "max_concurrent must be between 1 and 64"))]
    pub max_concurrent: u32,

    /// Retries allowed per video after the first attempt
    #[serde(default = "default_retry_attempts")]
    #[validate(range(max = 10, message = "retry_attempts must be at most 10"))]
    pub retry_attempts: u32,

    /// Per-attempt render timeout, overriding the worker default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, message = "job_timeout_secs must be positive"))]
    pub job_timeout_secs: Option<u64>,

    /// Free-form settings forwarded to the renderer
    #[serde(default)]
    pub custom_settings: BTreeMap<String, serde_json::Value>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            template: None,
            script_style: None,
            duration_secs: default_duration_secs(),
            voice: None,
            platforms: Vec::new(),
            parallel_processing: default_parallel_processing(),
            max_concurrent: default_max_concurrent(),
            retry_attempts: default_retry_attempts(),
            job_timeout_secs: None,
            custom_settings: BTreeMap::new(),
        }
    }
}

impl BatchConfig {
    pub fn with_max_concurrent(mut self, max_concurrent: u32) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    /// Concurrency bound actually enforced by the scheduler.
    pub fn effective_max_concurrent(&self) -> usize {
        if self.parallel_processing {
            self.max_concurrent.max(1) as usize
        } else {
            1
        }
    }

    /// Total attempts allowed per video (first attempt plus retries).
    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts + 1
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

/// Settings for a single video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct VideoConfig {
    /// Subject of the video
    #[validate(length(min = 1, max = 500, message = "topic must be 1-500 characters"))]
    pub topic: String,

    /// Pre-written script; generated from the topic when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 20000, message = "script must be at most 20000 characters"))]
    pub script: Option<String>,

    /// Keywords steering script and footage selection
    #[serde(default)]
    #[validate(length(max = 50, message = "at most 50 keywords"))]
    pub keywords: Vec<String>,

    /// Target duration in seconds; the batch default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 3600, message = "target_duration_secs must be between 1 and 3600"))]
    pub target_duration_secs: Option<u32>,
}

impl VideoConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            script: None,
            keywords: Vec::new(),
            target_duration_secs: None,
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    /// Resolve the target duration against the batch default.
    pub fn effective_duration_secs(&self, batch: &BatchConfig) -> u32 {
        self.target_duration_secs.unwrap_or(batch.duration_secs)
    }
}
