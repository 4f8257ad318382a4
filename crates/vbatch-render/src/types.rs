//! Rendering service request/response types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use vbatch_models::{VideoConfig, VideoResult};

use crate::renderer::RenderContext;

/// Request body for `POST /render`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderRequest {
    pub batch_id: String,
    pub job_id: String,
    pub attempt: u32,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Resolved target duration in seconds
    pub duration_secs: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default)]
    pub custom_settings: BTreeMap<String, serde_json::Value>,
}

impl RenderRequest {
    pub fn new(config: &VideoConfig, ctx: &RenderContext) -> Self {
        let batch = &ctx.batch_config;
        Self {
            batch_id: ctx.batch_id.to_string(),
            job_id: ctx.job_id.to_string(),
            attempt: ctx.attempt,
            topic: config.topic.clone(),
            script: config.script.clone(),
            keywords: config.keywords.clone(),
            duration_secs: config.effective_duration_secs(batch),
            template: batch.template.clone(),
            script_style: batch.script_style.clone(),
            voice: batch.voice.clone(),
            custom_settings: batch.custom_settings.clone(),
        }
    }
}

/// Successful render response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderResponse {
    pub location: String,
    pub duration_secs: f64,
    pub size_bytes: u64,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl From<RenderResponse> for VideoResult {
    fn from(r: RenderResponse) -> Self {
        VideoResult {
            location: r.location,
            duration_secs: r.duration_secs,
            size_bytes: r.size_bytes,
            thumbnail: r.thumbnail,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
