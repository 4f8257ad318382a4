//! Rendering service HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use vbatch_models::{VideoConfig, VideoResult};

use crate::error::{RenderError, RenderResult};
use crate::renderer::{RenderContext, Renderer};
use crate::types::{HealthResponse, RenderRequest, RenderResponse};

/// Configuration for the HTTP renderer.
#[derive(Debug, Clone)]
pub struct HttpRendererConfig {
    /// Base URL of the rendering service
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for HttpRendererConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002".to_string(),
            timeout: Duration::from_secs(900), // 15 minutes per render
        }
    }
}

impl HttpRendererConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("RENDERER_URL")
                .unwrap_or_else(|_| "http://localhost:8002".to_string()),
            timeout: Duration::from_secs(
                std::env::var("RENDERER_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(900),
            ),
        }
    }
}

/// Renderer backed by the rendering service's HTTP API.
///
/// Retries are left to the orchestrator; every call is a single attempt.
pub struct HttpRenderer {
    http: Client,
    config: HttpRendererConfig,
}

impl HttpRenderer {
    /// Create a new HTTP renderer.
    pub fn new(config: HttpRendererConfig) -> RenderResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(RenderError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> RenderResult<Self> {
        Self::new(HttpRendererConfig::from_env())
    }

    /// Check if the rendering service is healthy.
    pub async fn health_check(&self) -> RenderResult<bool> {
        let url = format!("{}/health", self.config.base_url);

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("Renderer health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Renderer health check error: {}", e);
                Ok(false)
            }
        }
    }

    async fn send(&self, request: &RenderRequest) -> RenderResult<VideoResult> {
        let url = format!("{}/render", self.config.base_url);
        debug!(job_id = %request.job_id, attempt = request.attempt, "Sending render request to {}", url);

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, body));
        }

        let body: RenderResponse = response
            .json()
            .await
            .map_err(|e| RenderError::InvalidResponse(e.to_string()))?;
        Ok(body.into())
    }

    fn map_transport_error(&self, e: reqwest::Error) -> RenderError {
        if e.is_timeout() {
            RenderError::Timeout(self.config.timeout.as_secs())
        } else if e.is_connect() {
            RenderError::unavailable(e.to_string())
        } else {
            RenderError::Network(e)
        }
    }
}

/// Map a non-success HTTP status onto an error kind.
fn map_status(status: StatusCode, body: String) -> RenderError {
    let msg = format!("renderer returned {}: {}", status, body);
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => RenderError::Overloaded(msg),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => RenderError::InvalidConfig(msg),
        s if s.is_server_error() => RenderError::Unavailable(msg),
        _ => RenderError::Rejected(msg),
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn generate(&self, config: &VideoConfig, ctx: &RenderContext) -> RenderResult<VideoResult> {
        if ctx.is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        let request = RenderRequest::new(config, ctx);
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(RenderError::Cancelled),
            result = self.send(&request) => result,
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
