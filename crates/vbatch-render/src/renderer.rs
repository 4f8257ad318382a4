//! The renderer seam driven by the orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use vbatch_models::{BatchConfig, BatchId, JobId, VideoConfig, VideoResult};

use crate::error::RenderResult;

/// Receives intermediate progress (0.0 - 1.0) for a running attempt.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: f64);
}

/// Discards progress reports.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _progress: f64) {}
}

/// Everything a renderer knows about the attempt besides the video config.
#[derive(Clone)]
pub struct RenderContext {
    pub batch_id: BatchId,
    pub job_id: JobId,
    /// 1-based attempt number
    pub attempt: u32,
    /// Shared batch settings (template, voice, custom settings)
    pub batch_config: Arc<BatchConfig>,
    /// Tripped when the batch is cancelled. Renderers that can stop early
    /// should watch it; the orchestrator never aborts a render in flight.
    pub cancel: CancellationToken,
    pub progress: Arc<dyn ProgressSink>,
}

impl RenderContext {
    pub fn new(batch_id: BatchId, job_id: JobId, attempt: u32, batch_config: Arc<BatchConfig>) -> Self {
        Self {
            batch_id,
            job_id,
            attempt,
            batch_config,
            cancel: CancellationToken::new(),
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn report_progress(&self, progress: f64) {
        self.progress.report(progress);
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("batch_id", &self.batch_id)
            .field("job_id", &self.job_id)
            .field("attempt", &self.attempt)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Turns one video config into a finished artifact.
///
/// Implementations may take minutes; errors must be classifiable through
/// [`RenderError::class`](crate::RenderError::class).
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn generate(&self, config: &VideoConfig, ctx: &RenderContext) -> RenderResult<VideoResult>;

    /// Name used in logs and metrics.
    fn name(&self) -> &str {
        "renderer"
    }
}
