//! Job executor.
//!
//! Runs one admitted attempt through the renderer under the per-job
//! timeout, classifies the outcome with the retry policy and reports the
//! resulting transition to the aggregator exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use vbatch_models::{JobStatus, VideoConfig, VideoResult};
use vbatch_render::{ErrorClass, ProgressSink, RenderContext, RenderError, Renderer};

use crate::aggregator::{AdmittedJob, Aggregator, Applied, JobTransition};
use crate::error::BatchError;
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{RetryDecision, RetryPolicy};

/// What the scheduler should do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The job reached a terminal status.
    Settled(JobStatus),
    /// The job is queued again; admit it after `delay`.
    Retry { index: usize, delay: Duration },
    /// The report was a duplicate, stale or rejected.
    Ignored,
}

/// Forwards renderer progress to the aggregator for one attempt.
struct AttemptProgress {
    aggregator: Arc<Aggregator>,
    index: usize,
    attempt: u32,
}

impl ProgressSink for AttemptProgress {
    fn report(&self, progress: f64) {
        self.aggregator
            .report_progress(self.index, self.attempt, progress);
    }
}

/// Executes render attempts.
pub struct JobExecutor {
    renderer: Arc<dyn Renderer>,
    policy: RetryPolicy,
    default_timeout: Duration,
}

impl JobExecutor {
    pub fn new(renderer: Arc<dyn Renderer>, policy: RetryPolicy, default_timeout: Duration) -> Self {
        Self {
            renderer,
            policy,
            default_timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one attempt of an admitted job.
    pub async fn execute(
        &self,
        aggregator: Arc<Aggregator>,
        job: AdmittedJob,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        let logger = JobLogger::new(aggregator.batch_id(), &job.job_id, job.attempt);
        let span = logger.create_span();
        self.run_attempt(aggregator, job, cancel, logger)
            .instrument(span)
            .await
    }

    async fn run_attempt(
        &self,
        aggregator: Arc<Aggregator>,
        job: AdmittedJob,
        cancel: CancellationToken,
        logger: JobLogger,
    ) -> ExecutionOutcome {
        let batch_config = aggregator.batch_config();
        let max_attempts = batch_config.max_attempts();
        let timeout = batch_config.job_timeout().unwrap_or(self.default_timeout);

        if cancel.is_cancelled() {
            logger.log_warning("batch cancelled before render started");
            return report(
                &aggregator,
                JobTransition::cancelled(job.index, job.attempt),
                None,
                &logger,
            );
        }

        logger.log_start(&format!("rendering '{}' via {}", job.config.topic, self.renderer.name()));
        let ctx = RenderContext::new(
            aggregator.batch_id().clone(),
            job.job_id.clone(),
            job.attempt,
            batch_config,
        )
        .with_cancel(cancel)
        .with_progress(Arc::new(AttemptProgress {
            aggregator: Arc::clone(&aggregator),
            index: job.index,
            attempt: job.attempt,
        }));

        let started = Instant::now();
        let result = self.render(&job.config, ctx, timeout).await;
        let elapsed = started.elapsed().as_secs_f64();

        let (transition, retry_delay) = match result {
            Ok(video) => {
                metrics::record_render("ok", elapsed);
                logger.log_completion(&format!("{} ({} bytes)", video.location, video.size_bytes));
                (JobTransition::completed(job.index, job.attempt, video), None)
            }
            Err(e) => {
                let class = e.class();
                metrics::record_render(class.as_str(), elapsed);
                let message = e.to_string();
                match self.policy.decide(job.attempt, max_attempts, class) {
                    RetryDecision::Retry { delay } => {
                        logger.log_retry(&format!("{} (next attempt in {:?})", message, delay));
                        (JobTransition::retry(job.index, job.attempt, message), Some(delay))
                    }
                    RetryDecision::Fail => {
                        let err = BatchError::from(e);
                        if class == ErrorClass::Transient {
                            logger.log_error(&format!("{} after {} attempts", err, job.attempt));
                        } else {
                            logger.log_error(&err.to_string());
                        }
                        (JobTransition::failed(job.index, job.attempt, message), None)
                    }
                }
            }
        };

        report(&aggregator, transition, retry_delay, &logger)
    }

    async fn render(
        &self,
        config: &VideoConfig,
        ctx: RenderContext,
        timeout: Duration,
    ) -> Result<VideoResult, RenderError> {
        let renderer = Arc::clone(&self.renderer);
        let config = config.clone();
        // Run on its own task so a panicking renderer fails the attempt
        // instead of the executor.
        let mut handle = tokio::spawn(async move { renderer.generate(&config, &ctx).await });

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(RenderError::rejected(format!(
                "renderer task failed: {join_error}"
            ))),
            Err(_) => {
                handle.abort();
                Err(RenderError::Timeout(timeout.as_secs()))
            }
        }
    }

    /// Delay actually slept before re-admitting a retried job.
    pub fn backoff_sleep(&self, delay: Duration) -> Duration {
        self.policy.jittered(delay)
    }
}

fn report(
    aggregator: &Aggregator,
    transition: JobTransition,
    retry_delay: Option<Duration>,
    logger: &JobLogger,
) -> ExecutionOutcome {
    let JobTransition {
        index, to, attempt, ..
    } = transition;
    match aggregator.apply(transition) {
        Ok(Applied::Recorded(JobStatus::Queued)) => ExecutionOutcome::Retry {
            index,
            delay: retry_delay.unwrap_or_default(),
        },
        Ok(Applied::Recorded(status)) => {
            if status == JobStatus::Cancelled {
                logger.log_warning("recorded as cancelled");
            }
            ExecutionOutcome::Settled(status)
        }
        Ok(Applied::Duplicate) | Ok(Applied::Stale) => ExecutionOutcome::Ignored,
        // A job must not stay processing because its outcome was refused.
        Err(e) if to != JobStatus::Failed => {
            logger.log_error(&format!("failed to record {to}, marking job failed: {e}"));
            let failed = JobTransition::failed(index, attempt, format!("could not record {to}: {e}"));
            report(aggregator, failed, None, logger)
        }
        Err(e) => {
            logger.log_error(&format!("failed to record transition: {}", e));
            ExecutionOutcome::Ignored
        }
    }
}
