//! Per-batch scheduler.
//!
//! Admits queued jobs lowest index first, only while a concurrency permit
//! is free. Retried jobs wait out their backoff on a timer before they
//! become ready again. The task exits once every job of the batch has
//! settled.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::{Admission, Aggregator};
use crate::executor::{ExecutionOutcome, JobExecutor};

/// Handles a control operation uses to steer a running scheduler.
#[derive(Debug, Clone, Default)]
pub struct BatchControl {
    /// Tripped on cancel; also handed to every render attempt.
    pub cancel: CancellationToken,
    /// Nudges the scheduler after resume or skip.
    pub wake: Arc<Notify>,
}

impl BatchControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        self.wake.notify_one();
    }

    pub fn wake(&self) {
        self.wake.notify_one();
    }
}

/// Drives one batch from queued to settled.
pub struct Scheduler {
    aggregator: Arc<Aggregator>,
    executor: Arc<JobExecutor>,
    control: BatchControl,
}

impl Scheduler {
    pub fn new(aggregator: Arc<Aggregator>, executor: Arc<JobExecutor>, control: BatchControl) -> Self {
        Self {
            aggregator,
            executor,
            control,
        }
    }

    pub async fn run(self) {
        let batch_id = self.aggregator.batch_id().clone();
        let bound = self.aggregator.batch_config().effective_max_concurrent();
        let semaphore = Arc::new(Semaphore::new(bound));
        let mut ready: BTreeSet<usize> = self.aggregator.ready_indices().into_iter().collect();
        let mut running: JoinSet<ExecutionOutcome> = JoinSet::new();
        let mut backoff: JoinSet<usize> = JoinSet::new();
        let mut cancel_seen = false;

        info!(batch_id = %batch_id, jobs = ready.len(), max_concurrent = bound, "Scheduler started");

        loop {
            if self.aggregator.is_settled() {
                break;
            }

            if self.control.cancel.is_cancelled() {
                if !ready.is_empty() || !backoff.is_empty() {
                    debug!(batch_id = %batch_id, ready = ready.len(), backing_off = backoff.len(), "Draining cancelled batch");
                }
                // The aggregator already cancelled these jobs.
                ready.clear();
                backoff.abort_all();
            } else {
                self.admit(&semaphore, &mut ready, &mut running);
            }

            if running.is_empty() && backoff.is_empty() && self.aggregator.is_settled() {
                break;
            }

            tokio::select! {
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    match joined {
                        Ok(ExecutionOutcome::Retry { index, delay }) => {
                            let sleep = self.executor.backoff_sleep(delay);
                            debug!(batch_id = %batch_id, index, delay_ms = sleep.as_millis() as u64, "Job backing off");
                            backoff.spawn(async move {
                                tokio::time::sleep(sleep).await;
                                index
                            });
                        }
                        Ok(_) => {}
                        Err(e) => error!(batch_id = %batch_id, "Job task failed: {}", e),
                    }
                }
                Some(elapsed) = backoff.join_next(), if !backoff.is_empty() => {
                    if let Ok(index) = elapsed {
                        if self.aggregator.release_backoff(index) {
                            ready.insert(index);
                        }
                    }
                }
                _ = self.control.cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                }
                _ = self.control.wake.notified() => {}
            }
        }

        // Every job settled; drop leftover timers.
        backoff.abort_all();
        while running.join_next().await.is_some() {}

        info!(batch_id = %batch_id, "Scheduler stopped");
    }

    /// Admit ready jobs while permits last.
    fn admit(
        &self,
        semaphore: &Arc<Semaphore>,
        ready: &mut BTreeSet<usize>,
        running: &mut JoinSet<ExecutionOutcome>,
    ) {
        while let Some(&index) = ready.first() {
            let permit = match Arc::clone(semaphore).try_acquire_owned() {
                Ok(p) => p,
                Err(_) => break,
            };

            match self.aggregator.admit(index) {
                Ok(Admission::Started(job)) => {
                    ready.remove(&index);
                    let aggregator = Arc::clone(&self.aggregator);
                    let executor = Arc::clone(&self.executor);
                    let cancel = self.control.cancel.clone();
                    running.spawn(async move {
                        let _permit = permit;
                        executor.execute(aggregator, job, cancel).await
                    });
                }
                Ok(Admission::Held) => break,
                Ok(Admission::Gone) => {
                    ready.remove(&index);
                }
                Err(e) => {
                    warn!(batch_id = %self.aggregator.batch_id(), index, "Admission rejected: {}", e);
                    ready.remove(&index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use vbatch_models::{Batch, BatchConfig, BatchStatus, JobStatus, VideoConfig, VideoResult};
    use vbatch_notify::NoopNotifier;
    use vbatch_render::{RenderContext, RenderError, RenderResult, Renderer};

    use crate::retry::RetryPolicy;

    /// Succeeds after a short delay, or always reports overload.
    #[derive(Default)]
    struct Counting {
        running: AtomicUsize,
        peak: AtomicUsize,
        overloaded: bool,
    }

    #[async_trait]
    impl Renderer for Counting {
        async fn generate(&self, config: &VideoConfig, _ctx: &RenderContext) -> RenderResult<VideoResult> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if self.overloaded {
                return Err(RenderError::overloaded("busy"));
            }
            Ok(VideoResult {
                location: format!("videos/{}.mp4", config.topic),
                duration_secs: 10.0,
                size_bytes: 1024,
                thumbnail: None,
            })
        }
    }

    fn aggregator(config: BatchConfig, topics: &[&str]) -> Arc<Aggregator> {
        let videos = topics.iter().map(|t| VideoConfig::new(*t)).collect();
        let batch = Batch::new("u1", "sched", config, videos);
        let aggregator = Arc::new(Aggregator::new(batch, Arc::new(NoopNotifier)));
        aggregator.mark_queued().unwrap();
        aggregator
    }

    fn executor(renderer: Arc<dyn Renderer>, retry_base: Duration) -> Arc<JobExecutor> {
        Arc::new(JobExecutor::new(
            renderer,
            RetryPolicy::without_jitter(retry_base, retry_base * 2),
            Duration::from_secs(5),
        ))
    }

    #[tokio::test]
    async fn test_control_signals() {
        let control = BatchControl::new();
        let handle = control.clone();

        control.wake();
        tokio::time::timeout(Duration::from_secs(1), handle.wake.notified())
            .await
            .unwrap();

        control.cancel();
        assert!(handle.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_respects_bound_and_settles() {
        let renderer = Arc::new(Counting::default());
        let aggregator = aggregator(BatchConfig::default().with_max_concurrent(2), &["a", "b", "c", "d", "e"]);
        let scheduler = Scheduler::new(
            Arc::clone(&aggregator),
            executor(renderer.clone(), Duration::from_millis(5)),
            BatchControl::new(),
        );

        tokio::time::timeout(Duration::from_secs(5), scheduler.run())
            .await
            .unwrap();

        let batch = aggregator.snapshot();
        assert!(aggregator.is_settled());
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.counters.completed, 5);
        assert!(renderer.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancel_ends_pending_backoff() {
        let renderer = Arc::new(Counting {
            overloaded: true,
            ..Default::default()
        });
        let aggregator = aggregator(BatchConfig::default().with_retry_attempts(3), &["a"]);
        let control = BatchControl::new();
        let scheduler = Scheduler::new(
            Arc::clone(&aggregator),
            executor(renderer, Duration::from_secs(30)),
            control.clone(),
        );
        let run = tokio::spawn(scheduler.run());

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let video = &aggregator.snapshot().videos[0];
                if video.status == JobStatus::Queued && video.attempt_count == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        aggregator.cancel().unwrap();
        control.cancel();
        tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap();

        let batch = aggregator.snapshot();
        assert_eq!(batch.status, BatchStatus::Cancelled);
        assert_eq!(batch.videos[0].status, JobStatus::Cancelled);
        assert!(aggregator.is_settled());
    }
}
