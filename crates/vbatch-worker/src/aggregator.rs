//! Per-batch guarded aggregate.
//!
//! Every change to a batch (job transitions, admissions, control
//! operations) happens here under one lock. Each change recomputes the
//! counters, emits events to the notifier and publishes the new snapshot
//! to the persister and to waiters. Nothing under the lock awaits.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

use vbatch_models::{
    Batch, BatchConfig, BatchEvent, BatchId, BatchNotification, BatchStatus, JobId, JobStatus,
    VideoConfig, VideoResult,
};
use vbatch_notify::Notifier;

use crate::error::{BatchError, BatchResult};
use crate::metrics;

/// A job handed to an executor for one attempt.
#[derive(Debug, Clone)]
pub struct AdmittedJob {
    pub index: usize,
    pub job_id: JobId,
    /// 1-based attempt number
    pub attempt: u32,
    pub config: VideoConfig,
}

/// Result of an admission request.
#[derive(Debug, Clone)]
pub enum Admission {
    /// The job is now processing.
    Started(AdmittedJob),
    /// The batch is not admitting right now; try again later.
    Held,
    /// The job no longer needs to run.
    Gone,
}

/// A job transition reported by the executor running it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobTransition {
    pub index: usize,
    pub to: JobStatus,
    /// Attempt the reporter was running
    pub attempt: u32,
    pub result: Option<VideoResult>,
    pub error: Option<String>,
}

impl JobTransition {
    pub fn completed(index: usize, attempt: u32, result: VideoResult) -> Self {
        Self {
            index,
            to: JobStatus::Completed,
            attempt,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(index: usize, attempt: u32, error: impl Into<String>) -> Self {
        Self {
            index,
            to: JobStatus::Failed,
            attempt,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Back to `queued` for another attempt after backoff.
    pub fn retry(index: usize, attempt: u32, error: impl Into<String>) -> Self {
        Self {
            index,
            to: JobStatus::Queued,
            attempt,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn cancelled(index: usize, attempt: u32) -> Self {
        Self {
            index,
            to: JobStatus::Cancelled,
            attempt,
            result: None,
            error: None,
        }
    }
}

/// How a reported transition was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Recorded with this status (`cancelled` when forced).
    Recorded(JobStatus),
    /// Already recorded; nothing changed.
    Duplicate,
    /// Reported for an attempt that is no longer current; ignored.
    Stale,
}

struct AggregateState {
    batch: Batch,
    /// Last sequence number handed to the notifier
    seq: u64,
    /// Jobs queued for retry whose backoff has not elapsed
    backing_off: HashSet<usize>,
    terminal_emitted: bool,
}

/// Single writer for one batch.
pub struct Aggregator {
    batch_id: BatchId,
    batch_config: Arc<BatchConfig>,
    state: Mutex<AggregateState>,
    snapshots: watch::Sender<Batch>,
    notifier: Arc<dyn Notifier>,
}

impl Aggregator {
    pub fn new(batch: Batch, notifier: Arc<dyn Notifier>) -> Self {
        let (snapshots, _) = watch::channel(batch.clone());
        Self {
            batch_id: batch.id.clone(),
            batch_config: Arc::new(batch.config.clone()),
            state: Mutex::new(AggregateState {
                batch,
                seq: 0,
                backing_off: HashSet::new(),
                terminal_emitted: false,
            }),
            snapshots,
            notifier,
        }
    }

    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    pub fn batch_config(&self) -> Arc<BatchConfig> {
        Arc::clone(&self.batch_config)
    }

    /// Consistent copy of the batch.
    pub fn snapshot(&self) -> Batch {
        self.state.lock().batch.clone()
    }

    /// Receives every published snapshot; the current one is marked seen
    /// only after the first `changed()`.
    pub fn subscribe(&self) -> watch::Receiver<Batch> {
        self.snapshots.subscribe()
    }

    /// The batch is terminal and every job has settled.
    pub fn is_settled(&self) -> bool {
        self.state.lock().terminal_emitted
    }

    /// Jobs waiting for admission, in creation order.
    pub fn ready_indices(&self) -> Vec<usize> {
        let state = self.state.lock();
        state
            .batch
            .videos
            .iter()
            .filter(|v| v.status == JobStatus::Queued && !state.backing_off.contains(&v.index))
            .map(|v| v.index)
            .collect()
    }

    /// Announce the batch and move it and its jobs from pending to queued.
    pub fn mark_queued(&self) -> BatchResult<Batch> {
        let mut state = self.state.lock();
        let created = BatchEvent::batch_created(&state.batch);
        self.emit(&mut state, created);

        let from = state.batch.transition(BatchStatus::Queued)?;
        for video in state.batch.videos.iter_mut() {
            video.transition(JobStatus::Queued)?;
        }
        self.emit(
            &mut state,
            BatchEvent::BatchStatusChanged {
                from,
                to: BatchStatus::Queued,
            },
        );
        self.finish(&mut state)?;
        Ok(state.batch.clone())
    }

    /// Move job `index` from queued to processing.
    ///
    /// The first admission moves the batch to processing.
    pub fn admit(&self, index: usize) -> BatchResult<Admission> {
        let mut state = self.state.lock();
        match state.batch.status {
            BatchStatus::Queued | BatchStatus::Processing => {}
            BatchStatus::Pending | BatchStatus::Paused => return Ok(Admission::Held),
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled => {
                return Ok(Admission::Gone)
            }
        }

        let max_attempts = state.batch.config.max_attempts();
        let video = state
            .batch
            .videos
            .get(index)
            .ok_or_else(|| BatchError::not_found(format!("job #{index} in batch {}", self.batch_id)))?;
        if video.status != JobStatus::Queued {
            return Ok(Admission::Gone);
        }
        if video.attempt_count >= max_attempts {
            return Err(BatchError::invalid_job_state(format!(
                "job {} already used {} of {} attempts",
                video.id, video.attempt_count, max_attempts
            )));
        }

        if state.batch.status == BatchStatus::Queued {
            let from = state.batch.transition(BatchStatus::Processing)?;
            info!(batch_id = %self.batch_id, "Batch processing started");
            self.emit(
                &mut state,
                BatchEvent::BatchStatusChanged {
                    from,
                    to: BatchStatus::Processing,
                },
            );
        }

        let video = &mut state.batch.videos[index];
        video.transition(JobStatus::Processing)?;
        let job = AdmittedJob {
            index,
            job_id: video.id.clone(),
            attempt: video.attempt_count,
            config: video.config.clone(),
        };
        metrics::job_admitted();
        debug!(batch_id = %self.batch_id, job_id = %job.job_id, attempt = job.attempt, "Job admitted");

        self.finish(&mut state)?;
        Ok(Admission::Started(job))
    }

    /// Record a transition reported by an executor.
    ///
    /// While the batch is cancelled, completions, failures and retries are
    /// recorded as `cancelled`. Repeated deliveries are no-ops.
    pub fn apply(&self, transition: JobTransition) -> BatchResult<Applied> {
        let mut state = self.state.lock();
        let index = transition.index;
        let (current, attempt_count) = match state.batch.videos.get(index) {
            Some(v) => (v.status, v.attempt_count),
            None => {
                return Err(BatchError::not_found(format!(
                    "job #{index} in batch {}",
                    self.batch_id
                )))
            }
        };

        let mut to = transition.to;
        if matches!(to, JobStatus::Pending | JobStatus::Processing | JobStatus::Skipped) {
            return Err(BatchError::invalid_job_state(format!(
                "executors cannot report {to}"
            )));
        }
        if state.batch.status == BatchStatus::Cancelled
            && matches!(to, JobStatus::Completed | JobStatus::Failed | JobStatus::Queued)
        {
            to = JobStatus::Cancelled;
        }

        if current == to && attempt_count == transition.attempt {
            return Ok(Applied::Duplicate);
        }
        if current == JobStatus::Processing && attempt_count != transition.attempt {
            return Ok(Applied::Stale);
        }

        {
            let video = &mut state.batch.videos[index];
            video.transition(to)?;
            match to {
                JobStatus::Completed => video.result = transition.result,
                JobStatus::Failed => {
                    video.error_message =
                        Some(transition.error.unwrap_or_else(|| "unknown error".to_string()))
                }
                JobStatus::Queued => video.error_message = transition.error,
                _ => {}
            }
        }
        if current == JobStatus::Processing {
            metrics::job_released();
        }

        let video = &state.batch.videos[index];
        debug!(
            batch_id = %self.batch_id,
            job_id = %video.id,
            attempt = video.attempt_count,
            from = %current,
            to = %to,
            "Job transition recorded"
        );
        if to == JobStatus::Queued {
            let event = BatchEvent::JobRetryScheduled {
                job_id: video.id.clone(),
                attempt_count: video.attempt_count,
                error: video.error_message.clone().unwrap_or_default(),
            };
            state.backing_off.insert(index);
            metrics::record_job_retry();
            self.emit(&mut state, event);
        } else if to.is_terminal() {
            let event = BatchEvent::job_terminal(video);
            metrics::record_job_terminal(to);
            self.emit(&mut state, event);
        }

        self.finish(&mut state)?;
        Ok(Applied::Recorded(to))
    }

    /// Record intermediate progress for the running attempt.
    pub fn report_progress(&self, index: usize, attempt: u32, progress: f64) -> bool {
        let mut state = self.state.lock();
        let applied = match state.batch.videos.get_mut(index) {
            Some(video) if video.attempt_count == attempt => video.set_progress(progress),
            _ => false,
        };
        if applied {
            state.batch.revision += 1;
            state.batch.updated_at = chrono::Utc::now();
            self.publish(&state);
        }
        applied
    }

    /// End a retry backoff. Returns whether the job should be admitted.
    pub fn release_backoff(&self, index: usize) -> bool {
        let mut state = self.state.lock();
        state.backing_off.remove(&index);
        state
            .batch
            .videos
            .get(index)
            .map(|v| v.status == JobStatus::Queued)
            .unwrap_or(false)
    }

    /// Stop admissions. In-flight jobs keep running.
    pub fn pause(&self) -> BatchResult<Batch> {
        self.change_status("pause", BatchStatus::Processing, BatchStatus::Paused)
    }

    /// Continue admissions after a pause.
    pub fn resume(&self) -> BatchResult<Batch> {
        self.change_status("resume", BatchStatus::Paused, BatchStatus::Processing)
    }

    fn change_status(
        &self,
        operation: &'static str,
        from: BatchStatus,
        to: BatchStatus,
    ) -> BatchResult<Batch> {
        let mut state = self.state.lock();
        if state.batch.status != from {
            return Err(BatchError::invalid_state(operation, state.batch.status));
        }
        state.batch.transition(to)?;
        info!(batch_id = %self.batch_id, from = %from, to = %to, "Batch status changed");
        self.emit(&mut state, BatchEvent::BatchStatusChanged { from, to });
        self.finish(&mut state)?;
        Ok(state.batch.clone())
    }

    /// Cancel the batch.
    ///
    /// Every job not running (including jobs waiting out a retry backoff)
    /// is cancelled immediately; running jobs are cancelled when their
    /// attempt reports back.
    pub fn cancel(&self) -> BatchResult<Batch> {
        let mut state = self.state.lock();
        let from = state.batch.status;
        if !from.is_cancellable() {
            return Err(BatchError::invalid_state("cancel", from));
        }
        state.batch.transition(BatchStatus::Cancelled)?;
        info!(batch_id = %self.batch_id, from = %from, "Batch cancelled");
        self.emit(
            &mut state,
            BatchEvent::BatchStatusChanged {
                from,
                to: BatchStatus::Cancelled,
            },
        );

        state.backing_off.clear();
        for index in 0..state.batch.videos.len() {
            let video = &mut state.batch.videos[index];
            if matches!(video.status, JobStatus::Pending | JobStatus::Queued) {
                video.transition(JobStatus::Cancelled)?;
                let event = BatchEvent::job_terminal(video);
                metrics::record_job_terminal(JobStatus::Cancelled);
                self.emit(&mut state, event);
            }
        }

        self.finish(&mut state)?;
        Ok(state.batch.clone())
    }

    /// Skip a job that has not started. Only valid while paused.
    pub fn skip(&self, job_id: &JobId) -> BatchResult<Batch> {
        let mut state = self.state.lock();
        if state.batch.status != BatchStatus::Paused {
            return Err(BatchError::invalid_state("skip", state.batch.status));
        }
        let index = state
            .batch
            .video(job_id)
            .map(|v| v.index)
            .ok_or_else(|| BatchError::not_found(format!("job {job_id} in batch {}", self.batch_id)))?;
        let video = &state.batch.videos[index];
        if !matches!(video.status, JobStatus::Pending | JobStatus::Queued)
            || state.backing_off.contains(&index)
        {
            return Err(BatchError::invalid_job_state(format!(
                "job {job_id} is {} and cannot be skipped",
                if state.backing_off.contains(&index) {
                    "waiting to retry"
                } else {
                    video.status.as_str()
                }
            )));
        }

        let video = &mut state.batch.videos[index];
        video.transition(JobStatus::Skipped)?;
        let event = BatchEvent::job_terminal(video);
        info!(batch_id = %self.batch_id, job_id = %job_id, "Job skipped");
        metrics::record_job_terminal(JobStatus::Skipped);
        self.emit(&mut state, event);

        self.finish(&mut state)?;
        Ok(state.batch.clone())
    }

    /// Recompute counters, emit progress, settle if done and publish.
    fn finish(&self, state: &mut AggregateState) -> BatchResult<()> {
        state.batch.recompute();
        let progress = BatchEvent::batch_progress(&state.batch);
        self.emit(state, progress);
        self.settle_if_done(state)?;
        self.publish(state);
        Ok(())
    }

    fn settle_if_done(&self, state: &mut AggregateState) -> BatchResult<()> {
        if state.terminal_emitted || !state.batch.all_jobs_settled() {
            return Ok(());
        }
        let before = state.batch.status;
        state.batch.settle()?;
        state.batch.recompute();

        let after = state.batch.status;
        if after != before {
            self.emit(state, BatchEvent::BatchStatusChanged { from: before, to: after });
        }
        let terminal = BatchEvent::batch_terminal(&state.batch);
        self.emit(state, terminal);
        state.terminal_emitted = true;
        metrics::record_batch_terminal(after.as_str());

        let counters = state.batch.counters;
        info!(
            batch_id = %self.batch_id,
            status = %after,
            completed = counters.completed,
            failed = counters.failed,
            cancelled = counters.cancelled,
            skipped = counters.skipped,
            "Batch settled"
        );
        Ok(())
    }

    fn emit(&self, state: &mut AggregateState, event: BatchEvent) {
        state.seq += 1;
        self.notifier
            .notify(BatchNotification::new(self.batch_id.clone(), state.seq, event));
    }

    fn publish(&self, state: &AggregateState) {
        self.snapshots.send_replace(state.batch.clone());
    }
}
