//! Batch lifecycle manager.
//!
//! Accepts submissions, starts a scheduler and a persister per batch, and
//! exposes the control operations. Live batches are served from memory;
//! everything else comes from the store. A batch leaves memory once it has
//! settled and its final state is stored.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use vbatch_models::{Batch, BatchId, BatchSubmission, JobId};
use vbatch_notify::Notifier;
use vbatch_render::Renderer;
use vbatch_store::{with_retry, BatchStore, RetryConfig};

use crate::aggregator::Aggregator;
use crate::config::WorkerConfig;
use crate::error::{BatchError, BatchResult};
use crate::executor::JobExecutor;
use crate::metrics;
use crate::persister::{spawn_persister, PersisterHandle};
use crate::scheduler::{BatchControl, Scheduler};

/// In-memory state of a batch this process is running.
struct BatchRuntime {
    aggregator: Arc<Aggregator>,
    control: BatchControl,
    persister: Arc<PersisterHandle>,
}

type LiveBatches = Arc<DashMap<BatchId, BatchRuntime>>;

/// Owns every live batch.
pub struct BatchManager {
    store: Arc<dyn BatchStore>,
    notifier: Arc<dyn Notifier>,
    executor: Arc<JobExecutor>,
    config: WorkerConfig,
    store_retry: RetryConfig,
    batches: LiveBatches,
}

impl BatchManager {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn BatchStore>,
        notifier: Arc<dyn Notifier>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        let executor = Arc::new(JobExecutor::new(
            renderer,
            config.retry_policy(),
            config.job_timeout,
        ));
        Self {
            store,
            notifier,
            executor,
            config,
            store_retry: RetryConfig::from_env(),
            batches: Arc::new(DashMap::new()),
        }
    }

    /// Override the retry used for direct store calls (create, get, list, delete).
    pub fn with_store_retry(mut self, retry: RetryConfig) -> Self {
        self.store_retry = retry;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Validate, persist and start a batch.
    ///
    /// Returns the batch as queued. Nothing is stored when validation fails.
    pub async fn submit(&self, submission: BatchSubmission) -> BatchResult<Batch> {
        submission.validate()?;
        let BatchSubmission {
            user_id,
            name,
            config,
            videos,
        } = submission;
        let batch = Batch::new(user_id, name, config, videos);
        let batch_id = batch.id.clone();

        let store = Arc::clone(&self.store);
        let record = batch.clone();
        if let Err(e) = with_retry(&self.store_retry, "create", || {
            let store = Arc::clone(&store);
            let record = record.clone();
            async move { store.create(&record).await }
        })
        .await
        {
            // The persister creates the record once the store is back.
            warn!(batch_id = %batch_id, "Failed to store new batch, continuing: {}", e);
        }

        let aggregator = Arc::new(Aggregator::new(batch, Arc::clone(&self.notifier)));
        let persister = Arc::new(spawn_persister(
            Arc::clone(&self.store),
            aggregator.subscribe(),
            self.config.persist_retry(),
        ));
        let queued = aggregator.mark_queued()?;

        let control = BatchControl::new();
        self.batches.insert(
            batch_id.clone(),
            BatchRuntime {
                aggregator: Arc::clone(&aggregator),
                control: control.clone(),
                persister: Arc::clone(&persister),
            },
        );
        let scheduler = Scheduler::new(Arc::clone(&aggregator), Arc::clone(&self.executor), control);
        tokio::spawn(run_batch(
            Arc::clone(&self.batches),
            scheduler,
            aggregator,
            persister,
        ));
        metrics::record_batch_submitted();
        info!(
            batch_id = %batch_id,
            user_id = %queued.user_id,
            videos = queued.total(),
            max_concurrent = queued.config.effective_max_concurrent(),
            "Batch submitted"
        );
        Ok(queued)
    }

    /// Cancel a live batch.
    pub async fn cancel(&self, batch_id: &BatchId) -> BatchResult<Batch> {
        let (aggregator, control) = self.live(batch_id, "cancel").await?;
        let snapshot = aggregator.cancel()?;
        control.cancel();
        Ok(snapshot)
    }

    /// Stop admitting jobs; running jobs finish.
    pub async fn pause(&self, batch_id: &BatchId) -> BatchResult<Batch> {
        let (aggregator, _) = self.live(batch_id, "pause").await?;
        aggregator.pause()
    }

    pub async fn resume(&self, batch_id: &BatchId) -> BatchResult<Batch> {
        let (aggregator, control) = self.live(batch_id, "resume").await?;
        let snapshot = aggregator.resume()?;
        control.wake();
        Ok(snapshot)
    }

    /// Skip a job that has not started. The batch must be paused.
    pub async fn skip_job(&self, batch_id: &BatchId, job_id: &JobId) -> BatchResult<Batch> {
        let (aggregator, control) = self.live(batch_id, "skip").await?;
        let snapshot = aggregator.skip(job_id)?;
        control.wake();
        Ok(snapshot)
    }

    /// Current state of a batch.
    pub async fn get(&self, batch_id: &BatchId) -> BatchResult<Batch> {
        if let Some(aggregator) = self.aggregator(batch_id) {
            return Ok(aggregator.snapshot());
        }
        self.load(batch_id).await
    }

    /// A user's batches, newest first. Live batches show their current state.
    pub async fn list(&self, user_id: &str, limit: usize, offset: usize) -> BatchResult<Vec<Batch>> {
        let store = Arc::clone(&self.store);
        let user = user_id.to_string();
        let mut batches = with_retry(&self.store_retry, "list", || {
            let store = Arc::clone(&store);
            let user = user.clone();
            async move { store.list(&user, limit, offset).await }
        })
        .await?;

        for batch in batches.iter_mut() {
            if let Some(aggregator) = self.aggregator(&batch.id) {
                *batch = aggregator.snapshot();
            }
        }
        Ok(batches)
    }

    /// Delete a batch and its jobs. Refuses batches still running.
    pub async fn delete(&self, batch_id: &BatchId) -> BatchResult<()> {
        if let Some(aggregator) = self.aggregator(batch_id) {
            if !aggregator.is_settled() {
                return Err(BatchError::invalid_state("delete", aggregator.snapshot().status));
            }
        }
        if let Some((_, runtime)) = self.batches.remove(batch_id) {
            // Let the last write land so it cannot recreate the record afterwards.
            let revision = runtime.aggregator.snapshot().revision;
            let written = tokio::time::timeout(
                self.config.shutdown_timeout,
                runtime.persister.wait_for_revision(revision),
            )
            .await
            .is_ok_and(|progress| progress.is_written(revision));
            if !written {
                warn!(batch_id = %batch_id, revision, "Deleting batch before its final state was persisted");
            }
            runtime.persister.abort();
        } else {
            let batch = self.load(batch_id).await?;
            if !batch.status.is_terminal() {
                warn!(batch_id = %batch_id, status = %batch.status, "Deleting unsettled batch not owned by this worker");
            }
        }

        let store = Arc::clone(&self.store);
        let id = batch_id.clone();
        with_retry(&self.store_retry, "delete", || {
            let store = Arc::clone(&store);
            let id = id.clone();
            async move { store.delete(&id).await }
        })
        .await
        .map_err(|e| {
            if e.is_not_found() {
                BatchError::not_found(format!("batch {batch_id}"))
            } else {
                BatchError::from(e)
            }
        })?;

        info!(batch_id = %batch_id, "Batch deleted");
        Ok(())
    }

    /// Resolve once the batch is terminal and every job has settled.
    pub async fn wait(&self, batch_id: &BatchId) -> BatchResult<Batch> {
        let Some(aggregator) = self.aggregator(batch_id) else {
            let batch = self.load(batch_id).await?;
            return if batch.status.is_terminal() {
                Ok(batch)
            } else {
                Err(BatchError::invalid_state("wait for", batch.status))
            };
        };

        let mut rx = aggregator.subscribe();
        let settled = rx
            .wait_for(|b| b.status.is_terminal() && b.all_jobs_settled())
            .await
            .map(|b| b.clone());
        match settled {
            Ok(batch) => Ok(batch),
            // The aggregator outlives every receiver it hands out.
            Err(_) => Ok(aggregator.snapshot()),
        }
    }

    /// Wait until the store holds the latest state of a batch.
    ///
    /// Returns the revision persisted. Fails if the store refused it.
    pub async fn flush(&self, batch_id: &BatchId) -> BatchResult<u64> {
        let live = self
            .batches
            .get(batch_id)
            .map(|runtime| (Arc::clone(&runtime.aggregator), Arc::clone(&runtime.persister)));
        let Some((aggregator, persister)) = live else {
            // Released batches were stored before they left memory.
            return Ok(self.load(batch_id).await?.revision);
        };

        let revision = aggregator.snapshot().revision;
        let progress = persister.wait_for_revision(revision).await;
        match progress.written.filter(|written| *written >= revision) {
            Some(written) => Ok(written),
            None => Err(BatchError::NotPersisted {
                revision,
                reason: progress
                    .rejected
                    .unwrap_or_else(|| "persister stopped".to_string()),
            }),
        }
    }

    /// IDs of batches running in this process.
    pub fn live_batches(&self) -> Vec<BatchId> {
        self.batches.iter().map(|entry| entry.key().clone()).collect()
    }

    fn aggregator(&self, batch_id: &BatchId) -> Option<Arc<Aggregator>> {
        self.batches
            .get(batch_id)
            .map(|runtime| Arc::clone(&runtime.aggregator))
    }

    /// Handles of a live batch, or the reason a control operation cannot
    /// apply to it.
    async fn live(
        &self,
        batch_id: &BatchId,
        operation: &'static str,
    ) -> BatchResult<(Arc<Aggregator>, BatchControl)> {
        let live = self
            .batches
            .get(batch_id)
            .map(|runtime| (Arc::clone(&runtime.aggregator), runtime.control.clone()));
        match live {
            Some(handles) => Ok(handles),
            None => {
                let batch = self.load(batch_id).await?;
                Err(BatchError::invalid_state(operation, batch.status))
            }
        }
    }

    async fn load(&self, batch_id: &BatchId) -> BatchResult<Batch> {
        let store = Arc::clone(&self.store);
        let id = batch_id.clone();
        with_retry(&self.store_retry, "get", || {
            let store = Arc::clone(&store);
            let id = id.clone();
            async move { store.get(&id).await }
        })
        .await?
        .ok_or_else(|| BatchError::not_found(format!("batch {batch_id}")))
    }
}

/// Run a batch to the end, then release it once the store holds its final
/// state.
async fn run_batch(
    batches: LiveBatches,
    scheduler: Scheduler,
    aggregator: Arc<Aggregator>,
    persister: Arc<PersisterHandle>,
) {
    scheduler.run().await;

    let batch_id = aggregator.batch_id().clone();
    let revision = aggregator.snapshot().revision;
    let progress = persister.wait_for_revision(revision).await;
    // Gone already if the batch was deleted meanwhile.
    if batches.remove(&batch_id).is_none() {
        return;
    }
    if progress.is_written(revision) {
        debug!(batch_id = %batch_id, revision, "Released settled batch");
    } else {
        warn!(
            batch_id = %batch_id,
            revision,
            reason = progress.rejected.as_deref().unwrap_or("persister stopped"),
            "Released settled batch without storing its final state"
        );
    }
}
