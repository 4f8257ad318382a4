//! Background batch persistence.
//!
//! One task per batch follows the aggregator's snapshot channel and writes
//! the newest snapshot to the store. Intermediate snapshots may be skipped;
//! the latest one always lands eventually. Store outages are retried with
//! backoff and never hold up job execution.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use vbatch_models::Batch;
use vbatch_store::retry::calculate_delay;
use vbatch_store::{BatchStore, RetryConfig, StoreError, StoreResult};

use crate::metrics;
use crate::retry::FailureTracker;

/// What a persister has done so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistProgress {
    /// Highest revision the store holds.
    pub written: Option<u64>,
    /// Highest revision a write was attempted for, accepted or not.
    pub attempted: Option<u64>,
    /// Why the store last refused a snapshot outright.
    pub rejected: Option<String>,
}

impl PersistProgress {
    pub fn is_written(&self, revision: u64) -> bool {
        self.written.is_some_and(|w| w >= revision)
    }

    fn is_attempted(&self, revision: u64) -> bool {
        self.attempted.is_some_and(|a| a >= revision)
    }
}

/// Handle to a running persister.
pub struct PersisterHandle {
    progress: watch::Receiver<PersistProgress>,
    task: JoinHandle<()>,
}

impl PersisterHandle {
    /// Highest revision known to be in the store.
    pub fn persisted_revision(&self) -> u64 {
        self.progress.borrow().written.unwrap_or_default()
    }

    /// Wait until a write of `revision` (or a newer one) has been attempted.
    ///
    /// Check [`PersistProgress::is_written`] on the result: the store may
    /// have refused the snapshot, or the persister may have stopped first.
    pub async fn wait_for_revision(&self, revision: u64) -> PersistProgress {
        let mut rx = self.progress.clone();
        let reached = rx
            .wait_for(|progress| progress.is_attempted(revision))
            .await
            .map(|progress| progress.clone());
        match reached {
            Ok(progress) => progress,
            Err(_) => rx.borrow().clone(),
        }
    }

    /// Stop persisting. Used before the batch is deleted.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start persisting snapshots from `snapshots`.
///
/// The task ends once the snapshot sender is dropped and the final
/// snapshot has been written.
pub fn spawn_persister(
    store: Arc<dyn BatchStore>,
    snapshots: watch::Receiver<Batch>,
    retry: RetryConfig,
) -> PersisterHandle {
    let initial = snapshots.borrow().revision;
    let (progress_tx, progress) = watch::channel(PersistProgress::default());
    debug!(revision = initial, "Starting batch persister");
    let task = tokio::spawn(run(store, snapshots, retry, progress_tx));
    PersisterHandle { progress, task }
}

async fn run(
    store: Arc<dyn BatchStore>,
    mut snapshots: watch::Receiver<Batch>,
    retry: RetryConfig,
    progress: watch::Sender<PersistProgress>,
) {
    let mut tracker = FailureTracker::new(3);
    let mut state = PersistProgress::default();

    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        if !state.is_attempted(snapshot.revision) {
            match persist(store.as_ref(), &mut snapshots, snapshot, &retry, &mut tracker).await {
                Ok(revision) => {
                    state.written = Some(revision);
                    state.attempted = Some(revision);
                    state.rejected = None;
                }
                Err((revision, reason)) => {
                    state.attempted = Some(revision);
                    state.rejected = Some(reason);
                }
            }
            progress.send_replace(state.clone());
            continue;
        }

        if snapshots.changed().await.is_err() {
            break;
        }
    }

    debug!(
        written = state.written.unwrap_or_default(),
        attempted = state.attempted.unwrap_or_default(),
        "Batch persister stopped"
    );
}

/// Write until the store accepts or refuses a snapshot.
///
/// Returns the revision written, or the revision refused and why. Each
/// retry picks up the newest snapshot available.
async fn persist(
    store: &dyn BatchStore,
    snapshots: &mut watch::Receiver<Batch>,
    mut snapshot: Batch,
    retry: &RetryConfig,
    tracker: &mut FailureTracker,
) -> Result<u64, (u64, String)> {
    let mut attempt = 0u32;
    loop {
        match write(store, &snapshot).await {
            Ok(()) => {
                tracker.record_success();
                debug!(batch_id = %snapshot.id, revision = snapshot.revision, "Batch persisted");
                return Ok(snapshot.revision);
            }
            Err(e) if e.is_retryable() => {
                metrics::record_persist_failure();
                let delay = calculate_delay(retry, attempt);
                if tracker.record_failure() {
                    warn!(
                        batch_id = %snapshot.id,
                        revision = snapshot.revision,
                        delay_ms = delay.as_millis() as u64,
                        "Failed to persist batch, retrying: {}",
                        e
                    );
                }
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
                if snapshots.has_changed().unwrap_or(false) {
                    snapshot = snapshots.borrow_and_update().clone();
                }
            }
            Err(e) => {
                metrics::record_persist_failure();
                error!(
                    batch_id = %snapshot.id,
                    revision = snapshot.revision,
                    "Store refused batch snapshot: {}",
                    e
                );
                return Err((snapshot.revision, e.to_string()));
            }
        }
    }
}

/// Update the record, creating it if the initial create never landed.
async fn write(store: &dyn BatchStore, batch: &Batch) -> StoreResult<()> {
    match store.update(batch).await {
        Err(e) if e.is_not_found() => match store.create(batch).await {
            Err(StoreError::AlreadyExists(_)) => store.update(batch).await,
            other => other,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;
    use vbatch_models::{BatchConfig, BatchId, BatchStatus, VideoConfig};
    use vbatch_store::MemoryBatchStore;

    /// Fails the first `failures` writes with an outage.
    struct Flaky {
        inner: MemoryBatchStore,
        failures: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryBatchStore::new(),
                failures: AtomicU32::new(failures),
            }
        }

        fn outage(&self) -> StoreResult<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::unavailable("connection reset"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BatchStore for Flaky {
        async fn create(&self, batch: &Batch) -> StoreResult<()> {
            self.outage()?;
            self.inner.create(batch).await
        }

        async fn get(&self, id: &BatchId) -> StoreResult<Option<Batch>> {
            self.inner.get(id).await
        }

        async fn update(&self, batch: &Batch) -> StoreResult<()> {
            self.outage()?;
            self.inner.update(batch).await
        }

        async fn list(&self, user_id: &str, limit: usize, offset: usize) -> StoreResult<Vec<Batch>> {
            self.inner.list(user_id, limit, offset).await
        }

        async fn delete(&self, id: &BatchId) -> StoreResult<()> {
            self.inner.delete(id).await
        }

        fn backend(&self) -> &'static str {
            "flaky"
        }
    }

    /// Refuses every write while `refusing` is set.
    struct Refusing {
        inner: MemoryBatchStore,
        refusing: AtomicBool,
    }

    impl Refusing {
        fn check(&self) -> StoreResult<()> {
            if self.refusing.load(Ordering::SeqCst) {
                return Err(StoreError::Serialization("payload too large".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BatchStore for Refusing {
        async fn create(&self, batch: &Batch) -> StoreResult<()> {
            self.check()?;
            self.inner.create(batch).await
        }

        async fn get(&self, id: &BatchId) -> StoreResult<Option<Batch>> {
            self.inner.get(id).await
        }

        async fn update(&self, batch: &Batch) -> StoreResult<()> {
            self.check()?;
            self.inner.update(batch).await
        }

        async fn list(&self, user_id: &str, limit: usize, offset: usize) -> StoreResult<Vec<Batch>> {
            self.inner.list(user_id, limit, offset).await
        }

        async fn delete(&self, id: &BatchId) -> StoreResult<()> {
            self.inner.delete(id).await
        }

        fn backend(&self) -> &'static str {
            "refusing"
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: u32::MAX,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    fn batch() -> Batch {
        Batch::new("u1", "persist", BatchConfig::default(), vec![VideoConfig::new("a")])
    }

    #[tokio::test]
    async fn test_creates_missing_record() {
        let store = Arc::new(MemoryBatchStore::new());
        let mut batch = batch();
        batch.recompute();
        let (tx, rx) = watch::channel(batch.clone());

        let handle = spawn_persister(store.clone(), rx, fast_retry());
        assert!(handle.wait_for_revision(batch.revision).await.is_written(batch.revision));
        assert_eq!(store.get(&batch.id).await.unwrap().unwrap().revision, batch.revision);
        drop(tx);
    }

    #[tokio::test]
    async fn test_latest_snapshot_wins() {
        let store = Arc::new(MemoryBatchStore::new());
        let mut batch = batch();
        batch.recompute();
        let (tx, rx) = watch::channel(batch.clone());
        let handle = spawn_persister(store.clone(), rx, fast_retry());

        for _ in 0..10 {
            batch.recompute();
            tx.send_replace(batch.clone());
        }
        batch.status = BatchStatus::Cancelled;
        batch.recompute();
        tx.send_replace(batch.clone());

        assert!(handle.wait_for_revision(batch.revision).await.is_written(batch.revision));
        let stored = store.get(&batch.id).await.unwrap().unwrap();
        assert_eq!(stored.revision, batch.revision);
        assert_eq!(stored.status, BatchStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_recovers_from_store_outage() {
        let store = Arc::new(Flaky::new(4));
        let mut batch = batch();
        batch.recompute();
        let (tx, rx) = watch::channel(batch.clone());

        let handle = spawn_persister(store.clone(), rx, fast_retry());
        batch.recompute();
        tx.send_replace(batch.clone());

        let progress = tokio::time::timeout(Duration::from_secs(5), handle.wait_for_revision(batch.revision))
            .await
            .unwrap();
        assert!(progress.is_written(batch.revision));
        assert_eq!(store.get(&batch.id).await.unwrap().unwrap().revision, batch.revision);
        assert_eq!(store.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stops_after_final_snapshot() {
        let store = Arc::new(MemoryBatchStore::new());
        let mut batch = batch();
        let (tx, rx) = watch::channel(batch.clone());
        let handle = spawn_persister(store.clone(), rx, fast_retry());

        batch.recompute();
        batch.recompute();
        tx.send_replace(batch.clone());
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(store.get(&batch.id).await.unwrap().unwrap().revision, batch.revision);
    }

    #[tokio::test]
    async fn test_refused_snapshot_is_not_reported_written() {
        let store = Arc::new(Refusing {
            inner: MemoryBatchStore::new(),
            refusing: AtomicBool::new(true),
        });
        let mut batch = batch();
        batch.recompute();
        let (tx, rx) = watch::channel(batch.clone());
        let handle = spawn_persister(store.clone(), rx, fast_retry());

        let progress = tokio::time::timeout(Duration::from_secs(5), handle.wait_for_revision(batch.revision))
            .await
            .unwrap();
        assert!(!progress.is_written(batch.revision));
        assert_eq!(progress.written, None);
        assert!(progress.rejected.unwrap().contains("payload too large"));
        assert_eq!(handle.persisted_revision(), 0);
        assert!(store.inner.get(&batch.id).await.unwrap().is_none());

        // The next snapshot goes through once the store accepts it again.
        store.refusing.store(false, Ordering::SeqCst);
        batch.recompute();
        tx.send_replace(batch.clone());
        let progress = tokio::time::timeout(Duration::from_secs(5), handle.wait_for_revision(batch.revision))
            .await
            .unwrap();
        assert!(progress.is_written(batch.revision));
        assert_eq!(progress.rejected, None);
        assert_eq!(handle.persisted_revision(), batch.revision);
    }
}
