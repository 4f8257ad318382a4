//! Shared fixtures for the orchestrator integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use vbatch_models::{Batch, BatchConfig, BatchEvent, BatchSubmission, VideoConfig, VideoResult};
use vbatch_notify::{BroadcastNotifier, Notifier};
use vbatch_render::{RenderContext, RenderError, RenderResult, Renderer};
use vbatch_store::{BatchStore, MemoryBatchStore, RetryConfig, StoreError, StoreResult};
use vbatch_worker::{BatchManager, WorkerConfig};

/// What one scripted attempt does.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Transient,
    Permanent,
    /// Never returns; only the job timeout ends it.
    Hang,
}

/// Renders every topic successfully unless a script says otherwise.
///
/// Records start order, attempts per topic and peak concurrency.
#[derive(Default)]
pub struct ScriptedRenderer {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    starts: Mutex<Vec<String>>,
    attempts: Mutex<HashMap<String, u32>>,
    running: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

impl ScriptedRenderer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn script(self, topic: &str, steps: &[Step]) -> Self {
        self.scripts
            .lock()
            .insert(topic.to_string(), steps.iter().copied().collect());
        self
    }

    pub fn starts(&self) -> Vec<String> {
        self.starts.lock().clone()
    }

    pub fn attempts(&self, topic: &str) -> u32 {
        self.attempts.lock().get(topic).copied().unwrap_or(0)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn generate(&self, config: &VideoConfig, ctx: &RenderContext) -> RenderResult<VideoResult> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        let _running = Running(&self.running);
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.starts.lock().push(config.topic.clone());
        *self.attempts.lock().entry(config.topic.clone()).or_default() += 1;

        let step = self
            .scripts
            .lock()
            .get_mut(&config.topic)
            .and_then(|steps| steps.pop_front());

        ctx.report_progress(0.25);
        tokio::time::sleep(self.delay).await;
        ctx.report_progress(0.75);

        match step {
            Some(Step::Transient) => Err(RenderError::overloaded("try again later")),
            Some(Step::Permanent) => Err(RenderError::invalid_config("unsupported topic")),
            Some(Step::Hang) => {
                std::future::pending::<()>().await;
                Err(RenderError::unavailable("unreachable"))
            }
            None => Ok(rendered(&config.topic)),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Blocks every render until the test opens the gate.
pub struct GatedRenderer {
    gate: Semaphore,
    started: mpsc::UnboundedSender<String>,
    pub renders: AtomicU32,
}

impl GatedRenderer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (started, rx) = mpsc::unbounded_channel();
        (
            Self {
                gate: Semaphore::new(0),
                started,
                renders: AtomicU32::new(0),
            },
            rx,
        )
    }

    /// Let `n` blocked or future renders finish.
    pub fn open(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

#[async_trait]
impl Renderer for GatedRenderer {
    async fn generate(&self, config: &VideoConfig, _ctx: &RenderContext) -> RenderResult<VideoResult> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        let _ = self.started.send(config.topic.clone());
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        Ok(rendered(&config.topic))
    }
}

pub fn rendered(topic: &str) -> VideoResult {
    VideoResult {
        location: format!("videos/{}.mp4", topic.replace(' ', "-")),
        duration_secs: 42.0,
        size_bytes: 4096,
        thumbnail: None,
    }
}

/// Fails creates and updates with an outage until `failures` runs out.
pub struct FlakyStore {
    pub inner: MemoryBatchStore,
    failures: AtomicU32,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryBatchStore::new(),
            failures: AtomicU32::new(failures),
        }
    }

    pub fn remaining_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    fn outage(&self) -> StoreResult<()> {
        let tripped = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(StoreError::unavailable("connection reset by peer"));
        }
        Ok(())
    }
}

#[async_trait]
impl BatchStore for FlakyStore {
    async fn create(&self, batch: &Batch) -> StoreResult<()> {
        self.outage()?;
        self.inner.create(batch).await
    }

    async fn get(&self, id: &vbatch_models::BatchId) -> StoreResult<Option<Batch>> {
        self.inner.get(id).await
    }

    async fn update(&self, batch: &Batch) -> StoreResult<()> {
        self.outage()?;
        self.inner.update(batch).await
    }

    async fn list(&self, user_id: &str, limit: usize, offset: usize) -> StoreResult<Vec<Batch>> {
        self.inner.list(user_id, limit, offset).await
    }

    async fn delete(&self, id: &vbatch_models::BatchId) -> StoreResult<()> {
        self.inner.delete(id).await
    }

    fn backend(&self) -> &'static str {
        "flaky"
    }
}

/// Short delays so retries and persistence settle quickly.
pub fn fast_config() -> WorkerConfig {
    WorkerConfig {
        job_timeout: Duration::from_secs(5),
        retry_base: Duration::from_millis(5),
        retry_max: Duration::from_millis(20),
        retry_jitter: false,
        persist_retry_base: Duration::from_millis(1),
        persist_retry_max: Duration::from_millis(5),
        shutdown_timeout: Duration::from_secs(5),
        metrics_addr: None,
    }
}

pub fn fast_store_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

pub struct Harness {
    pub manager: BatchManager,
    pub store: Arc<dyn BatchStore>,
    pub events: BroadcastNotifier,
}

impl Harness {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self::with_store(renderer, Arc::new(MemoryBatchStore::new()), fast_config())
    }

    pub fn with_store(
        renderer: Arc<dyn Renderer>,
        store: Arc<dyn BatchStore>,
        config: WorkerConfig,
    ) -> Self {
        let events = BroadcastNotifier::new(4096);
        let notifier: Arc<dyn Notifier> = Arc::new(events.clone());
        let manager = BatchManager::new(config, Arc::clone(&store), notifier, renderer)
            .with_store_retry(fast_store_retry());
        Self {
            manager,
            store,
            events,
        }
    }
}

pub fn submission(config: BatchConfig, topics: &[&str]) -> BatchSubmission {
    BatchSubmission::new(
        "user-1",
        "integration",
        config,
        topics.iter().map(|t| VideoConfig::new(*t)).collect(),
    )
}

/// Wait for a batch, failing the test if it takes too long.
pub async fn wait(manager: &BatchManager, batch: &Batch) -> Batch {
    tokio::time::timeout(Duration::from_secs(10), manager.wait(&batch.id))
        .await
        .expect("batch did not settle in time")
        .expect("wait failed")
}

/// Every event currently buffered for the receiver.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<vbatch_models::BatchNotification>) -> Vec<BatchEvent> {
    let mut events = Vec::new();
    while let Ok(n) = rx.try_recv() {
        events.push(n.event);
    }
    events
}

/// Poll until `check` holds for the batch.
pub async fn eventually<F>(manager: &BatchManager, batch: &Batch, check: F) -> Batch
where
    F: Fn(&Batch) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let current = manager.get(&batch.id).await.expect("get failed");
            if check(&current) {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}

/// Wait until the manager holds no batches in memory.
pub async fn released(manager: &BatchManager) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !manager.live_batches().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("settled batches were not released")
}
