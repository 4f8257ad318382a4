//! Batch video generation worker binary.
//!
//! Runs one batch submission to completion:
//! `vbatch-worker batch.json` (or `BATCH_FILE=batch.json vbatch-worker`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vbatch_models::BatchSubmission;
use vbatch_notify::{BroadcastNotifier, FanoutNotifier, Notifier, RedisNotifier, RedisNotifierConfig};
use vbatch_render::HttpRenderer;
use vbatch_store::{build_store, StoreBackend};
use vbatch_worker::{metrics, BatchManager, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

/// Colored output for dev, JSON for production.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["vbatch=info", "hyper=warn", "reqwest=warn"] {
        if let Ok(d) = directive.parse() {
            env_filter = env_filter.add_directive(d);
        }
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    info!("Starting vbatch-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr).context("failed to start metrics exporter")?;
        info!("Metrics listening on {}", addr);
    }

    let Some(path) = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BATCH_FILE").ok())
    else {
        bail!("usage: vbatch-worker <batch.json> (or set BATCH_FILE)");
    };
    let payload = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {path}"))?;
    let submission = BatchSubmission::from_json(&payload)?;

    let store = build_store(StoreBackend::from_env()).context("failed to create batch store")?;

    let events = BroadcastNotifier::default();
    let mut notifier = FanoutNotifier::new().with(Arc::new(events.clone()));
    let redis_notifier = if std::env::var("REDIS_URL").is_ok() {
        let redis = Arc::new(
            RedisNotifier::spawn(RedisNotifierConfig::from_env())
                .context("failed to start redis notifier")?,
        );
        notifier = notifier.with(redis.clone());
        Some(redis)
    } else {
        None
    };
    let notifier: Arc<dyn Notifier> = Arc::new(notifier);

    let renderer = HttpRenderer::from_env().context("failed to create renderer client")?;
    match renderer.health_check().await {
        Ok(true) => info!("Rendering service is healthy"),
        Ok(false) => warn!("Rendering service reports unhealthy, continuing"),
        Err(e) => warn!("Rendering service health check failed, continuing: {}", e),
    }

    let manager = BatchManager::new(config.clone(), store, notifier, Arc::new(renderer));

    let mut rx = events.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(n) => {
                    info!(batch_id = %n.batch_id, seq = n.seq, kind = n.event.kind(), "Batch event");
                    if let Ok(json) = serde_json::to_string(&n.event) {
                        debug!("{}", json);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let batch = manager.submit(submission).await?;
    let batch_id = batch.id.clone();

    let finished = tokio::select! {
        result = manager.wait(&batch_id) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!(batch_id = %batch_id, "Received shutdown signal, cancelling batch");
            if let Err(e) = manager.cancel(&batch_id).await {
                warn!(batch_id = %batch_id, "Cancel failed: {}", e);
            }
            tokio::time::timeout(config.shutdown_timeout, manager.wait(&batch_id))
                .await
                .context("timed out waiting for in-flight jobs")??
        }
    };

    match tokio::time::timeout(config.shutdown_timeout, manager.flush(&batch_id)).await {
        Ok(Ok(revision)) => debug!(batch_id = %batch_id, revision, "Batch state flushed"),
        Ok(Err(e)) => warn!(batch_id = %batch_id, "Flush failed: {}", e),
        Err(_) => warn!(batch_id = %batch_id, "Timed out flushing batch state"),
    }

    // The batch leaves memory right after its final write lands.
    let released = tokio::time::timeout(config.shutdown_timeout, async {
        while manager.live_batches().contains(&batch_id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if released.is_err() {
        warn!(batch_id = %batch_id, "Batch still held in memory at shutdown");
    }

    // Releases the notifier chain so the redis publisher can drain.
    drop(manager);
    if let Some(redis) = redis_notifier {
        match Arc::try_unwrap(redis) {
            Ok(redis) => redis.shutdown().await,
            Err(_) => warn!("Event publisher still in use, pending events may be lost"),
        }
    }
    event_log.abort();

    info!(
        batch_id = %batch_id,
        status = %finished.status,
        completed = finished.counters.completed,
        failed = finished.counters.failed,
        cancelled = finished.counters.cancelled,
        skipped = finished.counters.skipped,
        "Batch finished"
    );
    println!("{}", serde_json::to_string_pretty(&finished)?);

    Ok(())
}
