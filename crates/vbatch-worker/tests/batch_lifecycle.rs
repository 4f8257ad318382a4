//! End-to-end batch runs against scripted renderers and the memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use vbatch_models::{BatchConfig, BatchEvent, BatchStatus, JobStatus, ValidationError};
use vbatch_worker::BatchError;

use common::{drain, submission, wait, Harness, ScriptedRenderer, Step};

#[tokio::test]
async fn test_sequential_batch_completes_in_order() {
    let renderer = Arc::new(ScriptedRenderer::new(Duration::from_millis(5)));
    let h = Harness::new(renderer.clone());

    let batch = h
        .manager
        .submit(submission(
            BatchConfig::default().with_max_concurrent(1),
            &["first", "second", "third"],
        ))
        .await
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Queued);

    let done = wait(&h.manager, &batch).await;
    assert_eq!(done.status, BatchStatus::Completed);
    assert_eq!(done.progress, 1.0);
    assert_eq!(done.counters.completed, 3);
    assert!(done.videos.iter().all(|v| v.result.is_some() && v.attempt_count == 1));
    assert!(done.completed_at.is_some());
    assert_eq!(renderer.starts(), vec!["first", "second", "third"]);
    assert_eq!(renderer.peak_concurrency(), 1);
}

#[tokio::test]
async fn test_permanent_failure_leaves_batch_partially_completed() {
    let renderer = Arc::new(
        ScriptedRenderer::new(Duration::from_millis(10)).script("v2", &[Step::Permanent]),
    );
    let h = Harness::new(renderer.clone());

    let batch = h
        .manager
        .submit(submission(
            BatchConfig::default().with_max_concurrent(2),
            &["v0", "v1", "v2", "v3", "v4"],
        ))
        .await
        .unwrap();
    let done = wait(&h.manager, &batch).await;

    assert_eq!(done.status, BatchStatus::Completed);
    assert_eq!(done.counters.completed, 4);
    assert_eq!(done.counters.failed, 1);
    assert_eq!(done.job_errors.len(), 1);
    assert_eq!(done.job_errors[0].job_id, done.videos[2].id);
    assert_eq!(done.videos[2].status, JobStatus::Failed);
    // Permanent errors are never retried.
    assert_eq!(renderer.attempts("v2"), 1);
    assert!(renderer.peak_concurrency() <= 2);
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_success() {
    let renderer = Arc::new(
        ScriptedRenderer::new(Duration::from_millis(1))
            .script("flaky", &[Step::Transient, Step::Transient]),
    );
    let h = Harness::new(renderer.clone());
    let mut rx = h.events.subscribe();

    let batch = h
        .manager
        .submit(submission(BatchConfig::default().with_retry_attempts(2), &["flaky"]))
        .await
        .unwrap();
    let done = wait(&h.manager, &batch).await;

    let video = &done.videos[0];
    assert_eq!(video.status, JobStatus::Completed);
    assert_eq!(video.attempt_count, 3);
    assert_eq!(renderer.attempts("flaky"), 3);
    assert_eq!(done.status, BatchStatus::Completed);

    let retries: Vec<u32> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            BatchEvent::JobRetryScheduled { attempt_count, .. } => Some(attempt_count),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2]);
}

#[tokio::test]
async fn test_transient_failures_exhaust_attempts() {
    let renderer = Arc::new(
        ScriptedRenderer::new(Duration::from_millis(1))
            .script("doomed", &[Step::Transient, Step::Transient, Step::Transient]),
    );
    let h = Harness::new(renderer.clone());

    let batch = h
        .manager
        .submit(submission(BatchConfig::default().with_retry_attempts(1), &["doomed"]))
        .await
        .unwrap();
    let done = wait(&h.manager, &batch).await;

    assert_eq!(renderer.attempts("doomed"), 2);
    assert_eq!(done.videos[0].status, JobStatus::Failed);
    assert_eq!(done.videos[0].attempt_count, 2);
    assert_eq!(done.status, BatchStatus::Failed);
    assert!(done.error_summary.is_some());
}

#[tokio::test]
async fn test_render_timeout_is_retried() {
    let renderer = Arc::new(ScriptedRenderer::new(Duration::from_millis(1)).script("slow", &[Step::Hang]));
    let mut config = common::fast_config();
    config.job_timeout = Duration::from_millis(50);
    let h = Harness::with_store(
        renderer.clone(),
        Arc::new(vbatch_store::MemoryBatchStore::new()),
        config,
    );

    let batch = h
        .manager
        .submit(submission(BatchConfig::default().with_retry_attempts(1), &["slow"]))
        .await
        .unwrap();
    let done = wait(&h.manager, &batch).await;

    assert_eq!(done.videos[0].status, JobStatus::Completed);
    assert_eq!(done.videos[0].attempt_count, 2);
    assert_eq!(renderer.attempts("slow"), 2);
}

#[tokio::test]
async fn test_empty_submission_is_rejected_and_not_stored() {
    let h = Harness::new(Arc::new(ScriptedRenderer::default()));

    let err = h
        .manager
        .submit(submission(BatchConfig::default(), &[]))
        .await
        .unwrap_err();

    assert!(matches!(err, BatchError::Validation(ValidationError::EmptyBatch)));
    assert!(h.store.list("user-1", 10, 0).await.unwrap().is_empty());
    assert!(h.manager.live_batches().is_empty());
}

#[tokio::test]
async fn test_invalid_video_config_is_rejected() {
    let h = Harness::new(Arc::new(ScriptedRenderer::default()));

    let err = h
        .manager
        .submit(submission(BatchConfig::default(), &["ok", ""]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BatchError::Validation(ValidationError::InvalidVideoConfig { index: 1, .. })
    ));
    assert!(h.store.list("user-1", 10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_events_keep_counters_consistent() {
    let renderer = Arc::new(
        ScriptedRenderer::new(Duration::from_millis(2))
            .script("b", &[Step::Transient])
            .script("d", &[Step::Permanent]),
    );
    let h = Harness::new(renderer);
    let mut rx = h.events.subscribe();

    let batch = h
        .manager
        .submit(submission(
            BatchConfig::default().with_max_concurrent(3),
            &["a", "b", "c", "d", "e", "f"],
        ))
        .await
        .unwrap();
    wait(&h.manager, &batch).await;

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(BatchEvent::BatchCreated { total: 6, .. })));

    let mut last_progress = 0.0;
    for event in &events {
        if let BatchEvent::BatchProgress {
            counters, progress, ..
        } = event
        {
            assert!(counters.is_consistent(), "inconsistent counters: {counters:?}");
            assert!(counters.in_progress <= 3);
            assert!(*progress >= last_progress, "progress went backwards");
            last_progress = *progress;
        }
    }

    let terminal: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, BatchEvent::BatchTerminal { .. }))
        .collect();
    assert_eq!(terminal.len(), 1);
    assert!(matches!(events.last(), Some(BatchEvent::BatchTerminal { .. })));

    let job_terminals = events
        .iter()
        .filter(|e| matches!(e, BatchEvent::JobTerminal { .. }))
        .count();
    assert_eq!(job_terminals, 6);
}

#[tokio::test]
async fn test_sequential_processing_flag_forces_one_at_a_time() {
    let renderer = Arc::new(ScriptedRenderer::new(Duration::from_millis(5)));
    let h = Harness::new(renderer.clone());

    let mut config = BatchConfig::default().with_max_concurrent(4);
    config.parallel_processing = false;
    let batch = h
        .manager
        .submit(submission(config, &["a", "b", "c", "d"]))
        .await
        .unwrap();
    wait(&h.manager, &batch).await;

    assert_eq!(renderer.peak_concurrency(), 1);
    assert_eq!(renderer.starts(), vec!["a", "b", "c", "d"]);
}
