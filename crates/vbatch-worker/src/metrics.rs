//! Prometheus metrics for the orchestrator.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use vbatch_models::JobStatus;

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Metric names as constants for consistency.
pub mod names {
    // Batch metrics
    pub const BATCHES_SUBMITTED_TOTAL: &str = "vbatch_batches_submitted_total";
    pub const BATCHES_TERMINAL_TOTAL: &str = "vbatch_batches_terminal_total";

    // Job metrics
    pub const JOBS_COMPLETED_TOTAL: &str = "vbatch_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vbatch_jobs_failed_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "vbatch_jobs_cancelled_total";
    pub const JOBS_SKIPPED_TOTAL: &str = "vbatch_jobs_skipped_total";
    pub const JOB_RETRIES_TOTAL: &str = "vbatch_job_retries_total";
    pub const JOBS_IN_FLIGHT: &str = "vbatch_jobs_in_flight";

    // Render metrics
    pub const RENDER_DURATION_SECONDS: &str = "vbatch_render_duration_seconds";

    // Persistence metrics
    pub const PERSIST_FAILURES_TOTAL: &str = "vbatch_persist_failures_total";
}

pub fn record_batch_submitted() {
    counter!(names::BATCHES_SUBMITTED_TOTAL).increment(1);
}

pub fn record_batch_terminal(status: &'static str) {
    counter!(names::BATCHES_TERMINAL_TOTAL, "status" => status).increment(1);
}

/// Record a job reaching a terminal status.
pub fn record_job_terminal(status: JobStatus) {
    let name = match status {
        JobStatus::Completed => names::JOBS_COMPLETED_TOTAL,
        JobStatus::Failed => names::JOBS_FAILED_TOTAL,
        JobStatus::Cancelled => names::JOBS_CANCELLED_TOTAL,
        JobStatus::Skipped => names::JOBS_SKIPPED_TOTAL,
        _ => return,
    };
    counter!(name).increment(1);
}

pub fn record_job_retry() {
    counter!(names::JOB_RETRIES_TOTAL).increment(1);
}

pub fn job_admitted() {
    gauge!(names::JOBS_IN_FLIGHT).increment(1.0);
}

pub fn job_released() {
    gauge!(names::JOBS_IN_FLIGHT).decrement(1.0);
}

/// Record one render attempt by outcome (`ok`, `transient`, `permanent`).
pub fn record_render(outcome: &'static str, duration_secs: f64) {
    histogram!(names::RENDER_DURATION_SECONDS, "outcome" => outcome).record(duration_secs);
}

pub fn record_persist_failure() {
    counter!(names::PERSIST_FAILURES_TOTAL).increment(1);
}
