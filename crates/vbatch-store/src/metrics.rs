//! Store metrics collection.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total store requests by backend, operation and outcome.
    pub const REQUESTS_TOTAL: &str = "vbatch_store_requests_total";

    /// Total retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "vbatch_store_retries_total";

    /// Request latency in seconds by backend and operation.
    pub const LATENCY_SECONDS: &str = "vbatch_store_latency_seconds";
}

/// Record metrics for a completed store request.
pub fn record_request(backend: &'static str, operation: &'static str, ok: bool, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "backend" => backend,
        "operation" => operation,
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "backend" => backend,
        "operation" => operation
    )
    .record(latency_ms / 1000.0);
}

/// Record a retry attempt.
pub fn record_retry(operation: &str) {
    counter!(
        names::RETRIES_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}
