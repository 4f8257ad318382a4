//! Worker configuration.

use std::net::SocketAddr;
use std::time::Duration;

use vbatch_store::RetryConfig;

use crate::retry::RetryPolicy;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Render timeout per attempt unless the batch overrides it
    pub job_timeout: Duration,
    /// First job retry delay; doubles per attempt
    pub retry_base: Duration,
    /// Job retry delay cap
    pub retry_max: Duration,
    /// Randomize job retry delays
    pub retry_jitter: bool,
    /// First persistence retry delay
    pub persist_retry_base: Duration,
    /// Persistence retry delay cap
    pub persist_retry_max: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Prometheus listener; metrics are not exported when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(900),
            retry_base: Duration::from_secs(1),
            retry_max: Duration::from_secs(60),
            retry_jitter: true,
            persist_retry_base: Duration::from_millis(200),
            persist_retry_max: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            job_timeout: Duration::from_secs(
                std::env::var("WORKER_JOB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(900),
            ),
            retry_base: Duration::from_millis(
                std::env::var("WORKER_RETRY_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            retry_max: Duration::from_millis(
                std::env::var("WORKER_RETRY_MAX_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60_000),
            ),
            retry_jitter: std::env::var("WORKER_RETRY_JITTER")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(true),
            persist_retry_base: Duration::from_millis(
                std::env::var("WORKER_PERSIST_RETRY_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(200),
            ),
            persist_retry_max: Duration::from_millis(
                std::env::var("WORKER_PERSIST_RETRY_MAX_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30_000),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Job retry policy built from this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: self.retry_base,
            max_delay: self.retry_max,
            jitter: self.retry_jitter,
        }
    }

    /// Backoff used by the persister when the store is unavailable.
    pub fn persist_retry(&self) -> RetryConfig {
        RetryConfig {
            // The persister retries until it succeeds; only the delays matter.
            max_retries: u32::MAX,
            base_delay_ms: self.persist_retry_base.as_millis() as u64,
            max_delay_ms: self.persist_retry_max.as_millis() as u64,
        }
    }
}
