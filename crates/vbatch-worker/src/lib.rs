//! Batch video generation orchestrator.
//!
//! This crate provides:
//! - Batch submission, control (pause, resume, cancel, skip) and queries
//! - A per-batch scheduler with a concurrency bound and retry backoff
//! - Job execution with timeouts and transient/permanent classification
//! - Guarded aggregate state, lifecycle events and background persistence
//! - Metrics and structured job logging

pub mod aggregator;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod persister;
pub mod retry;
pub mod scheduler;

pub use aggregator::{Admission, AdmittedJob, Aggregator, Applied, JobTransition};
pub use config::WorkerConfig;
pub use error::{BatchError, BatchResult};
pub use executor::{ExecutionOutcome, JobExecutor};
pub use logging::JobLogger;
pub use manager::BatchManager;
pub use persister::{spawn_persister, PersistProgress, PersisterHandle};
pub use retry::{FailureTracker, RetryDecision, RetryPolicy};
pub use scheduler::{BatchControl, Scheduler};
