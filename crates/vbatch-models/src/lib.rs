//! Shared data models for batch video generation.
//!
//! This crate provides Serde-serializable types for:
//! - Batches and the videos (jobs) they contain
//! - Batch and job status machines with explicit transition tables
//! - Submission payloads and their validation
//! - Lifecycle events published to notifiers

pub mod batch;
pub mod config;
pub mod event;
pub mod status;
pub mod submission;
pub mod video;

// Re-export common types
pub use batch::{Batch, BatchCounters, BatchId, JobErrorEntry};
pub use config::{BatchConfig, VideoConfig};
pub use event::{BatchEvent, BatchNotification};
pub use status::{BatchStatus, JobStatus, TransitionError};
pub use submission::{validate_batch, BatchSubmission, ValidationError};
pub use video::{BatchVideo, JobId, VideoResult};
