//! Renderer interface for batch video generation.
//!
//! This crate provides:
//! - The [`Renderer`] trait the orchestrator drives for every video
//! - Error kinds that classify failures as transient or permanent
//! - An HTTP client for the rendering service

pub mod client;
pub mod error;
pub mod renderer;
pub mod types;

pub use client::{HttpRenderer, HttpRendererConfig};
pub use error::{ErrorClass, RenderError, RenderResult};
pub use renderer::{NoopProgress, ProgressSink, RenderContext, Renderer};
pub use types::{RenderRequest, RenderResponse};
