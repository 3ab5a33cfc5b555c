//! Progress-callback trait for per-stage pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::ServiceConfigBuilder::progress_callback`] to receive
//! events as each network stage starts, retries, finishes, or fails.
//!
//! # Example
//!
//! ```rust
//! use idphoto_pipeline::{PipelineProgressCallback, ServiceConfig, Stage};
//! use std::sync::{Arc, atomic::{AtomicU32, Ordering}};
//!
//! struct RetryCounter {
//!     retries: AtomicU32,
//! }
//!
//! impl PipelineProgressCallback for RetryCounter {
//!     fn on_retry(&self, stage: Stage, attempt: u32, delay_ms: u64) {
//!         self.retries.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage}: retry {attempt} in {delay_ms}ms");
//!     }
//! }
//!
//! let counter = Arc::new(RetryCounter { retries: AtomicU32::new(0) });
//!
//! let config = ServiceConfig::builder()
//!     .host("127.0.0.1")
//!     .port(8080)
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::stages::Stage;
use std::sync::Arc;

/// Called by the orchestrator as it drives each stage.
///
/// Implementations must be `Send + Sync`: batch processing runs independent
/// requests concurrently and they share one callback. All methods have
/// default no-op implementations so callers only override what they need.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called just before the first attempt of a stage is sent.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called before sleeping ahead of a retry.
    ///
    /// # Arguments
    /// * `attempt` : the attempt about to be made (2 for the first retry)
    /// * `delay_ms`: back-off before that attempt
    fn on_retry(&self, stage: Stage, attempt: u32, delay_ms: u64) {
        let _ = (stage, attempt, delay_ms);
    }

    /// Called when a stage returns its output.
    fn on_stage_complete(&self, stage: Stage, attempts: u32, duration_ms: u64) {
        let _ = (stage, attempts, duration_ms);
    }

    /// Called when a stage fails and the workflow is about to abort.
    fn on_stage_error(&self, stage: Stage, error: &str) {
        let _ = (stage, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ServiceConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
