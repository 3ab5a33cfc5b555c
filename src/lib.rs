//! # idphoto-pipeline
//!
//! Turn a portrait into a finished ID photo by driving a remote AI service.
//!
//! The heavy lifting (face detection, matting, cropping, background
//! rendering) happens on the service. This crate shapes the requests, retries
//! the ones that fail for transient reasons, and chains the calls in the
//! right order.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload + options
//!  │
//!  ├─ 1. Normalize   rename UI keys, drop UI-only keys
//!  ├─ 2. Workflow    sizeType == "only change background"?
//!  │     ├─ yes: measure locally ─▶ /human_matting ─▶ /add_background
//!  │     └─ no:                     /idphoto       ─▶ /add_background
//!  └─ 3. Output      composed image (base64) + per-stage stats
//! ```
//!
//! Every POST gets a 60 s timeout and up to two retries on network errors or
//! timeouts. A `"status": false` answer is reported as
//! [`PhotoError::ServiceDeclined`], never as success.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use idphoto_pipeline::{process, ImageUpload, ProcessingParams, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads AI_SERVICE_URL / AI_SERVICE_PORT
//!     let config = ServiceConfig::from_env()?;
//!     let image = ImageUpload::from_path("portrait.jpg")?;
//!     let params = ProcessingParams::new()
//!         .with("backgroundColor", "#FFFFFF")
//!         .with("renderMode", 0)
//!         .with("width", 295)
//!         .with("height", 413);
//!
//!     let output = process(&image, &params, &config).await?;
//!     std::fs::write("id.png", output.result.decode_image()?)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `idphoto` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod output;
pub mod params;
pub mod pipeline;
pub mod process;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{process_batch, BatchItem, BatchJob, BatchStream};
pub use config::{RetryPolicy, ServiceConfig, ServiceConfigBuilder};
pub use error::{FailureKind, PhotoError, TransportError};
pub use output::{decode_base64_image, ProcessingOutput, ProcessingResult, ProcessingStats};
pub use params::{NormalizedParams, ProcessingParams, Workflow, ONLY_CHANGE_BACKGROUND};
pub use pipeline::input::{resolve_image, ImageUpload};
pub use pipeline::measure::{measure_dimensions, Dimensions};
pub use pipeline::stages::{Stage, StageReport};
pub use pipeline::transport::{AiTransport, FormPayload, ImagePart, ReqwestTransport};
pub use process::{process, process_sync, write_atomic, PhotoPipeline};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
