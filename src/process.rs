//! Request-level entry points: run one upload through its workflow.
//!
//! ```text
//! params ──▶ normalize ──▶ workflow?
//!                           ├─ BackgroundOnly: measure ─▶ human_matting ─▶ add_background
//!                           └─ FullCrop:                  idphoto       ─▶ add_background
//! ```
//!
//! Both workflows are strictly sequential: the second stage consumes the
//! first stage's image, so nothing can overlap. The first error aborts the
//! request; no stage writes durable state, so there is nothing to undo.

use crate::config::ServiceConfig;
use crate::error::PhotoError;
use crate::output::{ProcessingOutput, ProcessingStats};
use crate::params::{ProcessingParams, Workflow};
use crate::pipeline::input::ImageUpload;
use crate::pipeline::measure::measure_dimensions;
use crate::pipeline::stages::{Stage, StageContext};
use crate::pipeline::transport::{AiTransport, ReqwestTransport};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// A configured pipeline: transport plus service settings.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct PhotoPipeline {
    transport: Arc<dyn AiTransport>,
    config: ServiceConfig,
}

impl std::fmt::Debug for PhotoPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoPipeline")
            .field("transport", &"<dyn AiTransport>")
            .field("config", &self.config)
            .finish()
    }
}

impl PhotoPipeline {
    /// Pipeline talking HTTP through reqwest.
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_transport(Arc::new(ReqwestTransport::new()), config)
    }

    /// Pipeline using a caller-supplied transport.
    pub fn with_transport(transport: Arc<dyn AiTransport>, config: ServiceConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Run `image` through the workflow its `params` select.
    pub async fn process(
        &self,
        image: &ImageUpload,
        params: &ProcessingParams,
    ) -> Result<ProcessingOutput, PhotoError> {
        let total_start = Instant::now();
        let workflow = params.workflow();
        let mut normalized = params.normalize();
        let ctx = StageContext::new(self.transport.as_ref(), &self.config);
        let mut stats = ProcessingStats::default();

        info!(
            "Processing '{}' ({} bytes) with {} workflow",
            image.filename,
            image.len(),
            workflow
        );

        let foreground = match workflow {
            Workflow::BackgroundOnly => {
                if image.is_empty() {
                    return Err(PhotoError::MissingImage {
                        stage: Stage::HumanMatting.endpoint(),
                    });
                }
                let measure_start = Instant::now();
                let dims = measure_dimensions(&image.bytes)?;
                normalized.set_dimensions(dims.width, dims.height);
                stats.measured = Some(dims);
                stats.measure_duration_ms = measure_start.elapsed().as_millis() as u64;

                info!("Getting image without background...");
                ctx.human_matting(image, &normalized).await?
            }
            Workflow::FullCrop => {
                info!("Getting cropped image without background...");
                ctx.id_photo(image, &normalized).await?
            }
        };
        stats.stages.push(foreground.report);

        info!("Adding background...");
        let composed = ctx.add_background(foreground.value, &normalized).await?;
        stats.stages.push(composed.report);
        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        info!(
            "Photo processed in {}ms ({} attempt(s) across {} stage(s))",
            stats.total_duration_ms,
            stats.total_attempts(),
            stats.stages.len()
        );

        Ok(ProcessingOutput {
            result: composed.value,
            workflow,
            stats,
        })
    }

    /// Process and write the decoded result image to `output_path`.
    ///
    /// Uses atomic write (temp file + rename) to prevent partial files.
    pub async fn process_to_file(
        &self,
        image: &ImageUpload,
        params: &ProcessingParams,
        output_path: impl AsRef<Path>,
    ) -> Result<ProcessingOutput, PhotoError> {
        let output = self.process(image, params).await?;
        let bytes = output.result.decode_image()?;
        write_atomic(output_path.as_ref(), &bytes).await?;
        Ok(output)
    }
}

/// Process one upload with a fresh reqwest-backed pipeline.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// The first failing stage aborts the request:
/// - [`PhotoError::MissingImage`]: empty buffer, no network call made
/// - [`PhotoError::Transport`]: network failure or timeout after retries,
///   or an HTTP error status
/// - [`PhotoError::ServiceDeclined`]: the service answered `status: false`
pub async fn process(
    image: &ImageUpload,
    params: &ProcessingParams,
    config: &ServiceConfig,
) -> Result<ProcessingOutput, PhotoError> {
    PhotoPipeline::new(config.clone()).process(image, params).await
}

/// Synchronous wrapper around [`process`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync(
    image: &ImageUpload,
    params: &ProcessingParams,
    config: &ServiceConfig,
) -> Result<ProcessingOutput, PhotoError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PhotoError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process(image, params, config))
}

/// Write `bytes` to a sibling `.tmp` file and rename it over `path`.
///
/// Parent directories are created as needed. Readers of `path` never see a
/// partially written file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PhotoError> {
    let fail = |source| PhotoError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(fail)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(fail)?;
    Ok(())
}
