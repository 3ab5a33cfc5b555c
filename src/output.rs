//! Result types returned by the pipeline.

use crate::error::PhotoError;
use crate::params::Workflow;
use crate::pipeline::measure::Dimensions;
use crate::pipeline::stages::{Stage, StageReport};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

static DATA_URI_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:image/\w+;base64,").expect("valid regex"));

/// The add-background response: composed image(s) plus whatever metadata
/// the service echoed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<bool>,

    /// Standard-resolution composed image, base64 (often a data URI).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,

    /// High-resolution composed image, when the service produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64_hd: Option<String>,

    /// Every other field of the response, untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProcessingResult {
    /// Parse a stage response body; it must carry an image.
    pub(crate) fn from_body(stage: Stage, body: Value) -> Result<Self, PhotoError> {
        let result: Self =
            serde_json::from_value(body).map_err(|_| PhotoError::InvalidResponse {
                endpoint: stage.endpoint(),
                field: stage.success_field(),
            })?;
        if result.image_base64.is_none() && result.image_base64_hd.is_none() {
            return Err(PhotoError::InvalidResponse {
                endpoint: stage.endpoint(),
                field: stage.success_field(),
            });
        }
        Ok(result)
    }

    /// Decode the composed image to raw bytes.
    ///
    /// Prefers `image_base64`, falls back to `image_base64_hd`, and strips a
    /// leading `data:image/<type>;base64,` prefix.
    pub fn decode_image(&self) -> Result<Vec<u8>, PhotoError> {
        let encoded = self
            .image_base64
            .as_deref()
            .or(self.image_base64_hd.as_deref())
            .ok_or_else(|| PhotoError::ResultDecode {
                detail: "result carries no image".into(),
            })?;
        decode_base64_image(encoded)
    }
}

/// Decode a base64 image string, with or without a data-URI prefix.
pub fn decode_base64_image(encoded: &str) -> Result<Vec<u8>, PhotoError> {
    let payload = DATA_URI_PREFIX.replace(encoded.trim(), "");
    STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| PhotoError::ResultDecode {
            detail: e.to_string(),
        })
}

/// Statistics for a single processed request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    /// One entry per completed stage, in call order.
    pub stages: Vec<StageReport>,
    /// Pixel size measured locally; only the background-only workflow
    /// measures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measured: Option<Dimensions>,
    /// Time spent measuring the upload locally.
    pub measure_duration_ms: u64,
    /// Wall-clock time for the whole request.
    pub total_duration_ms: u64,
}

impl ProcessingStats {
    /// Attempts summed over all stages.
    pub fn total_attempts(&self) -> u32 {
        self.stages.iter().map(|s| s.attempts).sum()
    }
}

/// Everything [`crate::process::process`] returns on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOutput {
    /// The add-background response.
    pub result: ProcessingResult,
    /// Which workflow produced it.
    pub workflow: Workflow,
    pub stats: ProcessingStats,
}
