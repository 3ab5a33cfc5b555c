//! The three AI service stages and the forms they send.
//!
//! | Stage | Endpoint | Image field | Returns |
//! |-------|----------|-------------|---------|
//! | [`Stage::HumanMatting`]  | `/human_matting`  | `input_image` (file)        | `image_base64` |
//! | [`Stage::IdPhoto`]       | `/idphoto`        | `input_image` (file)        | `image_base64_hd` |
//! | [`Stage::AddBackground`] | `/add_background` | `input_image_base64` (text) | full result |
//!
//! Each stage merges the caller's normalised options over its own defaults
//! and forwards only the fields it lists as accepted. Anything else in the
//! options, including keys the service might understand on another endpoint,
//! is silently left out of that request.

use crate::config::ServiceConfig;
use crate::error::PhotoError;
use crate::output::ProcessingResult;
use crate::params::{DefaultValue, NormalizedParams};
use crate::pipeline::input::ImageUpload;
use crate::pipeline::retry::RetryingClient;
use crate::pipeline::transport::{AiTransport, FormPayload, ImagePart};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info};

/// Matting model used when the client does not choose one.
pub const DEFAULT_MATTING_MODEL: &str = "modnet_photographic_portrait_matting";

const MATTING_DEFAULTS: &[(&str, DefaultValue)] = &[
    ("human_matting_model", DefaultValue::Text(DEFAULT_MATTING_MODEL)),
    ("dpi", DefaultValue::Int(300)),
];
const MATTING_FIELDS: &[&str] = &["human_matting_model"];

const IDPHOTO_DEFAULTS: &[(&str, DefaultValue)] = &[
    ("head_measure_ratio", DefaultValue::Float(0.2)),
    ("head_height_ratio", DefaultValue::Float(0.45)),
    ("top_distance_max", DefaultValue::Float(0.12)),
    ("top_distance_min", DefaultValue::Float(0.1)),
    ("height", DefaultValue::Int(413)),
    ("width", DefaultValue::Int(295)),
    ("human_matting_model", DefaultValue::Text(DEFAULT_MATTING_MODEL)),
    ("face_detect_model", DefaultValue::Text("mtcnn")),
    ("hd", DefaultValue::Text("true")),
    ("dpi", DefaultValue::Int(300)),
];
const IDPHOTO_FIELDS: &[&str] = &[
    "height",
    "width",
    "human_matting_model",
    "face_detect_model",
    "hd",
    "dpi",
    "head_measure_ratio",
    "head_height_ratio",
    "top_distance_max",
    "top_distance_min",
];

const BACKGROUND_DEFAULTS: &[(&str, DefaultValue)] = &[("dpi", DefaultValue::Int(300))];
const BACKGROUND_FIELDS: &[&str] = &["color", "dpi", "render"];

/// One network call of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Background removal only.
    HumanMatting,
    /// Face detection, crop, resize and matting in one call.
    IdPhoto,
    /// Solid or gradient background behind a foreground-only image.
    AddBackground,
}

impl Stage {
    /// Endpoint path segment on the AI service.
    pub fn endpoint(self) -> &'static str {
        match self {
            Stage::HumanMatting => "human_matting",
            Stage::IdPhoto => "idphoto",
            Stage::AddBackground => "add_background",
        }
    }

    /// Values used for accepted fields the caller did not supply.
    pub fn defaults(self) -> &'static [(&'static str, DefaultValue)] {
        match self {
            Stage::HumanMatting => MATTING_DEFAULTS,
            Stage::IdPhoto => IDPHOTO_DEFAULTS,
            Stage::AddBackground => BACKGROUND_DEFAULTS,
        }
    }

    /// The only text fields this stage forwards.
    pub fn accepted_fields(self) -> &'static [&'static str] {
        match self {
            Stage::HumanMatting => MATTING_FIELDS,
            Stage::IdPhoto => IDPHOTO_FIELDS,
            Stage::AddBackground => BACKGROUND_FIELDS,
        }
    }

    /// Response field holding this stage's output image.
    pub fn success_field(self) -> &'static str {
        match self {
            Stage::HumanMatting => "image_base64",
            Stage::IdPhoto => "image_base64_hd",
            Stage::AddBackground => "image_base64",
        }
    }

    fn image_field(self) -> &'static str {
        match self {
            Stage::HumanMatting | Stage::IdPhoto => "input_image",
            Stage::AddBackground => "input_image_base64",
        }
    }

    /// Assemble the form for an upload stage.
    ///
    /// Fails with [`PhotoError::MissingImage`] on an empty buffer.
    pub fn upload_form(
        self,
        image: &ImageUpload,
        params: &NormalizedParams,
    ) -> Result<FormPayload, PhotoError> {
        if image.is_empty() {
            return Err(PhotoError::MissingImage {
                stage: self.endpoint(),
            });
        }
        Ok(FormPayload {
            image: ImagePart::File {
                field: self.image_field(),
                bytes: image.bytes.clone(),
                filename: image.filename.clone(),
                mime_type: image.mime_type.clone(),
            },
            fields: params.form_fields(self.defaults(), self.accepted_fields()),
        })
    }

    /// Assemble the form for a stage fed by an intermediate base64 image.
    pub fn base64_form(self, image_base64: String, params: &NormalizedParams) -> FormPayload {
        FormPayload {
            image: ImagePart::Base64 {
                field: self.image_field(),
                data: image_base64,
            },
            fields: params.form_fields(self.defaults(), self.accepted_fields()),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}

/// Timing and retry figures for one completed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Output of a stage call plus its report.
#[derive(Debug, Clone)]
pub struct StageOutput<T> {
    pub value: T,
    pub report: StageReport,
}

/// Everything a stage call needs besides its inputs.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub transport: &'a dyn AiTransport,
    pub config: &'a ServiceConfig,
}

impl<'a> StageContext<'a> {
    pub fn new(transport: &'a dyn AiTransport, config: &'a ServiceConfig) -> Self {
        Self { transport, config }
    }

    /// Remove the background, returning the foreground as base64.
    pub async fn human_matting(
        &self,
        image: &ImageUpload,
        params: &NormalizedParams,
    ) -> Result<StageOutput<String>, PhotoError> {
        let stage = Stage::HumanMatting;
        let result = match stage.upload_form(image, params) {
            Ok(form) => self.send(stage, form).await,
            Err(e) => Err(e),
        };
        let result = result.and_then(|(body, report)| {
            take_string(stage, body).map(|value| StageOutput { value, report })
        });
        self.finish(stage, result)
    }

    /// Detect, crop, resize and matte in one call, returning the HD
    /// foreground as base64.
    pub async fn id_photo(
        &self,
        image: &ImageUpload,
        params: &NormalizedParams,
    ) -> Result<StageOutput<String>, PhotoError> {
        let stage = Stage::IdPhoto;
        let result = match stage.upload_form(image, params) {
            Ok(form) => self.send(stage, form).await,
            Err(e) => Err(e),
        };
        let result = result.and_then(|(body, report)| {
            take_string(stage, body).map(|value| StageOutput { value, report })
        });
        self.finish(stage, result)
    }

    /// Compose a background behind a foreground-only base64 image.
    pub async fn add_background(
        &self,
        image_base64: String,
        params: &NormalizedParams,
    ) -> Result<StageOutput<ProcessingResult>, PhotoError> {
        let stage = Stage::AddBackground;
        let form = stage.base64_form(image_base64, params);
        let result = self.send(stage, form).await.and_then(|(body, report)| {
            ProcessingResult::from_body(stage, body).map(|value| StageOutput { value, report })
        });
        self.finish(stage, result)
    }

    async fn send(
        &self,
        stage: Stage,
        form: FormPayload,
    ) -> Result<(Value, StageReport), PhotoError> {
        let start = Instant::now();
        let url = self.config.endpoint_url(stage.endpoint());
        debug!(
            "{}: sending {} field(s): {:?}",
            stage,
            form.fields.len(),
            form.fields.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>()
        );
        if let Some(cb) = &self.config.progress_callback {
            cb.on_stage_start(stage);
        }

        let reply = RetryingClient::new(self.transport, self.config.retry_policy())
            .with_progress(self.config.progress_callback.as_ref())
            .post(stage, &url, &form)
            .await?;

        let report = StageReport {
            stage,
            attempts: reply.attempts,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        Ok((reply.body, report))
    }

    /// Log the outcome and notify the progress callback.
    fn finish<T>(
        &self,
        stage: Stage,
        result: Result<StageOutput<T>, PhotoError>,
    ) -> Result<StageOutput<T>, PhotoError> {
        let cb = self.config.progress_callback.as_ref();
        match &result {
            Ok(out) => {
                info!(
                    "{}: done in {}ms ({} attempt(s))",
                    stage, out.report.duration_ms, out.report.attempts
                );
                if let Some(cb) = cb {
                    cb.on_stage_complete(stage, out.report.attempts, out.report.duration_ms);
                }
            }
            Err(e) => {
                error!("{}: {}", stage, e);
                if let Some(cb) = cb {
                    cb.on_stage_error(stage, &e.to_string());
                }
            }
        }
        result
    }
}

/// Pull the stage's success field out of a response body.
fn take_string(stage: Stage, mut body: Value) -> Result<String, PhotoError> {
    match body.get_mut(stage.success_field()).map(Value::take) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(PhotoError::InvalidResponse {
            endpoint: stage.endpoint(),
            field: stage.success_field(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ProcessingParams;
    use serde_json::json;

    fn upload() -> ImageUpload {
        ImageUpload::new(vec![0x89, b'P', b'N', b'G'], "image/png", "me.png")
    }

    #[test]
    fn matting_form_sends_only_model() {
        let params = ProcessingParams::new()
            .with("dpi", 600)
            .with("width", 295)
            .with("backgroundColor", "#fff")
            .normalize();
        let form = Stage::HumanMatting.upload_form(&upload(), &params).unwrap();

        assert_eq!(
            form.fields,
            vec![(
                "human_matting_model".to_string(),
                DEFAULT_MATTING_MODEL.to_string()
            )]
        );
        match form.image {
            ImagePart::File {
                field,
                filename,
                mime_type,
                ..
            } => {
                assert_eq!(field, "input_image");
                assert_eq!(filename, "me.png");
                assert_eq!(mime_type, "image/png");
            }
            other => panic!("expected file part, got {other:?}"),
        }
    }

    #[test]
    fn idphoto_form_applies_defaults_and_overrides() {
        let params = ProcessingParams::new()
            .with("width", 358)
            .with("height", 441)
            .with("face_detect_model", "retinaface-resnet50")
            .with("renderMode", 1)
            .with("user_id", "abc")
            .normalize();
        let form = Stage::IdPhoto.upload_form(&upload(), &params).unwrap();

        assert_eq!(form.fields.len(), IDPHOTO_FIELDS.len());
        assert_eq!(form.field("width"), Some("358"));
        assert_eq!(form.field("height"), Some("441"));
        assert_eq!(form.field("face_detect_model"), Some("retinaface-resnet50"));
        assert_eq!(form.field("hd"), Some("true"));
        assert_eq!(form.field("dpi"), Some("300"));
        assert_eq!(form.field("head_measure_ratio"), Some("0.2"));
        assert_eq!(form.field("head_height_ratio"), Some("0.45"));
        assert_eq!(form.field("top_distance_max"), Some("0.12"));
        assert_eq!(form.field("top_distance_min"), Some("0.1"));
        assert_eq!(form.field("render"), None);
        assert_eq!(form.field("user_id"), None);
    }

    #[test]
    fn background_form_carries_base64_and_render_options() {
        let params = ProcessingParams::new()
            .with("renderMode", 2)
            .with("backgroundColor", "#438edb")
            .with("human_matting_model", "birefnet-v1-lite")
            .normalize();
        let form = Stage::AddBackground.base64_form("Zm9v".into(), &params);

        assert_eq!(
            form.image,
            ImagePart::Base64 {
                field: "input_image_base64",
                data: "Zm9v".into()
            }
        );
        assert_eq!(form.field("color"), Some("#438edb"));
        assert_eq!(form.field("render"), Some("2"));
        assert_eq!(form.field("dpi"), Some("300"));
        assert_eq!(form.field("human_matting_model"), None);
    }

    #[test]
    fn empty_buffer_is_rejected() {
        let empty = ImageUpload::new(Vec::new(), "image/png", "empty.png");
        let params = ProcessingParams::new().normalize();
        for stage in [Stage::HumanMatting, Stage::IdPhoto] {
            let err = stage.upload_form(&empty, &params).unwrap_err();
            assert!(matches!(err, PhotoError::MissingImage { .. }), "{stage}: {err:?}");
        }
    }

    #[test]
    fn take_string_requires_success_field() {
        let ok = take_string(Stage::IdPhoto, json!({"status": true, "image_base64_hd": "abc"}));
        assert_eq!(ok.unwrap(), "abc");

        let missing = take_string(Stage::IdPhoto, json!({"status": true, "image_base64": "abc"}));
        assert!(matches!(
            missing,
            Err(PhotoError::InvalidResponse {
                field: "image_base64_hd",
                ..
            })
        ));
    }

    #[test]
    fn stage_display_is_endpoint() {
        assert_eq!(Stage::HumanMatting.to_string(), "human_matting");
        assert_eq!(Stage::IdPhoto.to_string(), "idphoto");
        assert_eq!(Stage::AddBackground.to_string(), "add_background");
    }
}
