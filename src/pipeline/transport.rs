//! HTTP transport: ship one multipart form to the AI service.
//!
//! The [`AiTransport`] trait is the only place the pipeline touches the
//! network. Production code uses [`ReqwestTransport`]; tests inject a
//! recording fake through [`crate::process::PhotoPipeline::with_transport`].
//! A transport makes exactly one attempt per call; retrying is layered on
//! top by [`super::retry::RetryingClient`].

use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Image content of a stage request.
#[derive(Debug, Clone, PartialEq)]
pub enum ImagePart {
    /// Raw upload, sent as a file part.
    File {
        field: &'static str,
        bytes: Vec<u8>,
        filename: String,
        mime_type: String,
    },
    /// Intermediate base64 image, sent as a text part.
    Base64 { field: &'static str, data: String },
}

impl ImagePart {
    pub fn field(&self) -> &'static str {
        match self {
            ImagePart::File { field, .. } | ImagePart::Base64 { field, .. } => *field,
        }
    }
}

/// Everything one stage sends: the image plus whitelisted text fields.
#[derive(Debug, Clone, PartialEq)]
pub struct FormPayload {
    pub image: ImagePart,
    pub fields: Vec<(String, String)>,
}

impl FormPayload {
    /// Value of a text field, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn into_form(self) -> Result<Form, TransportError> {
        let mut form = match self.image {
            ImagePart::File {
                field,
                bytes,
                filename,
                mime_type,
            } => {
                let part = Part::bytes(bytes)
                    .file_name(filename)
                    .mime_str(content_type(&mime_type))
                    .map_err(|e| TransportError::Request(e.to_string()))?;
                Form::new().part(field, part)
            }
            ImagePart::Base64 { field, data } => Form::new().text(field, data),
        };
        for (key, value) in self.fields {
            form = form.text(key, value);
        }
        Ok(form)
    }
}

/// One POST of a multipart form, decoded as JSON.
#[async_trait]
pub trait AiTransport: Send + Sync {
    /// Send `payload` to `url`, giving up after `timeout`.
    ///
    /// Returns the decoded JSON body of a 2xx response. Any other outcome is
    /// a [`TransportError`].
    async fn post_form(
        &self,
        url: &str,
        payload: FormPayload,
        timeout: Duration,
    ) -> Result<Value, TransportError>;
}

/// [`AiTransport`] backed by a pooled `reqwest::Client`.
///
/// The client carries no timeout of its own; each call sets its own, so one
/// transport can serve requests with different policies.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AiTransport for ReqwestTransport {
    async fn post_form(
        &self,
        url: &str,
        payload: FormPayload,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let form = payload.into_form()?;

        let response = self
            .client
            .post(url)
            .multipart(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| classify(e, timeout))?;
        debug!("POST {} → {} ({} bytes)", url, status, body.len());

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate(&body, 512),
            });
        }

        serde_json::from_str(&body).map_err(|e| TransportError::InvalidBody(e.to_string()))
    }
}

/// Map a reqwest failure onto the transport taxonomy.
fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_builder() {
        // Bad URL or header: the same request can never succeed.
        TransportError::Request(err.to_string())
    } else if let Some(status) = err.status() {
        TransportError::Status {
            status: status.as_u16(),
            body: err.to_string(),
        }
    } else if err.is_decode() {
        TransportError::InvalidBody(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

/// The declared MIME type, or `application/octet-stream` if it does not parse.
fn content_type(mime_type: &str) -> &str {
    if Part::text("").mime_str(mime_type).is_ok() {
        mime_type
    } else {
        "application/octet-stream"
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\u{2026}", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_url_is_not_retryable() {
        let payload = FormPayload {
            image: ImagePart::Base64 {
                field: "input_image_base64",
                data: "aGVsbG8=".into(),
            },
            fields: vec![],
        };
        let err = ReqwestTransport::new()
            .post_form("http://bad host:8080/idphoto", payload, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Request(_)), "got {err:?}");
        assert!(!err.kind().is_retryable());
    }

    #[test]
    fn payload_field_lookup() {
        let payload = FormPayload {
            image: ImagePart::Base64 {
                field: "input_image_base64",
                data: "aGVsbG8=".into(),
            },
            fields: vec![("dpi".into(), "300".into()), ("color".into(), "#fff".into())],
        };
        assert_eq!(payload.field("dpi"), Some("300"));
        assert_eq!(payload.field("render"), None);
        assert_eq!(payload.image.field(), "input_image_base64");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        let long = "é".repeat(10);
        let t = truncate(&long, 5);
        assert!(t.ends_with('\u{2026}'));
        assert!(t.len() <= 5 + '\u{2026}'.len_utf8());
    }

    #[test]
    fn unparseable_mime_type_falls_back() {
        assert_eq!(content_type("image/png"), "image/png");
        assert_eq!(content_type("not a mime"), "application/octet-stream");

        let payload = FormPayload {
            image: ImagePart::File {
                field: "input_image",
                bytes: vec![1, 2, 3],
                filename: "a.png".into(),
                mime_type: "not a mime".into(),
            },
            fields: vec![],
        };
        assert!(payload.into_form().is_ok());
    }
}
