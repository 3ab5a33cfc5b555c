//! Error types for the idphoto-pipeline library.
//!
//! Two distinct error types reflect two distinct layers:
//!
//! * [`TransportError`] covers **one failed HTTP attempt**: the connection broke,
//!   the request timed out, the service answered with a non-2xx status, or
//!   the body was not JSON. The retrying client inspects its
//!   [`FailureKind`] to decide whether another attempt is allowed.
//!
//! * [`PhotoError`] is **fatal for the whole request**, returned as
//!   `Err(PhotoError)` from [`crate::process::process`] and friends. A
//!   transport failure that survives the retry budget is wrapped in
//!   [`PhotoError::Transport`] with the original [`TransportError`] kept as
//!   its source.
//!
//! An AI service that answers `200 OK` with `"status": false` is neither a
//! transport failure nor a success; it surfaces as
//! [`PhotoError::ServiceDeclined`] so callers can tell "the service said no"
//! apart from "the network failed".

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the idphoto-pipeline library.
#[derive(Debug, Error)]
pub enum PhotoError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// A stage that uploads the raw image was given an empty buffer.
    #[error("No image buffer provided to the {stage} stage")]
    MissingImage { stage: &'static str },

    /// Input image was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The image bytes could not be decoded far enough to read dimensions.
    #[error("Could not read image dimensions: {detail}")]
    ImageDecode { detail: String },

    /// Client-supplied parameters were not a JSON object.
    #[error("Invalid processing parameters: {0}")]
    InvalidParams(String),

    // ── AI service errors ─────────────────────────────────────────────────
    /// The request failed at the transport level after all retries.
    #[error("Request to '{endpoint}' failed after {attempts} attempt(s): {source}")]
    Transport {
        endpoint: &'static str,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The service answered but reported `"status": false`.
    #[error("AI service declined the '{endpoint}' request")]
    ServiceDeclined { endpoint: &'static str },

    /// The service answered with a body missing the expected field.
    #[error("AI service response from '{endpoint}' is missing '{field}'")]
    InvalidResponse {
        endpoint: &'static str,
        field: &'static str,
    },

    /// The final result image could not be base64-decoded.
    #[error("Result image is not valid base64: {detail}")]
    ResultDecode { detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output image.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PhotoError {
    /// True when the request never got a usable answer from the service.
    pub fn is_transport(&self) -> bool {
        matches!(self, PhotoError::Transport { .. })
    }

    /// True when the service answered and explicitly refused the request.
    pub fn is_declined(&self) -> bool {
        matches!(self, PhotoError::ServiceDeclined { .. })
    }
}

/// A single failed HTTP attempt against the AI service.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection refused, reset, DNS failure; no response arrived.
    #[error("network error: {0}")]
    Network(String),

    /// No complete response within the per-request timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The service responded with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// A 2xx response whose body is not JSON.
    #[error("invalid response body: {0}")]
    InvalidBody(String),

    /// The request could not be assembled locally.
    #[error("could not build request: {0}")]
    Request(String),
}

impl TransportError {
    /// Classify this failure once, for the retry predicate and for logs.
    pub fn kind(&self) -> FailureKind {
        match self {
            TransportError::Network(_) => FailureKind::Network,
            TransportError::Timeout(_) => FailureKind::Timeout,
            TransportError::Status { .. } => FailureKind::HttpStatus,
            TransportError::InvalidBody(_) | TransportError::Request(_) => FailureKind::Malformed,
        }
    }
}

/// Closed classification of a failed attempt.
///
/// Every call to the AI service is a multipart `POST`, which is never
/// idempotent, so an error status never qualifies as an idempotent-request
/// retry; only [`FailureKind::Network`] and [`FailureKind::Timeout`] do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    Timeout,
    HttpStatus,
    Malformed,
}

impl FailureKind {
    /// Whether another attempt may be made after a failure of this kind.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Network | FailureKind::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_image_names_stage() {
        let e = PhotoError::MissingImage { stage: "matting" };
        assert!(e.to_string().contains("matting"), "got: {e}");
        assert!(e.to_string().contains("No image buffer"));
    }

    #[test]
    fn transport_display_keeps_source() {
        let e = PhotoError::Transport {
            endpoint: "idphoto",
            attempts: 3,
            source: TransportError::Timeout(Duration::from_secs(60)),
        };
        let msg = e.to_string();
        assert!(msg.contains("3 attempt"), "got: {msg}");
        assert!(msg.contains("timed out"), "got: {msg}");
        assert!(e.is_transport());
        assert!(!e.is_declined());
    }

    #[test]
    fn declined_is_not_transport() {
        let e = PhotoError::ServiceDeclined {
            endpoint: "add_background",
        };
        assert!(e.is_declined());
        assert!(!e.is_transport());
    }

    #[test]
    fn only_network_and_timeout_are_retryable() {
        assert!(TransportError::Network("reset".into()).kind().is_retryable());
        assert!(TransportError::Timeout(Duration::from_secs(1))
            .kind()
            .is_retryable());
        assert!(!TransportError::Status {
            status: 503,
            body: "busy".into()
        }
        .kind()
        .is_retryable());
        assert!(!TransportError::InvalidBody("<html>".into())
            .kind()
            .is_retryable());
    }
}
