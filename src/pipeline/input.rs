//! Input resolution: turn a path, URL or in-memory buffer into an
//! [`ImageUpload`].
//!
//! The AI service wants the original bytes plus the filename and content type
//! the client declared, exactly as a multipart upload carries them. Local
//! files and downloads get their content type sniffed from the magic bytes,
//! falling back to the file extension.

use crate::error::PhotoError;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// The uploaded image: raw bytes plus the metadata the upload declared.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
}

impl std::fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageUpload")
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("mime_type", &self.mime_type)
            .field("filename", &self.filename)
            .finish()
    }
}

impl ImageUpload {
    pub fn new(
        bytes: impl Into<Vec<u8>>,
        mime_type: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
            filename: filename.into(),
        }
    }

    /// Build an upload from bytes, sniffing the content type.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, filename: impl Into<String>) -> Self {
        let bytes = bytes.into();
        let filename = filename.into();
        let mime_type = sniff_mime(&bytes, &filename);
        Self {
            bytes,
            mime_type,
            filename,
        }
    }

    /// Read a local file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PhotoError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => PhotoError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => PhotoError::FileNotFound {
                path: path.to_path_buf(),
            },
        })?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        debug!("Read local image: {} ({} bytes)", path.display(), bytes.len());
        Ok(Self::from_bytes(bytes, filename))
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a local path or HTTP(S) URL into an upload.
pub async fn resolve_image(input: &str, timeout_secs: u64) -> Result<ImageUpload, PhotoError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        let path = PathBuf::from(input);
        tokio::task::spawn_blocking(move || ImageUpload::from_path(path))
            .await
            .map_err(|e| PhotoError::Internal(format!("read task failed: {e}")))?
    }
}

/// Download a remote image into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ImageUpload, PhotoError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PhotoError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PhotoError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            PhotoError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(PhotoError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let declared = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|ct| ct.starts_with("image/"))
        .map(str::to_string);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PhotoError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let filename = filename_from_url(url);
    let mut upload = ImageUpload::from_bytes(bytes.to_vec(), filename);
    if let Some(ct) = declared {
        upload.mime_type = ct;
    }
    info!("Downloaded {} bytes ({})", upload.len(), upload.mime_type);
    Ok(upload)
}

/// Last path segment of a URL, or `download` when there is none.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() {
                    return last.to_string();
                }
            }
        }
    }
    "download".to_string()
}

/// Content type from magic bytes, then extension, then octet-stream.
fn sniff_mime(bytes: &[u8], filename: &str) -> String {
    image::guess_format(bytes)
        .ok()
        .or_else(|| ImageFormat::from_path(filename).ok())
        .map(|f| f.to_mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}
