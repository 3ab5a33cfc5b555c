//! Pipeline stages for ID photo processing.
//!
//! Each submodule implements exactly one concern, so each can be tested
//! without the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ measure? ──▶ stages ──▶ retry ──▶ transport
//! (upload)  (bg-only)    (forms)    (backoff)  (multipart POST)
//! ```
//!
//! 1. [`input`]    : load the upload from a path, URL or buffer
//! 2. [`measure`]  : read pixel dimensions locally (background-only workflow)
//! 3. [`stages`]   : per-endpoint defaults, field whitelists and response fields
//! 4. [`retry`]    : bounded exponential back-off and the `status: false` check
//! 5. [`transport`]: the single network seam; one attempt per call

pub mod input;
pub mod measure;
pub mod retry;
pub mod stages;
pub mod transport;
