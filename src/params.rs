//! Client-supplied processing options and their normalised form.
//!
//! The upload form sends one JSON object of options. Some keys are named for
//! the UI (`renderMode`, `backgroundColor`), some only steer the UI or the
//! workflow choice (`sizeType`, `presetSize`), and the rest already use the
//! AI service's field names. [`ProcessingParams::normalize`] maps the former
//! onto the service vocabulary; each stage later keeps only the fields it
//! accepts, so nothing here validates or rejects values.

use crate::error::PhotoError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// `sizeType` value that selects the background-only workflow.
pub const ONLY_CHANGE_BACKGROUND: &str = "only change background";

/// Keys that are renamed on the way to the service, `(client, service)`.
const RENAMES: [(&str, &str); 2] = [("renderMode", "render"), ("backgroundColor", "color")];

/// Keys that never leave the backend.
const UI_ONLY: [&str; 2] = ["sizeType", "presetSize"];

/// Options exactly as the client sent them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessingParams(Map<String, Value>);

impl ProcessingParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `params` form field (a JSON object).
    pub fn from_json(raw: &str) -> Result<Self, PhotoError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| PhotoError::InvalidParams(e.to_string()))?;
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(PhotoError::InvalidParams(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Set an option, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// The workflow selected by `sizeType`.
    pub fn workflow(&self) -> Workflow {
        match self.0.get("sizeType") {
            Some(Value::String(s)) if s == ONLY_CHANGE_BACKGROUND => Workflow::BackgroundOnly,
            _ => Workflow::FullCrop,
        }
    }

    /// Rename UI keys to service keys and drop UI-only keys.
    ///
    /// A renamed key replaces any service-named key already present. When the
    /// UI key is absent (or `null`) the service key is left out entirely so the
    /// stage default applies.
    pub fn normalize(&self) -> NormalizedParams {
        let mut out = self.0.clone();

        for (from, to) in RENAMES {
            out.remove(to);
            if let Some(value) = out.remove(from) {
                if !value.is_null() {
                    out.insert(to.to_string(), value);
                }
            }
        }
        for key in UI_ONLY {
            out.remove(key);
        }

        NormalizedParams(out)
    }
}

impl From<Map<String, Value>> for ProcessingParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Options in the AI service's vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedParams(Map<String, Value>);

impl NormalizedParams {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Overwrite `height` / `width` with measured pixel dimensions.
    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        self.0.insert("height".to_string(), Value::from(height));
        self.0.insert("width".to_string(), Value::from(width));
    }

    /// Merge over `defaults` and keep only `accepted` keys, rendered as
    /// multipart text values. `null` values fall back to the default.
    ///
    /// Output order follows `accepted`.
    pub fn form_fields(
        &self,
        defaults: &[(&'static str, DefaultValue)],
        accepted: &[&'static str],
    ) -> Vec<(String, String)> {
        accepted
            .iter()
            .filter_map(|&key| {
                let supplied = self.0.get(key).filter(|v| !v.is_null()).map(form_text);
                let fallback = || {
                    defaults
                        .iter()
                        .find(|(k, _)| *k == key)
                        .map(|(_, v)| v.to_string())
                };
                supplied.or_else(fallback).map(|v| (key.to_string(), v))
            })
            .collect()
    }
}

/// A stage default value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Text(&'static str),
    Int(i64),
    Float(f64),
}

impl fmt::Display for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Text(s) => f.write_str(s),
            DefaultValue::Int(n) => write!(f, "{n}"),
            DefaultValue::Float(x) => write!(f, "{x}"),
        }
    }
}

/// Which sequence of stages a request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    /// Keep the original framing; only swap the background.
    BackgroundOnly,
    /// Detect, crop and resize to the requested ID size, then add background.
    FullCrop,
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Workflow::BackgroundOnly => f.write_str("background-only"),
            Workflow::FullCrop => f.write_str("full-crop"),
        }
    }
}

/// Render a JSON value the way a multipart text field carries it.
fn form_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
