//! Validation System - Rule/Policy Separation
//!
//! Rules produce structured violations about an upload.
//! Policy: any `Error` violation rejects the upload, warnings are recorded.

use base64::Engine;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::LimitsConfig;
use crate::templates::FileType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ValidationViolation>,
}

impl ValidationResult {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationViolation> {
        self.violations.iter().filter(|v| v.severity == ViolationSeverity::Error)
    }

    pub fn summary(&self) -> String {
        self.errors()
            .map(|v| format!("{}: {}", v.rule, v.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// What the upload is for decides which file types are acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPurpose {
    /// Vector asset placed as a layer, must be SVG.
    VectorAsset,
    /// Background artwork for one view, SVG or raster.
    TemplateView,
}

#[derive(Debug, Clone, Copy)]
pub struct UploadInput<'a> {
    pub filename: &'a str,
    pub bytes: &'a [u8],
    pub purpose: UploadPurpose,
}

/// Validation rule trait - produces violations
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, input: &UploadInput<'_>) -> Vec<ValidationViolation>;
}

// --- Concrete Rules ---

pub struct FileTypeRule;

impl ValidationRule for FileTypeRule {
    fn name(&self) -> &'static str { "file_type" }

    fn validate(&self, input: &UploadInput<'_>) -> Vec<ValidationViolation> {
        let file_type = FileType::from_filename(input.filename);
        let accepted = match (input.purpose, file_type) {
            (UploadPurpose::VectorAsset, Some(FileType::Svg)) => true,
            (UploadPurpose::TemplateView, Some(_)) => true,
            _ => false,
        };
        if accepted {
            return vec![];
        }
        let expected = match input.purpose {
            UploadPurpose::VectorAsset => "svg",
            UploadPurpose::TemplateView => "svg, png, jpg, jpeg, webp or gif",
        };
        vec![ValidationViolation {
            rule: self.name().to_string(),
            severity: ViolationSeverity::Error,
            message: "Unsupported file type".to_string(),
            expected: Some(expected.to_string()),
            actual: Some(input.filename.to_string()),
        }]
    }
}

pub struct UploadSizeRule {
    pub max_bytes: usize,
}

impl ValidationRule for UploadSizeRule {
    fn name(&self) -> &'static str { "upload_size" }

    fn validate(&self, input: &UploadInput<'_>) -> Vec<ValidationViolation> {
        let size = input.bytes.len();
        let message = if size == 0 {
            "Upload is empty"
        } else if size > self.max_bytes {
            "Upload too large"
        } else {
            return vec![];
        };
        vec![ValidationViolation {
            rule: self.name().to_string(),
            severity: ViolationSeverity::Error,
            message: message.to_string(),
            expected: Some(format!("1..={} bytes", self.max_bytes)),
            actual: Some(format!("{} bytes", size)),
        }]
    }
}

/// Warns when an `.svg` upload does not look like markup. The sanitizer
/// still decides what to do with it.
pub struct ContentSniffRule;

impl ValidationRule for ContentSniffRule {
    fn name(&self) -> &'static str { "content_sniff" }

    fn validate(&self, input: &UploadInput<'_>) -> Vec<ValidationViolation> {
        if FileType::from_filename(input.filename) != Some(FileType::Svg) {
            return vec![];
        }
        let head = String::from_utf8_lossy(&input.bytes[..input.bytes.len().min(512)]);
        let head = head.trim_start_matches('\u{feff}').trim_start();
        if head.is_empty() || head.starts_with('<') {
            return vec![];
        }
        vec![ValidationViolation {
            rule: self.name().to_string(),
            severity: ViolationSeverity::Warning,
            message: "Content does not look like SVG markup".to_string(),
            expected: Some("<svg ...>".to_string()),
            actual: Some(head.chars().take(16).collect()),
        }]
    }
}

/// Validator orchestrates rules and applies policy
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            rules: vec![
                Box::new(FileTypeRule),
                Box::new(UploadSizeRule { max_bytes: limits.max_upload_bytes }),
                Box::new(ContentSniffRule),
            ],
        }
    }

    pub fn validate(&self, input: &UploadInput<'_>) -> ValidationResult {
        let violations: Vec<_> = self.rules.iter().flat_map(|rule| rule.validate(input)).collect();
        let valid = !violations.iter().any(|v| v.severity == ViolationSeverity::Error);
        ValidationResult { valid, violations }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(&LimitsConfig::default())
    }
}

const DATA_IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// Check the `src` of an image layer: an http(s) URL, a relative path, or a
/// base64 raster data URI that actually decodes.
pub fn validate_image_source(src: &str) -> Result<(), String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty image source".to_string());
    }

    let data = src
        .get(..5)
        .filter(|scheme| scheme.eq_ignore_ascii_case("data:"))
        .and_then(|_| src.get(5..));
    if let Some(data) = data {
        let (header, payload) = data
            .split_once(',')
            .ok_or_else(|| "data uri without payload".to_string())?;
        let header = header.to_ascii_lowercase();
        let media = header
            .strip_suffix(";base64")
            .ok_or_else(|| "data uri must be base64 encoded".to_string())?;
        if !DATA_IMAGE_TYPES.contains(&media) {
            return Err(format!("unsupported data uri type: {media}"));
        }
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| format!("invalid base64 payload: {e}"))?;
        if decoded.is_empty() {
            return Err("empty data uri payload".to_string());
        }
        return Ok(());
    }

    match Url::parse(src) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(format!("unsupported scheme: {}", url.scheme())),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            if src.starts_with("//") || src.split('/').any(|seg| seg == "..") {
                Err(format!("unsafe relative path: {src}"))
            } else {
                Ok(())
            }
        }
        Err(e) => Err(format!("invalid url: {e}")),
    }
}
