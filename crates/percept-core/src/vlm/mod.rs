//! Vision-language model integration: request types, the client seam,
//! bounded retry, response parsing and the concurrent per-view scorer.

mod judgement;
mod openai;
mod retry;
mod scorer;

use std::path::Path;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use thiserror::Error;

pub use judgement::{
    extract_json_object, DefectFinding, Subscores, VlmJudgement, MAX_SCORE, MIN_SCORE, NEUTRAL_SCORE,
};
pub use openai::{response_text, OpenAiClient};
pub use retry::{call_with_retry, RetryPolicy};
pub use scorer::{ScorerSettings, ViewScore, VlmReport, VlmScorer};

/// Errors from a single VLM call.
#[derive(Debug, Error)]
pub enum VlmError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("failed to read image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("missing API key in ${0}")]
    MissingApiKey(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<VlmError> },
}

impl VlmError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::MalformedResponse(_) => true,
            Self::Status { status, .. } => matches!(status, 408 | 409 | 429) || *status >= 500,
            Self::Image { .. } | Self::MissingApiKey(_) | Self::Exhausted { .. } => false,
        }
    }
}

/// A base64 image attached to a request.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub mime_type: &'static str,
    pub data: String,
    /// Provider detail hint ("low" / "high")
    pub detail: String,
}

impl EncodedImage {
    pub fn from_bytes(bytes: &[u8], mime_type: &'static str, detail: &str) -> Self {
        Self {
            mime_type,
            data: general_purpose::STANDARD.encode(bytes),
            detail: detail.to_string(),
        }
    }

    /// Read and encode an image file; the file handle is closed on return.
    pub fn from_path(path: &Path, detail: &str) -> Result<Self, VlmError> {
        let bytes = std::fs::read(path).map_err(|source| VlmError::Image {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_bytes(&bytes, mime_for(path), detail))
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// One request: a fixed instruction, a prompt, images and an output bound.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub system: String,
    pub prompt: String,
    pub images: Vec<EncodedImage>,
    pub max_output_tokens: u32,
}

/// A remote vision-language model.
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Model identifier reported in results.
    fn model(&self) -> &str;

    /// Send one request and return the model's text output.
    async fn complete(&self, request: &VisionRequest) -> Result<String, VlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability() {
        assert!(VlmError::Transport("reset".into()).is_retryable());
        assert!(VlmError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(VlmError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(!VlmError::Status { status: 401, body: String::new() }.is_retryable());
        assert!(!VlmError::MissingApiKey("OPENAI_API_KEY".into()).is_retryable());
    }

    #[test]
    fn data_url_uses_extension_mime() {
        let img = EncodedImage::from_bytes(b"abc", mime_for(Path::new("v.PNG")), "high");
        assert_eq!(img.data_url(), "data:image/png;base64,YWJj");
        assert_eq!(mime_for(Path::new("v.jpeg")), "image/jpeg");
    }

    #[test]
    fn unreadable_image_is_an_image_error() {
        let err = EncodedImage::from_path(Path::new("/nonexistent/view.png"), "high").unwrap_err();
        assert!(matches!(err, VlmError::Image { .. }));
        assert!(!err.is_retryable());
    }
}
