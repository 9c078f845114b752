//! OpenAI Responses API client.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::{VisionClient, VisionRequest, VlmError};
use crate::config::VlmConfig;

/// HTTP client for `POST {api_base}/responses`.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    reasoning_effort: String,
}

impl OpenAiClient {
    /// Build a client from config; the key is read from `config.api_key_env`.
    pub fn new(config: &VlmConfig) -> Result<Self, VlmError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| VlmError::MissingApiKey(config.api_key_env.clone()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| VlmError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            reasoning_effort: config.reasoning_effort.clone(),
        })
    }

    /// Same connection settings, different model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn body(&self, request: &VisionRequest) -> Value {
        let mut content = vec![json!({ "type": "input_text", "text": request.prompt })];
        content.extend(request.images.iter().map(|image| {
            json!({
                "type": "input_image",
                "image_url": image.data_url(),
                "detail": image.detail,
            })
        }));

        json!({
            "model": self.model,
            "input": [
                { "role": "developer", "content": request.system },
                { "role": "user", "content": content },
            ],
            "reasoning": { "effort": self.reasoning_effort },
            "max_output_tokens": request.max_output_tokens,
        })
    }
}

#[async_trait]
impl VisionClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, request), fields(model = %self.model, images = request.images.len()))]
    async fn complete(&self, request: &VisionRequest) -> Result<String, VlmError> {
        let url = format!("{}/responses", self.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| VlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| VlmError::MalformedResponse(e.to_string()))?;

        let text = response_text(&value)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| VlmError::MalformedResponse("empty output text".into()))?;
        debug!(chars = text.len(), "VLM response received");
        Ok(text)
    }
}

/// Output text of a Responses API payload.
///
/// Prefers the top-level `output_text` convenience field and falls back to
/// concatenating every `output_text` content part.
pub fn response_text(value: &Value) -> Option<String> {
    if let Some(text) = value.get("output_text").and_then(Value::as_str) {
        return Some(text.to_string());
    }

    let parts: Vec<&str> = value
        .get("output")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    (!parts.is_empty()).then(|| parts.concat())
}
