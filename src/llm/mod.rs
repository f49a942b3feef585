use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::LlmConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model returned a malformed payload: {0}")]
    Malformed(String),
}

/// Options for a single completion call. `structured` asks the provider for
/// a JSON object response. `timeout: None` leaves the call unbounded (used
/// for repair calls, which are capped by attempt count instead).
#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub structured: bool,
    pub temperature: f32,
    pub timeout: Option<Duration>,
}

#[async_trait]
pub trait DecisionModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<String, ModelError>;
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl DecisionModel for OpenAiCompatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<String, ModelError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature,
        });
        if options.structured {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body);
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;

        if !status.is_success() {
            let message = payload["error"]["message"]
                .as_str()
                .unwrap_or("upstream error")
                .to_string();
            return Err(ModelError::Request(message));
        }

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ModelError::Malformed("response has no message content".to_string()))
    }
}
