//! OpenAI-compatible LLM client used by FAQ, prompt, rephrasing and
//! embedding search.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use kairon_core::config::LlmConfig;

use crate::error::ActionError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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

/// Per-call overrides taken from an action config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmOverrides {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmReply {
    pub content: String,
    /// Upstream body, kept for the audit log.
    pub raw: Value,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    config: LlmConfig,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(http: Client, config: LlmConfig, timeout: Duration) -> Self {
        Self {
            http,
            config,
            timeout,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.base_url.is_some()
    }

    fn endpoint(&self, path: &str) -> Result<String, ActionError> {
        let base = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| ActionError::UpstreamFailure("LLM endpoint is not configured".to_string()))?;
        Ok(format!("{}/{}", base.trim_end_matches('/'), path))
    }

    async fn post(&self, path: &str, body: &Value, timeout: Duration) -> Result<Value, ActionError> {
        let mut request = self.http.post(self.endpoint(path)?).json(body).timeout(timeout);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(ActionError::UpstreamFailure(format!(
                "LLM returned {}: {}",
                status, body
            )));
        }
        Ok(body)
    }

    /// Run a chat completion with the default timeout.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        overrides: &LlmOverrides,
    ) -> Result<LlmReply, ActionError> {
        self.chat_with_timeout(messages, overrides, self.timeout).await
    }

    pub async fn chat_with_timeout(
        &self,
        messages: &[ChatMessage],
        overrides: &LlmOverrides,
        timeout: Duration,
    ) -> Result<LlmReply, ActionError> {
        let body = json!({
            "model": overrides.model.as_deref().unwrap_or(&self.config.model),
            "temperature": overrides.temperature.unwrap_or(self.config.temperature),
            "messages": messages,
        });
        let raw = self.post("chat/completions", &body, timeout).await?;
        let parsed: CompletionResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ActionError::UpstreamFailure(format!("unexpected LLM response: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ActionError::UpstreamFailure("LLM returned no choices".to_string()))?;
        Ok(LlmReply {
            content: content.trim().to_string(),
            raw,
        })
    }

    /// Ask the model to reword a bot reply.
    pub async fn rephrase(&self, text: &str, timeout: Duration) -> Result<LlmReply, ActionError> {
        let messages = [
            ChatMessage::system(
                "You are a helpful assistant. Rephrase the given bot reply so it sounds natural. \
                 Keep its meaning and language. Reply with the rephrased text only.",
            ),
            ChatMessage::user(text),
        ];
        self.chat_with_timeout(&messages, &LlmOverrides::default(), timeout)
            .await
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ActionError> {
        let body = json!({"model": self.config.embedding_model, "input": text});
        let raw = self.post("embeddings", &body, self.timeout).await?;
        let parsed: EmbeddingResponse = serde_json::from_value(raw)
            .map_err(|e| ActionError::UpstreamFailure(format!("unexpected embedding response: {}", e)))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ActionError::UpstreamFailure("no embedding returned".to_string()))
    }
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}
