//! Chat-completion backend
//!
//! One OpenAI-compatible implementation covers the hosted providers and
//! Ollama's `/v1` surface. Streaming uses SSE chunks; non-streaming requests
//! retry with exponential backoff on transient failures.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::LlmError;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Model name/ID
    pub model: String,
    /// Base endpoint, e.g. `http://localhost:11434/v1`
    pub endpoint: String,
    /// API key (optional for local backends)
    pub api_key: Option<String>,
    /// Maximum tokens to generate
    pub max_tokens: usize,
    /// Temperature
    pub temperature: f32,
    /// Request timeout
    pub timeout: Duration,
    /// Maximum retry attempts for transient failures
    pub max_retries: u32,
    /// Initial backoff duration (doubles each retry)
    pub initial_backoff: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "qwen3:4b-instruct-2507-q4_K_M".to_string(),
            endpoint: "http://localhost:11434/v1".to_string(),
            api_key: None,
            max_tokens: 256,
            temperature: 0.2,
            timeout: Duration::from_secs(8),
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Completion result
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub finish_reason: FinishReason,
    /// Total generation time (ms)
    pub total_time_ms: u64,
}

/// Finish reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Error,
}

/// Chat backend trait
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Generate a completion for the message list.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, LlmError>;

    /// Generate with streaming; tokens are forwarded to `tx` as they arrive
    /// and the full text is returned at the end.
    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        tx: mpsc::Sender<String>,
    ) -> Result<Completion, LlmError>;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible backend.
#[derive(Clone)]
pub struct OpenAiCompatBackend {
    client: Client,
    config: LlmConfig,
}

impl OpenAiCompatBackend {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn api_url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.config.model,
            messages: messages.to_vec(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream,
        }
    }

    fn builder(&self, body: &ChatRequest<'_>) -> reqwest::RequestBuilder {
        let mut req = self.client.post(self.api_url()).json(body);
        if let Some(key) = &self.config.api_key {
            if !key.is_empty() {
                req = req.bearer_auth(key);
            }
        }
        req
    }

    async fn execute_once(&self, messages: &[ChatMessage]) -> Result<Completion, LlmError> {
        let start = std::time::Instant::now();
        let body = self.request_body(messages, false);

        let response = self.builder(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{status}: {text}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

        Ok(Completion {
            text: choice.message.map(|m| m.content).unwrap_or_default(),
            finish_reason: parse_finish_reason(choice.finish_reason.as_deref()),
            total_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatBackend {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, LlmError> {
        let mut backoff = self.config.initial_backoff;
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    "LLM request failed, retrying in {:?} (attempt {}/{})",
                    backoff,
                    attempt,
                    self.config.max_retries
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.execute_once(messages).await {
                Ok(result) => return Ok(result),
                // Bad requests won't get better on retry
                Err(e @ LlmError::Api(_)) | Err(e @ LlmError::InvalidResponse(_)) => return Err(e),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or(LlmError::Timeout))
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        tx: mpsc::Sender<String>,
    ) -> Result<Completion, LlmError> {
        let start = std::time::Instant::now();
        let body = self.request_body(messages, true);

        let response = self.builder(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{status}: {text}")));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_text = String::new();
        let mut finish_reason = FinishReason::Stop;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // SSE frames are newline-delimited `data: {...}` lines
            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);

                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload.is_empty() || payload == "[DONE]" {
                    continue;
                }

                match serde_json::from_str::<StreamChunk>(payload) {
                    Ok(chunk) => {
                        for choice in chunk.choices {
                            if let Some(delta) = choice.delta {
                                if let Some(token) = delta.content {
                                    if !token.is_empty() {
                                        full_text.push_str(&token);
                                        // Receiver gone means the session closed;
                                        // finish draining so the result is complete.
                                        let _ = tx.send(token).await;
                                    }
                                }
                            }
                            if let Some(reason) = choice.finish_reason.as_deref() {
                                finish_reason = parse_finish_reason(Some(reason));
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Skipping unparsable SSE chunk: {e}");
                    }
                }
            }
        }

        Ok(Completion {
            text: full_text,
            finish_reason,
            total_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

fn parse_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("length") => FinishReason::Length,
        Some("error") => FinishReason::Error,
        _ => FinishReason::Stop,
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_handles_trailing_slash() {
        let backend = OpenAiCompatBackend::new(LlmConfig {
            endpoint: "http://localhost:11434/v1/".to_string(),
            ..LlmConfig::default()
        })
        .unwrap();
        assert_eq!(
            backend.api_url(),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn finish_reason_parsing() {
        assert_eq!(parse_finish_reason(Some("stop")), FinishReason::Stop);
        assert_eq!(parse_finish_reason(Some("length")), FinishReason::Length);
        assert_eq!(parse_finish_reason(None), FinishReason::Stop);
    }
}
