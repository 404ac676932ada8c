//! Chat-completion client for the upstream LLM endpoint.
//!
//! The `ChatApi` trait is the seam every agent and the orchestrator talk
//! through; `HttpChatClient` is the production implementation. Streaming
//! responses arrive as `data: ` SSE lines carrying JSON deltas and end with a
//! literal `data: [DONE]` line.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use crate::settings::LlmSettings;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("chat endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("chat transport error: {0}")]
    Transport(String),
    #[error("malformed chat response: {0}")]
    Malformed(String),
}

/// One role/content pair in a chat conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// A chat-completion request. Token limits are chosen by the client based on
/// the call mode (streaming calls get a larger budget).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages, temperature: 0.7 }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Stream of content deltas from a streaming chat call.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Single-shot completion; returns the full message content.
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError>;

    /// Streaming completion; yields content deltas as they arrive.
    async fn stream(&self, request: ChatRequest) -> Result<DeltaStream, LlmError>;
}

// --- wire format ---

#[derive(Serialize)]
struct WireRequest<'a> {
    messages: &'a [ChatMessage],
    model: &'a str,
    stream: bool,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: String,
}

#[derive(Deserialize)]
struct WireDelta {
    choices: Vec<WireDeltaChoice>,
}

#[derive(Deserialize)]
struct WireDeltaChoice {
    delta: WireDeltaContent,
}

#[derive(Deserialize, Default)]
struct WireDeltaContent {
    content: Option<String>,
}

/// Production chat client backed by `reqwest`.
pub struct HttpChatClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    max_tokens_stream: u32,
}

impl HttpChatClient {
    pub fn new(settings: &LlmSettings) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
            max_tokens: settings.max_tokens,
            max_tokens_stream: settings.max_tokens_stream,
        })
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response, LlmError> {
        let max_tokens = if stream { self.max_tokens_stream } else { self.max_tokens };
        let body = WireRequest {
            messages: &request.messages,
            model: &self.model,
            stream,
            temperature: request.temperature,
            max_tokens,
        };

        let mut req = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let response = req
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("chat endpoint error: {} - {}", status, body);
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatApi for HttpChatClient {
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        debug!("chat completion request with {} messages", request.messages.len());
        let response = self.send(&request, false).await?;
        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Malformed("response contained no choices".to_string()))
    }

    async fn stream(&self, request: ChatRequest) -> Result<DeltaStream, LlmError> {
        debug!("streaming chat request with {} messages", request.messages.len());
        let response = self.send(&request, true).await?;
        let body = response.bytes_stream();

        // Incrementally split the byte stream into SSE lines; a chunk boundary
        // is a suspension point at which the caller may stop consuming.
        let state = (body, String::new(), false);
        Ok(Box::pin(futures::stream::unfold(
            state,
            |(mut body, mut buf, failed)| async move {
                if failed {
                    return None;
                }
                loop {
                    if let Some(pos) = buf.find('\n') {
                        let line = buf[..pos].trim().to_string();
                        buf.drain(..=pos);
                        if line.is_empty() {
                            continue;
                        }
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        if data == "[DONE]" {
                            return None;
                        }
                        match serde_json::from_str::<WireDelta>(data) {
                            Ok(delta) => {
                                let content = delta
                                    .choices
                                    .into_iter()
                                    .next()
                                    .and_then(|c| c.delta.content);
                                match content {
                                    Some(text) => return Some((Ok(text), (body, buf, false))),
                                    None => continue,
                                }
                            }
                            Err(e) => {
                                // Skip unparseable lines rather than abort the stream.
                                debug!("skipping malformed SSE line: {}", e);
                                continue;
                            }
                        }
                    }

                    match body.next().await {
                        Some(Ok(bytes)) => buf.push_str(&String::from_utf8_lossy(&bytes)),
                        Some(Err(e)) => {
                            return Some((
                                Err(LlmError::Transport(e.to_string())),
                                (body, buf, true),
                            ))
                        }
                        None => return None,
                    }
                }
            },
        )))
    }
}
