//! Text-generation client.
//!
//! [`TextGenerator`] is the seam every stage talks to. [`AnthropicClient`]
//! performs exactly one Messages API call per `send`; retry policy lives in
//! the [`Retrying`] wrapper so it applies to any generator, scripted ones
//! included.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::errors::GenerationError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One request/response exchange with a text-generation service.
///
/// Implementations must be safe to call concurrently from several sessions.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn send(&self, system: &str, user: &str) -> Result<String, GenerationError>;
}

#[async_trait]
impl<G: TextGenerator + ?Sized> TextGenerator for Arc<G> {
    async fn send(&self, system: &str, user: &str) -> Result<String, GenerationError> {
        (**self).send(system, user).await
    }
}

// ── Anthropic Messages API ───────────────────────────────────────────

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// HTTP client for the Anthropic Messages API.
///
/// Holds a pooled `reqwest::Client`; clones share the pool.
#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, config: &GenerationConfig) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("{}/v1/messages", config.api_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl TextGenerator for AnthropicClient {
    async fn send(&self, system: &str, user: &str) -> Result<String, GenerationError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: [ChatMessage {
                role: "user",
                content: user,
            }],
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(GenerationError::Remote {
                status: status.as_u16(),
                message: remote_message(&bytes),
            });
        }

        let parsed: MessagesResponse = serde_json::from_slice(&bytes)
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        let text = first_text(parsed)?;
        debug!(chars = text.len(), "generation response received");
        Ok(text)
    }
}

/// Pull the service's error message out of an error body, or fall back to the raw text.
fn remote_message(body: &[u8]) -> String {
    match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    }
}

fn first_text(response: MessagesResponse) -> Result<String, GenerationError> {
    response
        .content
        .into_iter()
        .find(|block| block.kind == "text")
        .and_then(|block| block.text)
        .filter(|text| !text.trim().is_empty())
        .ok_or(GenerationError::EmptyResponse)
}

// ── Retry wrapper ────────────────────────────────────────────────────

/// Retries retryable failures immediately, up to `max_attempts` calls in total.
///
/// The last error is returned once attempts run out. Non-retryable errors
/// (client-side statuses, empty or malformed bodies) are returned at once.
pub struct Retrying<G> {
    inner: G,
    max_attempts: u32,
}

impl<G> Retrying<G> {
    pub fn new(inner: G, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
        }
    }
}

#[async_trait]
impl<G: TextGenerator> TextGenerator for Retrying<G> {
    async fn send(&self, system: &str, user: &str) -> Result<String, GenerationError> {
        let mut attempt = 1;
        loop {
            match self.inner.send(system, user).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(attempt, max_attempts = self.max_attempts, error = %e, "generation call failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
