//! LLM client layer.
//!
//! [`LlmClient`] is the seam between the agent kernel and the model server;
//! [`OllamaClient`] is the HTTP adapter for a local Ollama endpoint. The
//! trait exists so tests (and future backends) can script responses without
//! a server.

pub mod compact;
mod ndjson;
pub mod ollama;

pub use ollama::OllamaClient;

use std::pin::Pin;

use sov_domain::error::Result;
use sov_domain::message::Message;

/// A boxed async stream, used for streaming completions.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// A chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Model override. `None` uses the client's configured default.
    pub model: Option<String>,
    pub messages: Vec<Message>,
    /// Sampling temperature. `None` uses the client default.
    pub temperature: Option<f32>,
    /// Output token cap (`num_predict`). `None` uses the client default.
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Response from the model.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    /// Reported eval count; 0 when the server omits it.
    pub tokens_used: u32,
    /// The model that produced the response.
    pub model: String,
}

/// Backend seam for chat completions.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Full chat completion (non-streaming).
    async fn chat(&self, req: ChatRequest) -> Result<LlmResponse>;

    /// Single-prompt completion with an optional system prompt.
    async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<LlmResponse>;

    /// Streaming chat completion; yields content fragments until the
    /// backend signals completion. The sequence is finite and cannot be
    /// restarted.
    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<String>>>;

    /// Installed model names, fetched from the backend.
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Whether the backend is reachable at all.
    async fn is_available(&self) -> bool {
        self.list_models().await.is_ok()
    }

    /// Whether `model` is installed, matching exactly or by the prefix
    /// before the first colon (`"llama3"` matches `"llama3:8b"`).
    async fn model_exists(&self, model: &str) -> Result<bool> {
        let models = self.list_models().await?;
        let base = model.split(':').next().unwrap_or(model);
        Ok(models
            .iter()
            .any(|m| m == model || m.split(':').next() == Some(base)))
    }
}
