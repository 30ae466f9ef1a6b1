//! Ollama HTTP adapter.
//!
//! Speaks the Ollama JSON API: `/api/chat`, `/api/generate`, `/api/tags`.
//! Transport failures, timeouts, and HTTP error statuses are retried with
//! capped exponential backoff; parse errors and cancellation propagate
//! immediately. Oversized message lists are compacted deterministically
//! before the request leaves the process (see [`crate::compact`]).

use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use sov_domain::config::LlmConfig;
use sov_domain::error::{Error, Result};
use sov_domain::message::Message;

use crate::compact::{compact_messages, total_chars};
use crate::ndjson::{ndjson_response_stream, Frame};
use crate::{BoxStream, ChatRequest, LlmClient, LlmResponse};

/// Backoff delays never exceed this.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client for a local Ollama endpoint.
pub struct OllamaClient {
    model: String,
    base_url: String,
    max_retries: u32,
    retry_delay: Duration,
    context_window: u32,
    default_max_tokens: u32,
    default_temperature: f32,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;

        Ok(Self {
            model: cfg.model.clone(),
            base_url: cfg.ollama_url.trim_end_matches('/').to_string(),
            max_retries: cfg.max_retries,
            retry_delay: Duration::from_secs(cfg.retry_delay_secs),
            context_window: cfg.context_window,
            default_max_tokens: cfg.max_tokens,
            default_temperature: cfg.temperature,
            client,
        })
    }

    /// The configured default model.
    pub fn model(&self) -> &str {
        &self.model
    }

    // ── Internal: request plumbing ─────────────────────────────────

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model.clone().unwrap_or_else(|| self.model.clone())
    }

    fn options(&self, temperature: Option<f32>, max_tokens: Option<u32>) -> Value {
        serde_json::json!({
            "temperature": temperature.unwrap_or(self.default_temperature),
            "num_predict": max_tokens.unwrap_or(self.default_max_tokens),
            "num_ctx": self.context_window,
        })
    }

    /// Character budget for the request body given the output reservation.
    fn max_input_chars(&self, max_tokens: u32) -> usize {
        (self.context_window.saturating_sub(max_tokens) as usize) * 4
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Http(format!("HTTP {} - {}", status.as_u16(), text)));
        }

        // A malformed body from a 200 response is not retryable.
        serde_json::from_str(&text).map_err(Error::Json)
    }

    /// Retry `op` on transport-shaped failures with exponential backoff
    /// `min(base * 2^attempt, 60s)`; other errors propagate immediately.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = std::cmp::min(
                        self.retry_delay.saturating_mul(2u32.saturating_pow(attempt)),
                        MAX_BACKOFF,
                    );
                    tracing::warn!(
                        what,
                        attempt = attempt + 1,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transport failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn messages_to_wire(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content,
            })
        })
        .collect()
}

fn parse_chat_response(body: &Value, model: &str) -> LlmResponse {
    LlmResponse {
        content: body
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        tokens_used: body
            .get("eval_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        model: model.to_string(),
    }
}

fn parse_generate_response(body: &Value, model: &str) -> LlmResponse {
    LlmResponse {
        content: body
            .get("response")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        tokens_used: body
            .get("eval_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        model: model.to_string(),
    }
}

fn parse_stream_frame(line: &str) -> Frame {
    let v: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        // Malformed frames are skipped, not fatal.
        Err(_) => return Frame::default(),
    };

    let content = v
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(String::from);
    let done = v.get("done").and_then(|d| d.as_bool()).unwrap_or(false);

    Frame { content, done }
}

fn parse_tags_response(body: &Value) -> Vec<String> {
    body.get("models")
        .and_then(|m| m.as_array())
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, req: ChatRequest) -> Result<LlmResponse> {
        let model = self.effective_model(&req);
        let max_tokens = req.max_tokens.unwrap_or(self.default_max_tokens);
        let messages = compact_messages(&req.messages, self.max_input_chars(max_tokens));

        tracing::debug!(
            model = %model,
            messages = messages.len(),
            chars = total_chars(&messages),
            "chat request"
        );

        let body = serde_json::json!({
            "model": model,
            "messages": messages_to_wire(&messages),
            "stream": false,
            "options": self.options(req.temperature, req.max_tokens),
        });

        let resp = self
            .with_retry("chat", || self.post_json("/api/chat", &body))
            .await?;
        Ok(parse_chat_response(&resp, &model))
    }

    async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<LlmResponse> {
        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": self.options(temperature, max_tokens),
        });
        if let Some(system) = system {
            body["system"] = Value::String(system.to_string());
        }

        let resp = self
            .with_retry("generate", || self.post_json("/api/generate", &body))
            .await?;
        Ok(parse_generate_response(&resp, &self.model))
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<String>>> {
        let model = self.effective_model(&req);
        let max_tokens = req.max_tokens.unwrap_or(self.default_max_tokens);
        let messages = compact_messages(&req.messages, self.max_input_chars(max_tokens));

        let body = serde_json::json!({
            "model": model,
            "messages": messages_to_wire(&messages),
            "stream": true,
            "options": self.options(req.temperature, req.max_tokens),
        });

        tracing::debug!(model = %model, "streaming chat request");

        let url = format!("{}/api/chat", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Http(format!("HTTP {} - {}", status.as_u16(), text)));
        }

        Ok(ndjson_response_stream(resp, parse_stream_frame))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Http(format!("HTTP {} - {}", status.as_u16(), text)));
        }

        let body: Value = serde_json::from_str(&text)?;
        Ok(parse_tags_response(&body))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use sov_domain::message::Role;

    #[test]
    fn chat_response_parses_content_and_eval_count() {
        let body = serde_json::json!({
            "message": {"role": "assistant", "content": "hello"},
            "eval_count": 42,
            "done": true,
        });
        let resp = parse_chat_response(&body, "qwen2.5-coder:14b");
        assert_eq!(resp.content, "hello");
        assert_eq!(resp.tokens_used, 42);
        assert_eq!(resp.model, "qwen2.5-coder:14b");
    }

    #[test]
    fn chat_response_tolerates_missing_fields() {
        let resp = parse_chat_response(&serde_json::json!({}), "m");
        assert_eq!(resp.content, "");
        assert_eq!(resp.tokens_used, 0);
    }

    #[test]
    fn generate_response_parses_response_field() {
        let body = serde_json::json!({"response": "generated", "eval_count": 7});
        let resp = parse_generate_response(&body, "m");
        assert_eq!(resp.content, "generated");
        assert_eq!(resp.tokens_used, 7);
    }

    #[test]
    fn stream_frame_carries_content() {
        let frame =
            parse_stream_frame(r#"{"message":{"content":"chunk"},"done":false}"#);
        assert_eq!(frame.content.as_deref(), Some("chunk"));
        assert!(!frame.done);
    }

    #[test]
    fn stream_frame_final_is_done_without_content() {
        let frame = parse_stream_frame(r#"{"message":{"content":""},"done":true}"#);
        assert!(frame.content.is_none());
        assert!(frame.done);
    }

    #[test]
    fn stream_frame_malformed_is_skipped() {
        let frame = parse_stream_frame("not json at all");
        assert!(frame.content.is_none());
        assert!(!frame.done);
    }

    #[test]
    fn tags_response_extracts_names() {
        let body = serde_json::json!({
            "models": [
                {"name": "qwen2.5-coder:7b", "size": 1},
                {"name": "llama3:8b", "size": 2},
            ]
        });
        assert_eq!(
            parse_tags_response(&body),
            vec!["qwen2.5-coder:7b", "llama3:8b"]
        );
    }

    #[test]
    fn tags_response_empty_on_missing_models() {
        assert!(parse_tags_response(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn wire_messages_use_lowercase_roles() {
        let wire = messages_to_wire(&[
            Message::new(Role::System, "s"),
            Message::new(Role::User, "u"),
            Message::new(Role::Assistant, "a"),
        ]);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[1]["role"], "user");
        assert_eq!(wire[2]["role"], "assistant");
        assert_eq!(wire[1]["content"], "u");
    }

    #[test]
    fn max_input_chars_reserves_output_budget() {
        let cfg = LlmConfig {
            context_window: 1000,
            ..Default::default()
        };
        let client = OllamaClient::from_config(&cfg).unwrap();
        assert_eq!(client.max_input_chars(200), 800 * 4);
        // Saturates instead of underflowing.
        assert_eq!(client.max_input_chars(2000), 0);
    }

    #[tokio::test]
    async fn model_exists_matches_exact_and_base_name() {
        struct FakeClient;

        #[async_trait::async_trait]
        impl LlmClient for FakeClient {
            async fn chat(&self, _req: ChatRequest) -> Result<LlmResponse> {
                unimplemented!()
            }
            async fn generate(
                &self,
                _prompt: &str,
                _system: Option<&str>,
                _temperature: Option<f32>,
                _max_tokens: Option<u32>,
            ) -> Result<LlmResponse> {
                unimplemented!()
            }
            async fn chat_stream(
                &self,
                _req: ChatRequest,
            ) -> Result<BoxStream<'static, Result<String>>> {
                unimplemented!()
            }
            async fn list_models(&self) -> Result<Vec<String>> {
                Ok(vec!["qwen2.5-coder:14b".into(), "llama3:8b".into()])
            }
        }

        let client = FakeClient;
        assert!(client.model_exists("qwen2.5-coder:14b").await.unwrap());
        assert!(client.model_exists("llama3").await.unwrap());
        assert!(client.model_exists("llama3:70b").await.unwrap());
        assert!(!client.model_exists("mistral:7b").await.unwrap());
        assert!(client.is_available().await);
    }
}
