use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Default model identifier; the router may substitute a sibling tier.
    #[serde(default = "d_model")]
    pub model: String,
    /// Ollama HTTP base URL.
    #[serde(default = "d_ollama_url")]
    pub ollama_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "d_600")]
    pub timeout_secs: u64,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    /// Cap on output tokens per request (`num_predict`).
    #[serde(default = "d_16384")]
    pub max_tokens: u32,
    #[serde(default = "d_5")]
    pub max_retries: u32,
    /// Base delay for exponential backoff, in seconds.
    #[serde(default = "d_2")]
    pub retry_delay_secs: u64,
    /// Context window hint sent as `num_ctx`.
    #[serde(default = "d_32768")]
    pub context_window: u32,
    /// Model names per router tier.
    #[serde(default)]
    pub tiers: ModelTiersConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: d_model(),
            ollama_url: d_ollama_url(),
            timeout_secs: d_600(),
            temperature: d_temperature(),
            max_tokens: d_16384(),
            max_retries: d_5(),
            retry_delay_secs: d_2(),
            context_window: d_32768(),
            tiers: ModelTiersConfig::default(),
        }
    }
}

/// Model identifiers for each size tier the router selects between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelTiersConfig {
    #[serde(default = "d_small_model")]
    pub small: String,
    #[serde(default = "d_medium_model")]
    pub medium: String,
    #[serde(default = "d_large_model")]
    pub large: String,
}

impl Default for ModelTiersConfig {
    fn default() -> Self {
        Self {
            small: d_small_model(),
            medium: d_medium_model(),
            large: d_large_model(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_model() -> String {
    "qwen2.5-coder:14b".into()
}
fn d_ollama_url() -> String {
    "http://localhost:11434".into()
}
fn d_small_model() -> String {
    "qwen2.5-coder:7b".into()
}
fn d_medium_model() -> String {
    "qwen2.5-coder:14b".into()
}
fn d_large_model() -> String {
    "qwen2.5-coder:32b".into()
}
fn d_temperature() -> f32 {
    0.1
}
fn d_600() -> u64 {
    600
}
fn d_2() -> u64 {
    2
}
fn d_5() -> u32 {
    5
}
fn d_16384() -> u32 {
    16_384
}
fn d_32768() -> u32 {
    32_768
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = LlmConfig::default();
        assert_eq!(config.timeout_secs, 600);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay_secs, 2);
        assert_eq!(config.context_window, 32_768);
        assert_eq!(config.max_tokens, 16_384);
    }

    #[test]
    fn tiers_deserialize() {
        let config: LlmConfig = toml::from_str(
            r#"
            [tiers]
            small = "a:7b"
            medium = "b:14b"
            large = "c:32b"
            "#,
        )
        .unwrap();
        assert_eq!(config.tiers.small, "a:7b");
        assert_eq!(config.tiers.large, "c:32b");
    }
}
