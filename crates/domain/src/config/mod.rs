//! Configuration tree.
//!
//! Loaded from a TOML file, then overridden by `SOVEREIGN_*` environment
//! variables (`llm.model` → `SOVEREIGN_LLM_MODEL`). Every section has
//! serde defaults so a missing file or empty table still yields a usable
//! configuration.

mod agent;
mod cache;
mod context;
mod llm;
mod logging;
mod sessions;

pub use agent::*;
pub use cache::*;
pub use context::*;
pub use llm::*;
pub use logging::*;
pub use sessions::*;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from a TOML file and apply environment overrides.
    ///
    /// A missing file yields defaults (plus overrides) rather than an error.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
            toml::from_str(&raw).map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `SOVEREIGN_<SECTION>_<KEY>` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        override_string("SOVEREIGN_LLM_MODEL", &mut self.llm.model);
        override_string("SOVEREIGN_LLM_OLLAMA_URL", &mut self.llm.ollama_url);
        override_parse("SOVEREIGN_LLM_TIMEOUT", &mut self.llm.timeout_secs);
        override_parse("SOVEREIGN_LLM_TEMPERATURE", &mut self.llm.temperature);
        override_parse("SOVEREIGN_LLM_MAX_TOKENS", &mut self.llm.max_tokens);
        override_parse("SOVEREIGN_LLM_MAX_RETRIES", &mut self.llm.max_retries);
        override_parse("SOVEREIGN_LLM_RETRY_DELAY", &mut self.llm.retry_delay_secs);
        override_parse("SOVEREIGN_LLM_CONTEXT_WINDOW", &mut self.llm.context_window);
        override_parse("SOVEREIGN_AGENT_MAX_ITERATIONS", &mut self.agent.max_iterations);
        override_string("SOVEREIGN_AGENT_WORKING_DIR", &mut self.agent.working_dir);
        override_parse("SOVEREIGN_AGENT_MAX_HISTORY_MESSAGES", &mut self.agent.max_history_messages);
        override_parse("SOVEREIGN_AGENT_ENABLE_ROUTING", &mut self.agent.enable_routing);
        override_parse("SOVEREIGN_AGENT_ENABLE_RAG", &mut self.agent.enable_rag);
        override_parse("SOVEREIGN_AGENT_ENABLE_PARALLEL", &mut self.agent.enable_parallel);
        override_parse("SOVEREIGN_AGENT_PARALLEL_WORKERS", &mut self.agent.parallel_workers);
        override_parse("SOVEREIGN_CACHE_TTL", &mut self.cache.ttl_secs);
        override_parse("SOVEREIGN_CACHE_MAX_SIZE", &mut self.cache.max_size);
        override_parse("SOVEREIGN_SESSIONS_MAX_SESSIONS", &mut self.sessions.max_sessions);
        override_parse("SOVEREIGN_SESSIONS_TIMEOUT", &mut self.sessions.timeout_secs);
        override_string("SOVEREIGN_SESSIONS_STORAGE_DIR", &mut self.sessions.storage_dir);
        override_string("SOVEREIGN_LOGGING_LEVEL", &mut self.logging.level);
        override_parse("SOVEREIGN_LOGGING_CONSOLE", &mut self.logging.console);
        override_parse("SOVEREIGN_LOGGING_JSON_FORMAT", &mut self.logging.json_format);
        if let Ok(v) = std::env::var("SOVEREIGN_LOGGING_LOG_FILE") {
            self.logging.log_file = Some(v);
        }
    }
}

fn override_string(var: &str, target: &mut String) {
    if let Ok(v) = std::env::var(var) {
        *target = v;
    }
}

fn override_parse<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(v) = std::env::var(var) {
        match v.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(var, value = %v, "ignoring unparseable env override"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.llm.ollama_url.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "llm.ollama_url".into(),
                message: "base URL must not be empty".into(),
            });
        } else if !self.llm.ollama_url.starts_with("http://")
            && !self.llm.ollama_url.starts_with("https://")
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "llm.ollama_url".into(),
                message: format!(
                    "base URL must start with http:// or https:// (got \"{}\")",
                    self.llm.ollama_url
                ),
            });
        }

        if self.llm.model.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "llm.model".into(),
                message: "model must not be empty".into(),
            });
        }

        if self.agent.max_iterations == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "agent.max_iterations".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.agent.parallel_workers == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "agent.parallel_workers".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.context.max_tokens <= self.context.reserve_for_response {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "context.max_tokens".into(),
                message: "must exceed context.reserve_for_response".into(),
            });
        }

        if self.sessions.max_sessions == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "sessions.max_sessions".into(),
                message: "zero sessions means every request is rejected".into(),
            });
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        let errors: Vec<_> = config
            .validate()
            .into_iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn empty_toml_deserializes_to_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.llm.model, LlmConfig::default().model);
        assert_eq!(config.agent.max_iterations, 50);
    }

    #[test]
    fn partial_toml_overrides_only_named_keys() {
        let config: Config = toml::from_str(
            r#"
            [llm]
            model = "qwen2.5-coder:32b"

            [agent]
            max_iterations = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.llm.model, "qwen2.5-coder:32b");
        assert_eq!(config.agent.max_iterations, 10);
        // Untouched keys keep their defaults.
        assert_eq!(config.llm.ollama_url, "http://localhost:11434");
        assert!(config.agent.enable_parallel);
    }

    #[test]
    fn invalid_url_is_reported() {
        let mut config = Config::default();
        config.llm.ollama_url = "localhost:11434".into();
        let issues = config.validate();
        assert!(issues.iter().any(|i| i.field == "llm.ollama_url"));
    }

    #[test]
    fn reserve_exceeding_budget_is_reported() {
        let mut config = Config::default();
        config.context.max_tokens = 1000;
        config.context.reserve_for_response = 2000;
        let issues = config.validate();
        assert!(issues.iter().any(|i| i.field == "context.max_tokens"));
    }

    #[test]
    fn env_override_applies_and_bad_values_are_ignored() {
        // Distinct var names per test avoid cross-test interference; this
        // test owns the MODEL/MAX_ITERATIONS vars.
        std::env::set_var("SOVEREIGN_LLM_MODEL", "env-model:7b");
        std::env::set_var("SOVEREIGN_AGENT_MAX_ITERATIONS", "not-a-number");

        let mut config = Config::default();
        let before = config.agent.max_iterations;
        config.apply_env_overrides();

        assert_eq!(config.llm.model, "env-model:7b");
        assert_eq!(config.agent.max_iterations, before);

        std::env::remove_var("SOVEREIGN_LLM_MODEL");
        std::env::remove_var("SOVEREIGN_AGENT_MAX_ITERATIONS");
    }

    #[test]
    fn config_issue_display_includes_severity() {
        let issue = ConfigIssue {
            severity: ConfigSeverity::Warning,
            field: "llm.model".into(),
            message: "suspicious".into(),
        };
        assert_eq!(issue.to_string(), "[WARN] llm.model: suspicious");
    }
}
