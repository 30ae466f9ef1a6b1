//! Model routing.
//!
//! Picks a model tier from request heuristics and context size, then falls
//! back across tiers based on what the backend actually has installed. The
//! availability probe runs once and is memoized; `reset_availability` is
//! the explicit re-probe entry point (no hidden singleton state).

use std::collections::HashSet;

use parking_lot::Mutex;

use sov_domain::config::LlmConfig;
use sov_llm::LlmClient;

use crate::analyzer::{analyze_complexity, Complexity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Small,
    Medium,
    Large,
}

/// Keywords that push a request to the large tier.
const HIGH_COMPLEXITY_KEYWORDS: &[&str] = &[
    "architecture",
    "design system",
    "multi-file",
    "refactor entire",
    "migrate",
    "redesign",
    "complex algorithm",
    "optimize performance",
    "debug complex",
    "analyze entire",
];

/// Keywords that keep a request on the small tier.
const LOW_COMPLEXITY_KEYWORDS: &[&str] = &[
    "explain",
    "format",
    "add comment",
    "fix typo",
    "rename variable",
    "simple edit",
    "documentation",
    "what does",
    "how does",
];

/// Source-file extensions counted by the multi-file heuristic.
const SOURCE_EXTENSIONS: &[&str] = &[".rs", ".py", ".js", ".ts", ".java"];

pub struct Router {
    small: String,
    medium: String,
    large: String,
    default_model: String,
    /// Memoized availability probe; `None` until first use.
    available: Mutex<Option<HashSet<String>>>,
}

impl Router {
    pub fn new(cfg: &LlmConfig) -> Self {
        Self {
            small: cfg.tiers.small.clone(),
            medium: cfg.tiers.medium.clone(),
            large: cfg.tiers.large.clone(),
            default_model: cfg.model.clone(),
            available: Mutex::new(None),
        }
    }

    fn tier_model(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Small => &self.small,
            ModelTier::Medium => &self.medium,
            ModelTier::Large => &self.large,
        }
    }

    // ── Tier heuristics ────────────────────────────────────────────

    /// Preferred tier for a request, before availability is consulted.
    pub fn preferred_tier(request: &str, context_chars: usize) -> ModelTier {
        let lower = request.to_lowercase();

        if analyze_complexity(request) == Complexity::Project {
            return ModelTier::Large;
        }
        if HIGH_COMPLEXITY_KEYWORDS.iter().any(|k| lower.contains(k)) {
            return ModelTier::Large;
        }
        if LOW_COMPLEXITY_KEYWORDS.iter().any(|k| lower.contains(k)) {
            return ModelTier::Small;
        }
        if context_chars > 1000 {
            return ModelTier::Large;
        }
        if request.split_whitespace().count() > 100 {
            return ModelTier::Large;
        }

        let file_mentions: usize = SOURCE_EXTENSIONS
            .iter()
            .map(|ext| lower.matches(ext).count())
            .sum();
        if file_mentions > 5 {
            return ModelTier::Large;
        }
        if file_mentions > 2 {
            return ModelTier::Medium;
        }

        let tool_mentions = ["read", "write", "search", "execute"]
            .iter()
            .map(|w| lower.matches(w).count())
            .sum::<usize>();
        if tool_mentions > 3 {
            return ModelTier::Medium;
        }

        ModelTier::Medium
    }

    /// Fixed fallback order: preferred, then medium, small, large.
    fn fallback_order(preferred: ModelTier) -> [ModelTier; 3] {
        match preferred {
            ModelTier::Large => [ModelTier::Large, ModelTier::Medium, ModelTier::Small],
            ModelTier::Medium => [ModelTier::Medium, ModelTier::Small, ModelTier::Large],
            ModelTier::Small => [ModelTier::Small, ModelTier::Medium, ModelTier::Large],
        }
    }

    // ── Availability ───────────────────────────────────────────────

    async fn available_models(&self, client: &dyn LlmClient) -> Option<HashSet<String>> {
        if let Some(models) = self.available.lock().clone() {
            return Some(models);
        }

        match client.list_models().await {
            Ok(models) => {
                let set: HashSet<String> = models.into_iter().collect();
                tracing::info!(count = set.len(), "probed installed models");
                *self.available.lock() = Some(set.clone());
                Some(set)
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not probe model availability");
                None
            }
        }
    }

    /// Forget the memoized probe so the next selection re-fetches.
    pub fn reset_availability(&self) {
        *self.available.lock() = None;
    }

    // ── Selection ──────────────────────────────────────────────────

    /// Select a model for the request.
    ///
    /// If availability cannot be determined, returns the configured default
    /// and lets the client surface the error.
    pub async fn select(
        &self,
        client: &dyn LlmClient,
        request: &str,
        context_chars: usize,
    ) -> String {
        let preferred = Self::preferred_tier(request, context_chars);

        let Some(available) = self.available_models(client).await else {
            return self.default_model.clone();
        };

        for tier in Self::fallback_order(preferred) {
            let model = self.tier_model(tier);
            if available.contains(model) {
                if tier != preferred {
                    tracing::info!(
                        preferred = self.tier_model(preferred),
                        selected = model,
                        "preferred tier unavailable, falling back"
                    );
                }
                return model.to_string();
            }
        }

        tracing::warn!("no configured tier model installed, using default");
        self.default_model.clone()
    }
}
