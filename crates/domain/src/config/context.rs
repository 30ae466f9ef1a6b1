use serde::{Deserialize, Serialize};

/// Context window budgeting for prompt assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget for the assembled prompt.
    #[serde(default = "d_8192")]
    pub max_tokens: usize,
    /// Tokens held back for the model's response.
    #[serde(default = "d_2048")]
    pub reserve_for_response: usize,
    /// Token budget for retrieved (RAG) blocks; task type scales this.
    #[serde(default = "d_2000")]
    pub max_rag_tokens: usize,
    /// Raw-history size (chars) at which the compact prompt template is used.
    #[serde(default = "d_15000")]
    pub compact_threshold_chars: usize,
    /// Hard cap on the final system prompt, in characters.
    #[serde(default = "d_40000")]
    pub system_prompt_max_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: d_8192(),
            reserve_for_response: d_2048(),
            max_rag_tokens: d_2000(),
            compact_threshold_chars: d_15000(),
            system_prompt_max_chars: d_40000(),
        }
    }
}

fn d_8192() -> usize {
    8192
}
fn d_2048() -> usize {
    2048
}
fn d_2000() -> usize {
    2000
}
fn d_15000() -> usize {
    15_000
}
fn d_40000() -> usize {
    40_000
}
