use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn loop / executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on LLM round-trips per turn.
    #[serde(default = "d_50")]
    pub max_iterations: usize,
    /// Base path for filesystem tools.
    #[serde(default = "d_working_dir")]
    pub working_dir: String,
    /// History length before summarization replaces the oldest prefix.
    #[serde(default = "d_30")]
    pub max_history_messages: usize,
    /// Dynamic model selection per turn.
    #[serde(default = "d_true")]
    pub enable_routing: bool,
    /// Context retrieval before each turn.
    #[serde(default = "d_true")]
    pub enable_rag: bool,
    /// Concurrent execution of independent tool batches.
    #[serde(default = "d_true")]
    pub enable_parallel: bool,
    #[serde(default = "d_4")]
    pub parallel_workers: usize,
    /// Per-tool-call timeout when executing in parallel, in seconds.
    #[serde(default = "d_60")]
    pub tool_timeout_secs: u64,
    /// Prefix of upload directories scanned when inferring a missing `path`.
    #[serde(default = "d_upload_prefix")]
    pub upload_path_prefix: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: d_50(),
            working_dir: d_working_dir(),
            max_history_messages: d_30(),
            enable_routing: true,
            enable_rag: true,
            enable_parallel: true,
            parallel_workers: d_4(),
            tool_timeout_secs: d_60(),
            upload_path_prefix: d_upload_prefix(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_50() -> usize {
    50
}
fn d_30() -> usize {
    30
}
fn d_4() -> usize {
    4
}
fn d_60() -> u64 {
    60
}
fn d_true() -> bool {
    true
}
fn d_working_dir() -> String {
    ".".into()
}
fn d_upload_prefix() -> String {
    "/tmp/sovereign_".into()
}
