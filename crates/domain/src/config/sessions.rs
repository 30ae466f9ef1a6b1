use serde::{Deserialize, Serialize};

/// Session manager and conversation persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Bound on concurrently live sessions; LRU eviction beyond this.
    #[serde(default = "d_20")]
    pub max_sessions: usize,
    /// Idle seconds before a session expires.
    #[serde(default = "d_3600")]
    pub timeout_secs: u64,
    /// Root directory for persisted conversations.
    #[serde(default = "d_storage_dir")]
    pub storage_dir: String,
    /// Persist every message append.
    #[serde(default = "d_true")]
    pub auto_save: bool,
    /// Message count before the store digests the oldest prefix.
    #[serde(default = "d_20")]
    pub max_messages_before_summary: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: d_20(),
            timeout_secs: d_3600(),
            storage_dir: d_storage_dir(),
            auto_save: true,
            max_messages_before_summary: d_20(),
        }
    }
}

fn d_20() -> usize {
    20
}
fn d_3600() -> u64 {
    3600
}
fn d_true() -> bool {
    true
}
fn d_storage_dir() -> String {
    ".sovereign/conversations".into()
}
