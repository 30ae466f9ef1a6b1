use serde::{Deserialize, Serialize};

/// Operation cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry time-to-live in seconds.
    #[serde(default = "d_300")]
    pub ttl_secs: u64,
    #[serde(default = "d_1000")]
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: d_300(),
            max_size: d_1000(),
        }
    }
}

fn d_300() -> u64 {
    300
}
fn d_1000() -> usize {
    1000
}
