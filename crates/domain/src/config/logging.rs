use serde::{Deserialize, Serialize};

/// Process-wide logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `"info"` or `"sov_agent=debug,info"`.
    #[serde(default = "d_level")]
    pub level: String,
    /// Optional log file path; stderr only when unset.
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default = "d_true")]
    pub console: bool,
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: d_level(),
            log_file: None,
            console: true,
            json_format: false,
        }
    }
}

fn d_level() -> String {
    "info".into()
}
fn d_true() -> bool {
    true
}
