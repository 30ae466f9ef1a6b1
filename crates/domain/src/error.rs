/// Shared error type used across all sovereign crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("LLM {model}: {message}")]
    Llm { model: String, message: String },

    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("session: {0}")]
    Session(String),

    #[error("config: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Transport-shaped failures are retried by the LLM client; everything
    /// else propagates immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
