use thiserror::Error;

use crate::llm::protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum BarryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("SSE parsing error: {0}")]
    SseParsing(String),

    #[error("Perception unavailable: {0}")]
    PerceptionUnavailable(String),

    #[error("Oracle protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl BarryError {
    /// True for failures of the perception backend, which abort only the current step.
    pub fn is_perception(&self) -> bool {
        matches!(self, BarryError::PerceptionUnavailable(_))
    }
}

pub type BarryResult<T> = Result<T, BarryError>;
