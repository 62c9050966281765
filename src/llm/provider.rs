use async_trait::async_trait;

use crate::errors::BarryResult;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse};

/// Unified LLM provider trait. All oracle backends implement this trait.
/// New providers only need to implement this trait and register in config.toml.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider's identifier (matches config.toml key).
    fn name(&self) -> &str;

    /// Sends the whole conversation and returns the accumulated reply.
    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> BarryResult<LlmResponse>;
}
