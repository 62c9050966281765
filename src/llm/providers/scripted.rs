//! Scripted provider: replies from a queue, no network. Used to drive the
//! experts deterministically in tests and offline replays.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::{BarryError, BarryResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse};

#[derive(Debug, Default)]
pub struct ScriptedProvider {
    id: String,
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_replies<I, S>(id: impl Into<String>, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provider = Self::new(id);
        for reply in replies {
            provider.push_reply(reply);
        }
        provider
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply.into());
        }
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Every conversation sent so far, oldest first.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(&self, messages: Vec<ChatMessage>, _cfg: &CallConfig) -> BarryResult<LlmResponse> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(messages);
        }
        let next = self
            .replies
            .lock()
            .map_err(|_| BarryError::LlmProvider("scripted reply queue poisoned".into()))?
            .pop_front();
        match next {
            Some(content) => Ok(LlmResponse {
                content,
                reasoning: String::new(),
            }),
            None => Err(BarryError::LlmProvider(format!(
                "scripted provider '{}' has no replies left",
                self.id
            ))),
        }
    }
}
