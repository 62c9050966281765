use std::sync::Arc;

use crate::errors::BarryResult;
use crate::llm::provider::LlmProvider;
use crate::llm::registry::ExpertRole;
use crate::llm::types::{CallConfig, ChatMessage, ContentPart, MessageContent};

/// One expert's running chat transcript.
///
/// Bounded in two ways so a long episode cannot grow the request without
/// limit: at most `window` turns are kept (oldest dropped first), and image
/// parts survive only on the most recent user turn that carries images.
#[derive(Debug, Clone)]
pub struct Conversation {
    system: Option<ChatMessage>,
    turns: Vec<ChatMessage>,
    window: usize,
}

impl Conversation {
    pub fn new(system: Option<String>, window: usize) -> Self {
        Self {
            system: system.map(ChatMessage::system),
            turns: Vec::new(),
            window: window.max(2),
        }
    }

    pub fn push_user(&mut self, parts: Vec<ContentPart>) {
        self.turns.push(ChatMessage::user(parts));
        self.enforce_bounds();
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(ChatMessage::assistant(text));
        self.enforce_bounds();
    }

    /// Full request payload: system prompt followed by the retained turns.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.system.iter().cloned().chain(self.turns.iter().cloned()).collect()
    }

    pub fn turns(&self) -> &[ChatMessage] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Replace the transcript with a single recap turn.
    pub fn reset_with_summary(&mut self, summary: &str) {
        self.turns.clear();
        if !summary.trim().is_empty() {
            self.turns.push(ChatMessage::user(vec![ContentPart::text(format!(
                "Recap of what has been executed so far:\n{}",
                summary.trim()
            ))]));
        }
    }

    fn pop_last(&mut self) {
        self.turns.pop();
    }

    fn enforce_bounds(&mut self) {
        if self.turns.len() > self.window {
            let excess = self.turns.len() - self.window;
            self.turns.drain(..excess);
        }
        // A transcript never starts with an orphaned assistant reply.
        while self.turns.first().is_some_and(|m| m.role == "assistant") {
            self.turns.remove(0);
        }

        let last_with_images = self.turns.iter().rposition(|m| m.has_images());
        if let Some(keep) = last_with_images {
            for (idx, msg) in self.turns.iter_mut().enumerate() {
                if idx == keep {
                    continue;
                }
                if let MessageContent::Parts(parts) = &mut msg.content {
                    let before = parts.len();
                    parts.retain(|p| matches!(p, ContentPart::Text { .. }));
                    if parts.len() != before {
                        parts.push(ContentPart::text("(screenshot omitted)"));
                    }
                }
            }
        }
    }
}

/// A provider bound to the call settings resolved for one expert role.
#[derive(Clone)]
pub struct RoleClient {
    role: ExpertRole,
    provider: Arc<dyn LlmProvider>,
    cfg: CallConfig,
}

impl RoleClient {
    pub fn new(role: ExpertRole, provider: Arc<dyn LlmProvider>, cfg: CallConfig) -> Self {
        Self { role, provider, cfg }
    }

    /// Append a user turn, query the oracle with the whole transcript and
    /// record the reply. On failure the unanswered user turn is removed again.
    pub async fn ask(&self, conv: &mut Conversation, parts: Vec<ContentPart>) -> BarryResult<String> {
        conv.push_user(parts);
        match self.provider.chat(conv.messages(), &self.cfg).await {
            Ok(response) => {
                tracing::debug!(
                    role = self.role.as_str(),
                    provider = self.provider.name(),
                    reply_len = response.content.len(),
                    "oracle replied"
                );
                conv.push_assistant(response.content.clone());
                Ok(response.content)
            }
            Err(e) => {
                conv.pop_last();
                Err(e)
            }
        }
    }

    /// Stateless single-turn query.
    pub async fn ask_once(&self, system: Option<String>, parts: Vec<ContentPart>) -> BarryResult<String> {
        let mut conv = Conversation::new(system, 2);
        self.ask(&mut conv, parts).await
    }
}
