use crate::agent_engine::prompts;
use crate::agent_engine::state::ExecutionOutcome;
use crate::errors::BarryResult;
use crate::executor::bounds::check_bounds;
use crate::llm::conversation::{Conversation, RoleClient};
use crate::llm::protocol::{self, ActionDecision};
use crate::llm::types::ContentPart;
use crate::perception::types::PerceptionSnapshot;

/// Action expert: turns the active instruction into one low-level command.
///
/// Each `execute` is two oracle turns on a running transcript: a free-form
/// look at the screen, then the decision on a `RESPONSE:` line. The
/// transcript is what `summarize` recaps.
pub struct ActionCoordinator {
    client: RoleClient,
    conv: Conversation,
    instruction: String,
    subtask: String,
    prior_instructions: Vec<String>,
    executed: Vec<String>,
}

impl ActionCoordinator {
    pub fn new(client: RoleClient, window: usize) -> Self {
        Self {
            client,
            conv: Conversation::new(Some(prompts::ACTION_SYSTEM.to_string()), window),
            instruction: String::new(),
            subtask: String::new(),
            prior_instructions: Vec::new(),
            executed: Vec::new(),
        }
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn set_instruction(&mut self, text: &str) {
        tracing::debug!(instruction = %text, "action instruction set");
        self.instruction = text.to_string();
    }

    /// New subtask: forget which of its instructions ran.
    pub fn set_context(&mut self, subtask: &str) {
        self.subtask = subtask.to_string();
        self.prior_instructions.clear();
    }

    /// Commands sent since the transcript was last compacted.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    pub async fn execute(&mut self, snapshot: &PerceptionSnapshot, feedback: &str) -> BarryResult<ExecutionOutcome> {
        let analysis = prompts::action_analysis(
            &self.instruction,
            &self.subtask,
            &self.prior_instructions,
            feedback,
            &snapshot.describe_regions(),
            snapshot.width,
            snapshot.height,
        );
        self.client
            .ask(
                &mut self.conv,
                vec![
                    ContentPart::text(analysis),
                    ContentPart::image(snapshot.raw_data_url()),
                    ContentPart::image(snapshot.annotated_data_url()),
                ],
            )
            .await?;
        let reply = self
            .client
            .ask(&mut self.conv, vec![ContentPart::text(prompts::ACTION_DECISION)])
            .await?;

        let outcome = match protocol::parse_action(&reply) {
            Ok(ActionDecision::Command(cmd)) => match check_bounds(&cmd, snapshot.width, snapshot.height) {
                Ok(()) => {
                    self.prior_instructions.push(self.instruction.clone());
                    self.executed.push(format!("{} -> {}", self.instruction, cmd.render()));
                    ExecutionOutcome::Command(cmd)
                }
                Err(e) => ExecutionOutcome::Error(format!("malformed oracle response: {e}")),
            },
            Ok(ActionDecision::Finished) => ExecutionOutcome::Finished,
            Ok(ActionDecision::Error(reason)) => ExecutionOutcome::Error(reason),
            Err(e) => ExecutionOutcome::Error(format!("malformed oracle response: {e}")),
        };
        tracing::info!(instruction = %self.instruction, outcome = ?outcome, "action decided");
        Ok(outcome)
    }

    /// Recap of everything executed since the transcript was last compacted.
    /// No oracle call when nothing was executed.
    pub async fn summarize(&mut self) -> BarryResult<String> {
        if self.executed.is_empty() {
            return Ok(String::new());
        }
        let reply = self
            .client
            .ask(&mut self.conv, vec![ContentPart::text(prompts::ACTION_SUMMARY)])
            .await?;
        Ok(protocol::extract_response(&reply).unwrap_or(reply).trim().to_string())
    }

    /// Replace the transcript with the recap.
    pub fn compact(&mut self, summary: &str) {
        self.conv.reset_with_summary(summary);
        self.executed.clear();
    }

    #[cfg(test)]
    pub(crate) fn transcript_len(&self) -> usize {
        self.conv.len()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use super::*;
    use crate::executor::command::Command;
    use crate::llm::providers::scripted::ScriptedProvider;
    use crate::llm::registry::ExpertRole;
    use crate::llm::types::CallConfig;

    fn snapshot() -> PerceptionSnapshot {
        let mut png = Vec::new();
        image::DynamicImage::new_rgb8(8, 8)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        PerceptionSnapshot {
            raw_image: png.clone(),
            annotated_image: png,
            regions: Vec::new(),
            width: 1920,
            height: 1080,
        }
    }

    fn action(replies: &[&str]) -> (ActionCoordinator, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::with_replies("actor", replies.iter().copied()));
        let client = RoleClient::new(
            ExpertRole::Action,
            provider.clone(),
            CallConfig {
                model: "m".into(),
                stream: false,
                temperature: 0.0,
            },
        );
        let mut coordinator = ActionCoordinator::new(client, 24);
        coordinator.set_context("Open the text editor");
        coordinator.set_instruction("Open the text editor");
        (coordinator, provider)
    }

    #[tokio::test]
    async fn single_command_is_returned() {
        let (mut action, provider) = action(&["The desktop is empty.", "RESPONSE: pyautogui.hotkey('ctrl', 'alt', 't')"]);
        let outcome = action.execute(&snapshot(), "").await.unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::Command(Command::Hotkey {
                keys: vec!["ctrl".into(), "alt".into(), "t".into()]
            })
        );
        assert_eq!(action.executed().len(), 1);
        let first = &provider.requests()[0];
        assert!(first.last().unwrap().has_images());
    }

    #[tokio::test]
    async fn feedback_reaches_the_oracle() {
        let (mut action, provider) = action(&["...", "RESPONSE: pyautogui.click(5, 5)"]);
        action.execute(&snapshot(), "clicked the wrong icon").await.unwrap();
        let prompt = provider.requests()[0].last().unwrap().text();
        assert!(prompt.contains("clicked the wrong icon"));
    }

    #[tokio::test]
    async fn malformed_reply_becomes_error_outcome() {
        let (mut action, _) = action(&["...", "I would click the button"]);
        match action.execute(&snapshot(), "").await.unwrap() {
            ExecutionOutcome::Error(reason) => assert!(reason.starts_with("malformed oracle response")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(action.executed().is_empty());
    }

    #[tokio::test]
    async fn two_commands_are_a_protocol_violation() {
        let (mut action, _) = action(&["...", "RESPONSE: pyautogui.click(1, 1)\npyautogui.press('enter')"]);
        assert!(matches!(action.execute(&snapshot(), "").await.unwrap(), ExecutionOutcome::Error(_)));
    }

    #[tokio::test]
    async fn off_screen_command_is_rejected() {
        let (mut action, _) = action(&["...", "RESPONSE: pyautogui.click(5000, 10)"]);
        assert!(matches!(action.execute(&snapshot(), "").await.unwrap(), ExecutionOutcome::Error(_)));
    }

    #[tokio::test]
    async fn finish_and_error_markers() {
        let (mut action, _) = action(&["...", "RESPONSE: FINISH", "...", "RESPONSE: ERROR: no editor icon"]);
        assert_eq!(action.execute(&snapshot(), "").await.unwrap(), ExecutionOutcome::Finished);
        assert_eq!(
            action.execute(&snapshot(), "").await.unwrap(),
            ExecutionOutcome::Error("no editor icon".into())
        );
    }

    #[tokio::test]
    async fn summarize_then_compact_bounds_the_transcript() {
        let (mut action, provider) = action(&["...", "RESPONSE: pyautogui.click(1, 1)", "Opened the terminal."]);
        action.execute(&snapshot(), "").await.unwrap();
        let summary = action.summarize().await.unwrap();
        assert_eq!(summary, "Opened the terminal.");
        action.compact(&summary);
        assert_eq!(action.transcript_len(), 1);
        assert!(action.executed().is_empty());
        assert_eq!(action.summarize().await.unwrap(), "");
        assert_eq!(provider.call_count(), 3);
    }
}
