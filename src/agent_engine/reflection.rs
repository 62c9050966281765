use crate::agent_engine::prompts;
use crate::agent_engine::state::ReflectionVerdict;
use crate::errors::{BarryError, BarryResult};
use crate::llm::conversation::{Conversation, RoleClient};
use crate::llm::protocol::{self, Severity};
use crate::llm::types::ContentPart;
use crate::perception::types::PerceptionSnapshot;

/// Reflection expert. Owns the instruction list and the cursor into it, and
/// decides after every execution whether to advance, patch or escalate.
pub struct ReflectionCoordinator {
    client: RoleClient,
    conv: Conversation,
    instructions: Vec<String>,
    cursor: usize,
    last_action: String,
    /// Consecutive minor failures of the instruction at `cursor`.
    minor_streak: u32,
    tolerance: u32,
    pending_minor: Option<(String, Option<String>)>,
    /// The instruction at `cursor` was judged unsatisfied and has not been
    /// confirmed since.
    unconfirmed: bool,
}

impl ReflectionCoordinator {
    pub fn new(client: RoleClient, window: usize, tolerance: u32) -> Self {
        Self {
            client,
            conv: Conversation::new(Some(prompts::REFLECTION_SYSTEM.to_string()), window),
            instructions: Vec::new(),
            cursor: 0,
            last_action: String::new(),
            minor_streak: 0,
            tolerance,
            pending_minor: None,
            unconfirmed: false,
        }
    }

    /// Replace the list and restart at its first element.
    pub fn install(&mut self, instructions: Vec<String>) -> BarryResult<()> {
        if instructions.is_empty() {
            return Err(BarryError::Agent("cannot install an empty instruction list".into()));
        }
        tracing::info!(count = instructions.len(), first = %instructions[0], "instruction list installed");
        self.instructions = instructions;
        self.cursor = 0;
        self.minor_streak = 0;
        self.pending_minor = None;
        self.unconfirmed = false;
        self.conv.clear();
        Ok(())
    }

    pub fn instructions(&self) -> &[String] {
        &self.instructions
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> Option<&str> {
        self.instructions.get(self.cursor).map(String::as_str)
    }

    pub fn minor_streak(&self) -> u32 {
        self.minor_streak
    }

    pub fn is_last(&self) -> bool {
        self.cursor + 1 >= self.instructions.len()
    }

    /// Step to the next instruction and return it. Calling this on the last
    /// instruction is a caller bug.
    pub fn advance(&mut self) -> BarryResult<String> {
        if self.is_last() {
            return Err(BarryError::Agent(format!(
                "advance past the final instruction (cursor {} of {})",
                self.cursor,
                self.instructions.len()
            )));
        }
        self.cursor += 1;
        self.minor_streak = 0;
        self.pending_minor = None;
        self.unconfirmed = false;
        let next = self.instructions[self.cursor].clone();
        tracing::debug!(cursor = self.cursor, instruction = %next, "cursor advanced");
        Ok(next)
    }

    pub fn is_unconfirmed(&self) -> bool {
        self.unconfirmed
    }

    /// Drop the patch for the last minor failure and return its diagnosis.
    /// `None` when no patch is in flight.
    pub fn withdraw_patch(&mut self) -> Option<String> {
        self.pending_minor.take().map(|(diagnosis, _)| diagnosis)
    }

    /// Remember what was sent to the screen, for the next evaluation.
    pub fn note_execution(&mut self, description: &str) {
        self.last_action = description.to_string();
    }

    /// Did the last execution bring about the current instruction's end state?
    /// A reply that does not decode counts as "no".
    pub async fn evaluate(&mut self, snapshot: &PerceptionSnapshot) -> BarryResult<bool> {
        let instruction = self.current().unwrap_or_default().to_string();
        let expectation = prompts::reflection_expectation(&instruction, &self.last_action, &snapshot.describe_regions());
        self.client
            .ask(
                &mut self.conv,
                vec![
                    ContentPart::text(expectation),
                    ContentPart::image(snapshot.raw_data_url()),
                    ContentPart::image(snapshot.annotated_data_url()),
                ],
            )
            .await?;
        let reply = self
            .client
            .ask(&mut self.conv, vec![ContentPart::text(prompts::REFLECTION_JUDGEMENT)])
            .await?;
        let success = match protocol::parse_yes_no(&reply) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "evaluation reply rejected, treating as not satisfied");
                false
            }
        };
        tracing::info!(cursor = self.cursor, instruction = %instruction, success, "instruction evaluated");
        if success {
            self.unconfirmed = false;
        }
        Ok(success)
    }

    /// Minor or Major. The oracle's severity is overridden to Major once the
    /// same instruction has failed minor more than `tolerance` times in a row.
    pub async fn classify_failure(
        &mut self,
        task: &str,
        snapshot: &PerceptionSnapshot,
        execution_error: Option<&str>,
    ) -> BarryResult<ReflectionVerdict> {
        self.unconfirmed = true;
        let instruction = self.current().unwrap_or_default().to_string();
        let prompt = prompts::classify_failure(task, &instruction, execution_error, &snapshot.describe_regions());
        let mut parts = vec![ContentPart::text(prompt)];
        if execution_error.is_some() {
            // Nothing was executed, so the evaluation turn did not show the screen.
            parts.push(ContentPart::image(snapshot.annotated_data_url()));
        }
        let reply = self.client.ask(&mut self.conv, parts).await?;

        let severity = protocol::parse_verdict(&reply).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "classification reply rejected, treating as major");
            Severity::Major(reply.trim().to_string())
        });

        let verdict = match severity {
            Severity::Minor(text) => {
                self.minor_streak += 1;
                if self.minor_streak > self.tolerance {
                    tracing::warn!(
                        instruction = %instruction,
                        streak = self.minor_streak,
                        "minor failure repeated past tolerance, escalating"
                    );
                    ReflectionVerdict::MajorFailure {
                        diagnosis: format!(
                            "{text} (minor fixes failed {} times in a row)",
                            self.minor_streak
                        ),
                    }
                } else {
                    let (diagnosis, fix_hint) = split_fix_hint(&text);
                    ReflectionVerdict::MinorFailure { diagnosis, fix_hint }
                }
            }
            Severity::Major(diagnosis) => ReflectionVerdict::MajorFailure { diagnosis },
        };

        match &verdict {
            ReflectionVerdict::MinorFailure { diagnosis, fix_hint } => {
                self.pending_minor = Some((diagnosis.clone(), fix_hint.clone()));
            }
            _ => {
                self.minor_streak = 0;
                self.pending_minor = None;
            }
        }
        tracing::info!(cursor = self.cursor, verdict = verdict.label(), "failure classified");
        Ok(verdict)
    }

    /// One corrective instruction for the last minor failure. Leaves the list
    /// and cursor untouched. Falls back to the fix hint, then to the current
    /// instruction, when the reply does not decode.
    pub async fn create_patch_instruction(&mut self, snapshot: &PerceptionSnapshot) -> BarryResult<String> {
        let instruction = self.current().unwrap_or_default().to_string();
        let (diagnosis, fix_hint) = self.pending_minor.clone().unwrap_or_default();
        let prompt = prompts::patch_instruction(&instruction, &diagnosis, fix_hint.as_deref());
        let reply = self
            .client
            .ask(
                &mut self.conv,
                vec![ContentPart::text(prompt), ContentPart::image(snapshot.annotated_data_url())],
            )
            .await?;

        let patch = match protocol::extract_response(&reply) {
            Ok(payload) => payload.lines().next().unwrap_or_default().trim().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "patch reply rejected");
                fix_hint.unwrap_or_else(|| instruction.clone())
            }
        };
        tracing::info!(cursor = self.cursor, patch = %patch, "patch instruction created");
        Ok(patch)
    }
}

/// `"<diagnosis> Fix: <hint>"` → (diagnosis, Some(hint)).
fn split_fix_hint(text: &str) -> (String, Option<String>) {
    let lower = text.to_ascii_lowercase();
    match lower.find("fix:") {
        Some(pos) => {
            let diagnosis = text[..pos].trim().trim_end_matches(|c: char| matches!(c, '.' | ';' | ',')).trim().to_string();
            let hint = text[pos + 4..].trim().to_string();
            let diagnosis = if diagnosis.is_empty() { text.trim().to_string() } else { diagnosis };
            (diagnosis, (!hint.is_empty()).then_some(hint))
        }
        None => (text.trim().to_string(), None),
    }
}
