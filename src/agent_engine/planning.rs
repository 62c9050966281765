//! Planning expert: task → subtasks → instructions.
//!
//! Only the current subtask is kept as the working goal. Fresh subtask lists
//! are produced on every re-plan because the screen invalidates stale plans;
//! the completed prefix is carried separately and never regenerated.

use std::sync::OnceLock;

use regex::Regex;

use crate::agent_engine::prompts;
use crate::errors::BarryResult;
use crate::llm::conversation::{Conversation, RoleClient};
use crate::llm::protocol::{self, ProtocolError};
use crate::llm::types::ContentPart;
use crate::perception::types::PerceptionSnapshot;

pub struct PlanningCoordinator {
    client: RoleClient,
    conv: Conversation,
    max_reasks: u32,
    task: String,
    current_subtask: Option<String>,
    completed: Vec<String>,
    progress: String,
}

impl PlanningCoordinator {
    pub fn new(client: RoleClient, window: usize, max_reasks: u32) -> Self {
        Self {
            client,
            conv: Conversation::new(Some(prompts::PLANNING_SYSTEM.to_string()), window),
            max_reasks,
            task: String::new(),
            current_subtask: None,
            completed: Vec::new(),
            progress: String::new(),
        }
    }

    pub fn current_subtask(&self) -> Option<&str> {
        self.current_subtask.as_deref()
    }

    pub fn completed_subtasks(&self) -> &[String] {
        &self.completed
    }

    /// Generate the subtask list and return its first element.
    pub async fn decompose_task(&mut self, task: &str, snapshot: &PerceptionSnapshot) -> BarryResult<String> {
        self.task = task.to_string();
        let prompt = prompts::decompose_task(task, &snapshot.describe_regions(), snapshot.width, snapshot.height);
        let plan = self.ask_until(screen_parts(prompt, snapshot), protocol::parse_list).await?;
        Ok(self.adopt(plan))
    }

    pub async fn is_task_done(&mut self, snapshot: &PerceptionSnapshot) -> BarryResult<bool> {
        let just_finished = self.current_subtask.clone().unwrap_or_default();
        let prompt = prompts::is_task_done(&self.task, &self.completed, &just_finished, &snapshot.describe_regions());
        let done = self.ask_until(screen_parts(prompt, snapshot), protocol::parse_yes_no).await?;
        tracing::info!(subtask = %just_finished, done, "task completion check");
        Ok(done)
    }

    /// Move the current subtask to the completed prefix.
    pub fn complete_current_subtask(&mut self) {
        if let Some(subtask) = self.current_subtask.take() {
            tracing::info!(subtask = %subtask, "subtask completed");
            self.completed.push(subtask);
        }
    }

    /// Recap of executed actions, handed over by the action expert.
    pub fn set_progress_summary(&mut self, summary: &str) {
        if !summary.trim().is_empty() {
            self.progress = summary.trim().to_string();
        }
    }

    /// Discard the remaining plan and generate a new one. `feedback` is empty
    /// after a clean subtask completion and carries the diagnosis after a
    /// major failure.
    pub async fn replan(&mut self, feedback: &str, snapshot: &PerceptionSnapshot) -> BarryResult<String> {
        let prompt = prompts::replan(
            &self.task,
            &self.completed,
            &self.progress,
            feedback,
            &snapshot.describe_regions(),
        );
        let plan = self.ask_until(screen_parts(prompt, snapshot), protocol::parse_list).await?;
        Ok(self.adopt(plan))
    }

    /// Expand the current subtask into a non-empty instruction list with no
    /// conditional instructions.
    pub async fn decompose_subtask(&mut self, snapshot: &PerceptionSnapshot) -> BarryResult<Vec<String>> {
        let subtask = self.current_subtask.clone().unwrap_or_else(|| self.task.clone());
        let prompt = prompts::decompose_subtask(
            &self.task,
            &subtask,
            &snapshot.describe_regions(),
            snapshot.width,
            snapshot.height,
        );
        let instructions = self
            .ask_until(screen_parts(prompt, snapshot), |reply| {
                let list = protocol::parse_list(reply)?;
                if let Some(bad) = list.iter().find(|i| is_conditional(i)) {
                    return Err(ProtocolError::ConditionalInstruction(bad.clone()));
                }
                Ok(list)
            })
            .await?;
        tracing::info!(subtask = %subtask, count = instructions.len(), "subtask decomposed");
        Ok(instructions)
    }

    fn adopt(&mut self, plan: Vec<String>) -> String {
        let first = plan[0].clone();
        tracing::info!(subtask = %first, remaining = plan.len(), upcoming = ?&plan[1..], "plan updated");
        self.current_subtask = Some(first.clone());
        first
    }

    /// Ask, and re-ask with a format reminder while the reply does not decode.
    async fn ask_until<T>(
        &mut self,
        parts: Vec<ContentPart>,
        decode: impl Fn(&str) -> Result<T, ProtocolError>,
    ) -> BarryResult<T> {
        let mut parts = parts;
        let mut attempt = 0;
        loop {
            let reply = self.client.ask(&mut self.conv, parts).await?;
            match decode(&reply) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_reasks => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, "planning reply rejected, asking again");
                    parts = vec![ContentPart::text(prompts::protocol_reminder(&e))];
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn screen_parts(prompt: String, snapshot: &PerceptionSnapshot) -> Vec<ContentPart> {
    vec![ContentPart::text(prompt), ContentPart::image(snapshot.raw_data_url())]
}

fn conditional_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(if|unless|when|in case)\b|\bif\b.*\b(then|else|otherwise)\b|\botherwise\b|\bif (needed|necessary|not|possible|present|visible)\b")
            .expect("static regex")
    })
}

/// True for instructions that branch instead of committing to one action.
pub fn is_conditional(instruction: &str) -> bool {
    conditional_re().is_match(instruction)
}
