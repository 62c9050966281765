use serde::{Deserialize, Serialize};

use crate::executor::command::Command;

/// Sentinel command lists returned to the environment.
pub const DONE: &str = "DONE";
pub const FAIL: &str = "FAIL";

/// Cross-cutting counters of one episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeState {
    pub step_count: u32,
    pub is_first_step: bool,
    pub done: bool,
    pub retry_count_for_current_minor_error: u32,
}

impl Default for EpisodeState {
    fn default() -> Self {
        Self {
            step_count: 0,
            is_first_step: true,
            done: false,
            retry_count_for_current_minor_error: 0,
        }
    }
}

/// What the action expert produced for one instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Command(Command),
    Finished,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ReflectionVerdict {
    Success,
    MinorFailure {
        diagnosis: String,
        fix_hint: Option<String>,
    },
    MajorFailure {
        diagnosis: String,
    },
}

impl ReflectionVerdict {
    pub fn label(&self) -> &'static str {
        match self {
            ReflectionVerdict::Success => "success",
            ReflectionVerdict::MinorFailure { .. } => "minor",
            ReflectionVerdict::MajorFailure { .. } => "major",
        }
    }
}

/// Nodes of the per-step decision graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Start,
    Planning,
    Replanning { feedback: String },
    Decompose,
    Execute { feedback: String },
    /// Judge the last execution. `execution_error` is set when the action
    /// expert already reported an error, in which case nothing ran.
    Reflect { execution_error: Option<String> },
    Accept,
    Escalate(ReflectionVerdict),
    Continue(Vec<Command>),
    Done,
    Failed(String),
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::Planning => "planning",
            Phase::Replanning { .. } => "replanning",
            Phase::Decompose => "decompose",
            Phase::Execute { .. } => "execute",
            Phase::Reflect { .. } => "reflect",
            Phase::Accept => "accept",
            Phase::Escalate(v) => match v {
                ReflectionVerdict::MajorFailure { .. } => "escalate_major",
                _ => "escalate_minor",
            },
            Phase::Continue(_) => "continue",
            Phase::Done => "done",
            Phase::Failed(_) => "failed",
        }
    }

    /// Phases the episode never leaves until reset.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed(_))
    }
}

/// One screenshot handed over by the environment.
#[derive(Debug, Clone)]
pub struct Observation {
    pub screenshot: Vec<u8>,
}

impl Observation {
    pub fn new(screenshot: Vec<u8>) -> Self {
        Self { screenshot }
    }
}

/// Result of one `predict` call: a status message and the commands to run,
/// or one of the `DONE` / `FAIL` sentinels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub message: String,
    pub commands: Vec<String>,
}

impl Prediction {
    pub fn commands(message: impl Into<String>, commands: &[Command]) -> Self {
        Self {
            message: message.into(),
            commands: commands.iter().map(Command::render).collect(),
        }
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            commands: vec![DONE.to_string()],
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            commands: vec![FAIL.to_string()],
        }
    }

    pub fn is_done(&self) -> bool {
        self.commands.len() == 1 && self.commands[0] == DONE
    }

    pub fn is_fail(&self) -> bool {
        self.commands.len() == 1 && self.commands[0] == FAIL
    }
}
