use std::sync::Arc;

use crate::agent_engine::action::ActionCoordinator;
use crate::agent_engine::error_expert::ErrorCoordinator;
use crate::agent_engine::history::{HistoryEntry, SessionHistory};
use crate::agent_engine::loop_control::LoopController;
use crate::agent_engine::planning::PlanningCoordinator;
use crate::agent_engine::reflection::ReflectionCoordinator;
use crate::agent_engine::state::{
    EpisodeState, ExecutionOutcome, Observation, Phase, Prediction, ReflectionVerdict,
};
use crate::config::{AgentConfig, AppConfig, HistoryConfig};
use crate::errors::{BarryError, BarryResult};
use crate::executor::command::Command;
use crate::llm::conversation::RoleClient;
use crate::llm::registry::{ExpertRole, ProviderRegistry};
use crate::perception::pipeline::PerceptionAdapter;
use crate::perception::traits::PerceptionBackend;
use crate::perception::types::PerceptionSnapshot;

/// One oracle client per expert role.
#[derive(Clone)]
pub struct ExpertClients {
    pub planning: RoleClient,
    pub action: RoleClient,
    pub reflection: RoleClient,
    pub error: Option<RoleClient>,
}

impl ExpertClients {
    pub fn from_registry(registry: &ProviderRegistry, use_error_expert: bool) -> BarryResult<Self> {
        Ok(Self {
            planning: registry.client_for_role(ExpertRole::Planning)?,
            action: registry.client_for_role(ExpertRole::Action)?,
            reflection: registry.client_for_role(ExpertRole::Reflection)?,
            error: if use_error_expert {
                Some(registry.client_for_role(ExpertRole::Error)?)
            } else {
                None
            },
        })
    }
}

/// How a `predict` call ended.
enum StepEnd {
    Commands(Vec<Command>),
    Done,
    /// Terminal failure of the whole episode.
    Failed(String),
    /// This step produced nothing; the next call resumes at `resume`.
    Stalled { resume: Phase, reason: String },
}

/// Everything that belongs to one episode. Built fresh on every reset and
/// never shared between episodes.
struct Episode {
    task: Option<String>,
    state: EpisodeState,
    /// Phase the next `predict` call starts from.
    resume: Phase,
    planning: PlanningCoordinator,
    action: ActionCoordinator,
    reflection: ReflectionCoordinator,
    error: Option<ErrorCoordinator>,
    budget: LoopController,
    max_attempts_per_step: u32,
    history: Option<SessionHistory>,
}

impl Episode {
    fn new(config: &AgentConfig, history: &HistoryConfig, clients: &ExpertClients) -> Self {
        let window = config.conversation_window;
        Self {
            task: None,
            state: EpisodeState::default(),
            resume: Phase::Start,
            planning: PlanningCoordinator::new(clients.planning.clone(), window, config.max_decompose_attempts),
            action: ActionCoordinator::new(clients.action.clone(), window),
            reflection: ReflectionCoordinator::new(
                clients.reflection.clone(),
                window,
                config.minor_retry_tolerance,
            ),
            error: clients.error.clone().map(ErrorCoordinator::new),
            budget: LoopController::new(config.max_trajectory_length),
            max_attempts_per_step: config.max_attempts_per_step,
            history: history
                .enabled
                .then(|| SessionHistory::new(history.dir.as_deref())),
        }
    }

    /// Drive the decision graph from `start` until the step ends.
    async fn run_step(&mut self, start: Phase, task: &str, snapshot: &PerceptionSnapshot, trace: &mut Vec<String>) -> StepEnd {
        let mut phase = start;
        let mut executions = 0u32;
        loop {
            trace.push(phase.name().to_string());
            tracing::debug!(step = self.state.step_count, phase = phase.name(), "transition");

            match phase {
                Phase::Continue(commands) => return StepEnd::Commands(commands),
                Phase::Done => return StepEnd::Done,
                Phase::Failed(reason) => return StepEnd::Failed(reason),
                Phase::Execute { .. } if executions >= self.max_attempts_per_step => {
                    return StepEnd::Stalled {
                        reason: format!("no command after {executions} attempts this step"),
                        resume: phase,
                    };
                }
                _ => {}
            }
            if matches!(phase, Phase::Execute { .. }) {
                executions += 1;
            }

            let current = phase.clone();
            phase = match self.transition(phase, task, snapshot).await {
                Ok(next) => next,
                Err(BarryError::Protocol(e)) => {
                    tracing::warn!(phase = current.name(), error = %e, "oracle kept violating the reply format");
                    return StepEnd::Stalled {
                        reason: format!("{} failed: {e}", current.name()),
                        resume: current,
                    };
                }
                Err(e) => {
                    tracing::error!(phase = current.name(), error = %e, "episode aborted");
                    Phase::Failed(e.to_string())
                }
            };
        }
    }

    async fn transition(&mut self, phase: Phase, task: &str, snapshot: &PerceptionSnapshot) -> BarryResult<Phase> {
        match phase {
            // ── First step: build a plan from scratch ──────────────────────
            Phase::Start => Ok(Phase::Planning),

            Phase::Planning => {
                self.planning.decompose_task(task, snapshot).await?;
                Ok(Phase::Decompose)
            }

            // ── Drop the remaining plan and plan again ─────────────────────
            Phase::Replanning { feedback } => {
                let summary = self.action.summarize().await?;
                if !summary.is_empty() {
                    self.planning.set_progress_summary(&summary);
                    self.action.compact(&summary);
                }
                self.planning.replan(&feedback, snapshot).await?;
                Ok(Phase::Decompose)
            }

            Phase::Decompose => {
                let instructions = self.planning.decompose_subtask(snapshot).await?;
                let subtask = self.planning.current_subtask().unwrap_or(task).to_string();
                let first = instructions[0].clone();
                self.reflection.install(instructions)?;
                self.action.set_context(&subtask);
                self.action.set_instruction(&first);
                self.state.retry_count_for_current_minor_error = 0;
                Ok(Phase::Execute { feedback: String::new() })
            }

            // ── One oracle-driven action ───────────────────────────────────
            Phase::Execute { feedback } => match self.action.execute(snapshot, &feedback).await? {
                ExecutionOutcome::Command(cmd) => {
                    self.reflection
                        .note_execution(&format!("{} -> {}", self.action.instruction(), cmd.render()));
                    Ok(Phase::Continue(vec![cmd]))
                }
                ExecutionOutcome::Finished => {
                    if let Some(diagnosis) = self.reflection.withdraw_patch() {
                        // The patch had nothing to do: retry the instruction it was patching.
                        let original = self.reflection.current().unwrap_or(task).to_string();
                        tracing::info!(instruction = %original, "patch needs no action, retrying instruction");
                        self.action.set_instruction(&original);
                        Ok(Phase::Execute { feedback: diagnosis })
                    } else if self.reflection.is_unconfirmed() {
                        Ok(Phase::Reflect { execution_error: None })
                    } else {
                        Ok(Phase::Accept)
                    }
                }
                ExecutionOutcome::Error(reason) => Ok(Phase::Reflect {
                    execution_error: Some(reason),
                }),
            },

            // ── Judge the previous execution ───────────────────────────────
            Phase::Reflect { execution_error } => {
                if execution_error.is_none() && self.reflection.evaluate(snapshot).await? {
                    return Ok(Phase::Accept);
                }
                let verdict = self
                    .reflection
                    .classify_failure(task, snapshot, execution_error.as_deref())
                    .await?;
                self.state.retry_count_for_current_minor_error = self.reflection.minor_streak();
                Ok(Phase::Escalate(verdict))
            }

            Phase::Accept => {
                self.state.retry_count_for_current_minor_error = 0;
                if !self.reflection.is_last() {
                    let next = self.reflection.advance()?;
                    self.action.set_instruction(&next);
                    return Ok(Phase::Execute { feedback: String::new() });
                }
                let done = self.planning.is_task_done(snapshot).await?;
                self.planning.complete_current_subtask();
                if done {
                    Ok(Phase::Done)
                } else {
                    Ok(Phase::Replanning { feedback: String::new() })
                }
            }

            // ── Failure recovery ───────────────────────────────────────────
            Phase::Escalate(ReflectionVerdict::Success) => Ok(Phase::Accept),

            Phase::Escalate(ReflectionVerdict::MinorFailure { diagnosis, .. }) => {
                let patch = self.reflection.create_patch_instruction(snapshot).await?;
                self.action.set_instruction(&patch);
                Ok(Phase::Execute { feedback: diagnosis })
            }

            Phase::Escalate(ReflectionVerdict::MajorFailure { diagnosis }) => {
                self.state.retry_count_for_current_minor_error = 0;
                let mut feedback = diagnosis.clone();
                if let Some(expert) = &self.error {
                    let subtask = self.planning.current_subtask().unwrap_or(task).to_string();
                    match expert.advise(task, &subtask, &diagnosis, snapshot).await {
                        Ok(advice) if !advice.is_empty() => {
                            feedback.push_str("\nSuggested approach: ");
                            feedback.push_str(&advice);
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "error expert unavailable, replanning on the diagnosis alone"),
                    }
                }
                Ok(Phase::Replanning { feedback })
            }

            other @ (Phase::Continue(_) | Phase::Done | Phase::Failed(_)) => Ok(other),
        }
    }

    fn record(&self, task: &str, trace: &[String], prediction: &Prediction) {
        if let Some(history) = &self.history {
            history.record(&HistoryEntry {
                ts: chrono::Utc::now(),
                step: self.state.step_count,
                task: task.to_string(),
                trace: trace.to_vec(),
                message: prediction.message.clone(),
                commands: prediction.commands.clone(),
            });
        }
    }
}

/// The multi-expert agent. One `predict` call per environment observation.
pub struct BarryAgent {
    config: AgentConfig,
    history_config: HistoryConfig,
    clients: ExpertClients,
    perception: PerceptionAdapter,
    episode: Episode,
    last_trace: Vec<String>,
}

impl BarryAgent {
    pub fn new(
        config: AgentConfig,
        history_config: HistoryConfig,
        clients: ExpertClients,
        backend: Arc<dyn PerceptionBackend>,
    ) -> Self {
        let episode = Episode::new(&config, &history_config, &clients);
        Self {
            config,
            history_config,
            clients,
            perception: PerceptionAdapter::new(backend),
            episode,
            last_trace: Vec::new(),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        registry: &ProviderRegistry,
        backend: Arc<dyn PerceptionBackend>,
    ) -> BarryResult<Self> {
        let clients = ExpertClients::from_registry(registry, config.agent.use_error_expert)?;
        Ok(Self::new(config.agent.clone(), config.history.clone(), clients, backend))
    }

    /// Start a new episode: fresh counters and fresh coordinators.
    pub fn reset(&mut self) {
        tracing::info!("episode reset");
        self.episode = Episode::new(&self.config, &self.history_config, &self.clients);
        self.last_trace.clear();
    }

    pub async fn predict(&mut self, task: &str, observation: &Observation) -> Prediction {
        let mut trace = Vec::new();
        let prediction = self.step(task, observation, &mut trace).await;
        let ep = &self.episode;
        ep.record(ep.task.as_deref().unwrap_or(task), &trace, &prediction);
        tracing::info!(
            step = ep.state.step_count,
            trace = %trace.join(" > "),
            commands = ?prediction.commands,
            "step finished"
        );
        self.last_trace = trace;
        prediction
    }

    async fn step(&mut self, task: &str, observation: &Observation, trace: &mut Vec<String>) -> Prediction {
        let ep = &mut self.episode;

        // ── Terminal states are sticky until reset ─────────────────────────
        match &ep.resume {
            Phase::Done => return Prediction::done("task already completed"),
            Phase::Failed(reason) => return Prediction::fail(format!("episode failed: {reason}")),
            _ => {}
        }

        let task = match &ep.task {
            Some(current) => {
                if current != task {
                    tracing::warn!(current = %current, requested = %task, "task is fixed for the episode, ignoring new task");
                }
                current.clone()
            }
            None => {
                tracing::info!(task = %task, "episode started");
                ep.task = Some(task.to_string());
                task.to_string()
            }
        };

        let within_budget = ep.budget.begin_step();
        ep.state.step_count = ep.budget.steps();
        if !within_budget {
            tracing::warn!(step = ep.state.step_count, max = ep.budget.max_steps(), "step budget exhausted");
            trace.push(Phase::Failed(String::new()).name().to_string());
            ep.resume = Phase::Failed("budget_exceeded".into());
            return Prediction::fail("budget_exceeded");
        }

        let snapshot = match self.perception.observe(&observation.screenshot).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(step = ep.state.step_count, error = %e, "perception failed, step skipped");
                return Prediction::fail(format!("perception unavailable: {e}"));
            }
        };

        let start = std::mem::replace(&mut ep.resume, Phase::Start);
        let end = ep.run_step(start, &task, &snapshot, trace).await;

        let prediction = match end {
            StepEnd::Commands(commands) => {
                ep.resume = Phase::Reflect { execution_error: None };
                Prediction::commands(format!("step {}", ep.state.step_count), &commands)
            }
            StepEnd::Done => {
                ep.state.done = true;
                ep.resume = Phase::Done;
                Prediction::done("task completed")
            }
            StepEnd::Failed(reason) => {
                let prediction = Prediction::fail(format!("episode failed: {reason}"));
                ep.resume = Phase::Failed(reason);
                prediction
            }
            StepEnd::Stalled { resume, reason } => {
                ep.resume = resume;
                Prediction::fail(reason)
            }
        };
        ep.state.is_first_step = matches!(ep.resume, Phase::Start | Phase::Planning);
        prediction
    }

    /// The episode reached `Done` or `Failed` and only answers sentinels
    /// until reset.
    pub fn is_finished(&self) -> bool {
        self.episode.resume.is_terminal()
    }

    pub fn last_trace(&self) -> &[String] {
        &self.last_trace
    }

    pub fn episode_state(&self) -> &EpisodeState {
        &self.episode.state
    }

    pub fn task(&self) -> Option<&str> {
        self.episode.task.as_deref()
    }

    pub fn instruction_list(&self) -> &[String] {
        self.episode.reflection.instructions()
    }

    pub fn cursor(&self) -> usize {
        self.episode.reflection.cursor()
    }

    pub fn current_instruction(&self) -> &str {
        self.episode.action.instruction()
    }

    pub fn current_subtask(&self) -> Option<&str> {
        self.episode.planning.current_subtask()
    }

    pub fn completed_subtasks(&self) -> &[String] {
        self.episode.planning.completed_subtasks()
    }

    pub fn history_path(&self) -> Option<&std::path::Path> {
        self.episode.history.as_ref().map(SessionHistory::path)
    }
}
