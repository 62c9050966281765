use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{BarryError, BarryResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub perception: PerceptionConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
    /// Expert-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Full chat-completions endpoint URL.
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to env var BARRY_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Retries for transport failures, HTTP 429 and 5xx.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

/// Maps each expert to a specific provider+model combination.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Task/subtask decomposition and re-planning.
    pub planning: Option<RoleEntry>,
    /// Instruction → low-level command grounding. Must be vision-capable.
    pub action: Option<RoleEntry>,
    /// Post-execution verification and failure classification.
    pub reflection: Option<RoleEntry>,
    /// Advice on major failures.
    pub error: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    /// Use SSE streaming.
    #[serde(default)]
    pub stream: bool,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionConfig {
    /// Base URL of the Omniparser server; `/parse/` is appended.
    pub server_url: String,
    #[serde(default = "default_perception_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_perception_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard ceiling on predict calls per episode.
    #[serde(default = "default_max_trajectory_length")]
    pub max_trajectory_length: u32,
    /// Consecutive minor failures tolerated for one instruction before escalation.
    #[serde(default = "default_minor_retry_tolerance")]
    pub minor_retry_tolerance: u32,
    /// Executions attempted inside a single predict call before giving up on the step.
    #[serde(default = "default_max_attempts_per_step")]
    pub max_attempts_per_step: u32,
    /// How often a planning reply that breaks the protocol is re-asked.
    #[serde(default = "default_max_decompose_attempts")]
    pub max_decompose_attempts: u32,
    /// Messages kept per expert transcript (excluding the system prompt).
    #[serde(default = "default_conversation_window")]
    pub conversation_window: usize,
    #[serde(default = "default_true")]
    pub use_error_expert: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_trajectory_length: default_max_trajectory_length(),
            minor_retry_tolerance: default_minor_retry_tolerance(),
            max_attempts_per_step: default_max_attempts_per_step(),
            max_decompose_attempts: default_max_decompose_attempts(),
            conversation_window: default_conversation_window(),
            use_error_expert: true,
        }
    }
}

fn default_max_trajectory_length() -> u32 {
    50
}

fn default_minor_retry_tolerance() -> u32 {
    2
}

fn default_max_attempts_per_step() -> u32 {
    4
}

fn default_max_decompose_attempts() -> u32 {
    2
}

fn default_conversation_window() -> usize {
    24
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory for `session_<id>.jsonl` trajectory files.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn resolve_config_path() -> BarryResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(BarryError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> BarryResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> BarryResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let mut config = parse_config(&content)?;
    if let Ok(url) = std::env::var("OMNIPARSER_SERVER_URL") {
        if !url.trim().is_empty() {
            config.perception.server_url = url;
        }
    }
    tracing::info!(
        path = %path.display(),
        provider = %config.llm.active_provider,
        max_steps = config.agent.max_trajectory_length,
        "config loaded"
    );
    Ok(config)
}

pub fn parse_config(content: &str) -> BarryResult<AppConfig> {
    let config: AppConfig = toml::from_str(content)?;
    if config.agent.max_trajectory_length == 0 {
        return Err(BarryError::Config("agent.max_trajectory_length must be > 0".into()));
    }
    if config.agent.max_attempts_per_step == 0 {
        return Err(BarryError::Config("agent.max_attempts_per_step must be > 0".into()));
    }
    Ok(config)
}
