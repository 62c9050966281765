use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, LlmConfig, RoleEntry};
use crate::errors::{BarryError, BarryResult};
use crate::llm::conversation::RoleClient;
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::retry::RetryPolicy;
use crate::llm::types::CallConfig;

/// The four cooperating experts. Each may be mapped to its own model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpertRole {
    Planning,
    Action,
    Reflection,
    Error,
}

impl ExpertRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpertRole::Planning => "planning",
            ExpertRole::Action => "action",
            ExpertRole::Reflection => "reflection",
            ExpertRole::Error => "error",
        }
    }
}

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn new(active: String) -> Self {
        Self {
            providers: HashMap::new(),
            active,
            llm_config: LlmConfig::default(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> BarryResult<Arc<dyn LlmProvider>> {
        self.providers.get(&self.active).cloned().ok_or_else(|| {
            BarryError::Config(format!("Active provider '{}' not found in registry", self.active))
        })
    }

    pub fn list_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    fn role_entry(&self, role: ExpertRole) -> Option<&RoleEntry> {
        let roles = &self.llm_config.roles;
        match role {
            ExpertRole::Planning => roles.planning.as_ref(),
            ExpertRole::Action => roles.action.as_ref(),
            ExpertRole::Reflection => roles.reflection.as_ref(),
            ExpertRole::Error => roles.error.as_ref(),
        }
    }

    /// Return the provider and call configuration for an expert role.
    ///
    /// Role resolution order:
    /// 1. `[llm.roles.<role>]` in config.toml
    /// 2. Fallback: active provider with its default model / temperature, no streaming
    pub fn call_config_for_role(
        &self,
        role: ExpertRole,
    ) -> BarryResult<(Arc<dyn LlmProvider>, CallConfig)> {
        if let Some(entry) = self.role_entry(role) {
            let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
                BarryError::Config(format!(
                    "Role '{}' references unknown provider '{}'",
                    role.as_str(),
                    entry.provider
                ))
            })?;
            let temperature = entry.temperature.unwrap_or_else(|| {
                self.llm_config
                    .providers
                    .get(&entry.provider)
                    .map(|p| p.temperature)
                    .unwrap_or(0.1)
            });
            tracing::debug!(
                role = role.as_str(),
                provider = %entry.provider,
                model = %entry.model,
                stream = entry.stream,
                temperature,
                "resolved role config"
            );
            return Ok((
                provider,
                CallConfig {
                    model: entry.model.clone(),
                    stream: entry.stream,
                    temperature,
                },
            ));
        }

        let provider = self.get_active()?;
        let (model, temperature) = self
            .llm_config
            .providers
            .get(&self.active)
            .map(|p| (p.model.clone(), p.temperature))
            .unwrap_or_else(|| (String::new(), 0.1));
        tracing::debug!(
            role = role.as_str(),
            provider = %self.active,
            model = %model,
            "role not configured, using active provider fallback"
        );
        Ok((
            provider,
            CallConfig {
                model,
                stream: false,
                temperature,
            },
        ))
    }

    pub fn client_for_role(&self, role: ExpertRole) -> BarryResult<RoleClient> {
        let (provider, cfg) = self.call_config_for_role(role)?;
        Ok(RoleClient::new(role, provider, cfg))
    }

    /// Build a registry from the loaded app config.
    /// API keys are read from environment variables named `BARRY_<ID>_API_KEY`.
    pub fn from_config(config: &AppConfig) -> BarryResult<Self> {
        let mut registry = Self {
            providers: HashMap::new(),
            active: config.llm.active_provider.clone(),
            llm_config: config.llm.clone(),
        };
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(format!("BARRY_{}_API_KEY", id.to_uppercase()))
                .unwrap_or_else(|_| entry.api_key.clone().unwrap_or_default());
            if api_key.is_empty() {
                tracing::warn!(provider = %id, "no API key configured");
            }
            let provider = OpenAiCompatibleProvider::new(id.clone(), entry.api_base.clone(), api_key)
                .with_timeout(Duration::from_secs(entry.timeout_secs))?
                .with_retry(RetryPolicy::new(entry.max_retries, entry.retry_base_delay_ms));
            registry.register(Arc::new(provider));
        }
        Ok(registry)
    }
}
