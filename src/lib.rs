pub mod agent_engine;
pub mod cli;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod perception;

use std::sync::Arc;
use std::time::Duration;

use crate::agent_engine::engine::BarryAgent;
use crate::agent_engine::state::Observation;
use crate::cli::Cli;
use crate::errors::BarryResult;
use crate::llm::registry::ProviderRegistry;
use crate::perception::omniparser::OmniparserClient;

/// Replay a sequence of screenshots through one episode and print what the
/// agent would execute after each of them.
pub async fn run(cli: Cli) -> BarryResult<()> {
    let Cli {
        task,
        screenshots,
        config: config_path,
    } = cli;

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config_path {
        Some(path) => config::load_config_from(&path)?,
        None => config::load_config()?,
    };
    let registry = ProviderRegistry::from_config(&config)?;
    tracing::info!(providers = ?registry.list_names(), "provider registry ready");

    let backend = Arc::new(OmniparserClient::new(
        &config.perception.server_url,
        Duration::from_secs(config.perception.timeout_secs),
    )?);
    let mut agent = BarryAgent::from_config(&config, &registry, backend)?;
    if let Some(path) = agent.history_path() {
        tracing::info!(path = %path.display(), "recording trajectory");
    }

    for path in screenshots {
        let screenshot = tokio::fs::read(&path).await?;
        let prediction = agent.predict(&task, &Observation::new(screenshot)).await;
        println!("[{}] {}", path.display(), prediction.message);
        for command in &prediction.commands {
            println!("{command}");
        }
        if agent.is_finished() {
            break;
        }
    }
    Ok(())
}
