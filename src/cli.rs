use std::path::PathBuf;

use clap::Parser;

/// Replay screenshots through one Barry episode.
#[derive(Parser, Debug)]
#[command(name = "barry", version, about)]
pub struct Cli {
    /// Natural-language task for the episode.
    pub task: String,

    /// Screenshot files, one per step, in order.
    #[arg(required = true)]
    pub screenshots: Vec<PathBuf>,

    /// Explicit config file instead of the `config.toml` lookup.
    #[arg(long)]
    pub config: Option<PathBuf>,
}
