use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::team::AgentSpec;

#[derive(Parser, Debug)]
#[command(name = "huddle", version, about = "Coordinate a manager and a team of LLM workers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a new team working toward a goal
    Run {
        /// The goal the manager is responsible for
        #[arg(short, long)]
        goal: String,

        /// Model name (e.g., "llama3.2", "qwen2.5:7b")
        #[arg(short, long)]
        model: Option<String>,

        /// Path to config file (overrides ./huddle.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Team state file
        #[arg(short, long)]
        state: Option<PathBuf>,

        /// Maximum run loop iterations
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Worker as `id` or `id:role`; repeatable, replaces configured workers
        #[arg(short, long = "worker")]
        workers: Vec<String>,

        /// Skip the Ollama readiness check
        #[arg(long)]
        no_check: bool,
    },
    /// Resume a team from its state file
    Resume {
        /// Model name
        #[arg(short, long)]
        model: Option<String>,

        /// Path to config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Team state file
        #[arg(short, long)]
        state: Option<PathBuf>,

        /// Maximum run loop iterations
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Skip the Ollama readiness check
        #[arg(long)]
        no_check: bool,
    },
    /// Answer a pending question addressed to someone outside the team
    Reply {
        /// Id of the ask being answered (e.g., M-0003)
        #[arg(long)]
        message_id: String,

        /// Reply text
        #[arg(long)]
        content: String,

        /// Path to config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Team state file
        #[arg(short, long)]
        state: Option<PathBuf>,
    },
    /// Print tasks, messages and agents from the state file
    Status {
        /// Path to config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Team state file
        #[arg(short, long)]
        state: Option<PathBuf>,
    },
}

/// Parse a `--worker` value of the form `id` or `id:role`.
pub fn parse_worker(spec: &str) -> Result<AgentSpec, ConfigError> {
    let (id, role) = match spec.split_once(':') {
        Some((id, role)) => (id.trim(), role.trim()),
        None => (spec.trim(), "worker"),
    };
    if id.is_empty() || role.is_empty() {
        return Err(ConfigError::InvalidWorker(spec.to_string()));
    }
    Ok(AgentSpec::new(id, role))
}
