pub mod merge;
pub mod schema;

pub use schema::*;

use crate::cli::{Cli, Commands, parse_worker};
use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Name of the project and global config files.
pub const CONFIG_FILE_NAME: &str = "huddle.toml";

/// Load configuration by merging global, project, and CLI sources.
/// Precedence: CLI > --config file (or ./huddle.toml) > global config > defaults.
///
/// Missing config files are handled gracefully (defaults apply).
pub fn load_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    // Layer 1: Global config (~/.config/huddle/huddle.toml or platform equivalent)
    let global = load_global_config();

    // Layer 2: Explicit --config file, or huddle.toml in the current directory
    let project_path = cli_config_path(cli).unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let project = load_toml_file(&project_path).unwrap_or_default();

    // Layer 3: CLI args
    let cli_partial = cli_to_partial(cli)?;

    Ok(cli_partial
        .with_fallback(project)
        .with_fallback(global)
        .finalize())
}

/// Load global config from the platform-specific config directory.
fn load_global_config() -> PartialConfig {
    match global_config_path() {
        Some(p) => load_toml_file(&p).unwrap_or_default(),
        None => {
            tracing::debug!("Could not determine global config directory");
            PartialConfig::default()
        }
    }
}

/// Load and parse a TOML config file into a PartialConfig.
/// Returns None on file-not-found or parse errors; parse errors are logged.
fn load_toml_file(path: &Path) -> Option<PartialConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match parse_config(path, &contents) {
            Ok(config_file) => {
                tracing::info!("Loaded config from {}", path.display());
                Some(config_file.to_partial())
            }
            Err(e) => {
                tracing::warn!("{e}");
                None
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            None
        }
        Err(e) => {
            tracing::warn!("Failed to read config at {}: {}", path.display(), e);
            None
        }
    }
}

/// Parse the contents of a huddle.toml file read from `path`.
pub fn parse_config(path: &Path, contents: &str) -> Result<ConfigFile, ConfigError> {
    toml::from_str(contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/huddle/huddle.toml
/// macOS: ~/Library/Application Support/huddle/huddle.toml
fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "huddle")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn cli_config_path(cli: &Cli) -> Option<PathBuf> {
    match &cli.command {
        Commands::Run { config, .. }
        | Commands::Resume { config, .. }
        | Commands::Reply { config, .. }
        | Commands::Status { config, .. } => config.clone(),
    }
}

/// Convert CLI arguments to a PartialConfig for merging.
fn cli_to_partial(cli: &Cli) -> Result<PartialConfig, ConfigError> {
    let partial = match &cli.command {
        Commands::Run {
            model,
            state,
            max_iterations,
            workers,
            ..
        } => {
            let workers = if workers.is_empty() {
                None
            } else {
                Some(
                    workers
                        .iter()
                        .map(|w| parse_worker(w))
                        .collect::<Result<Vec<_>, _>>()?,
                )
            };
            PartialConfig {
                model: model.clone(),
                state_file: state.clone(),
                max_iterations: *max_iterations,
                workers,
                ..Default::default()
            }
        }
        Commands::Resume {
            model,
            state,
            max_iterations,
            ..
        } => PartialConfig {
            model: model.clone(),
            state_file: state.clone(),
            max_iterations: *max_iterations,
            ..Default::default()
        },
        Commands::Reply { state, .. } | Commands::Status { state, .. } => PartialConfig {
            state_file: state.clone(),
            ..Default::default()
        },
    };
    Ok(partial)
}
