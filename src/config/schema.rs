use serde::Deserialize;
use std::path::PathBuf;

use crate::team::AgentSpec;

/// The TOML file structure for huddle.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub general: Option<GeneralConfig>,
    pub team: Option<TeamConfig>,
    pub session: Option<SessionConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    pub model: Option<String>,
    pub state_file: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TeamConfig {
    pub manager_id: Option<String>,
    pub manager_role: Option<String>,
    pub max_iterations: Option<usize>,
    /// If specified, fully replaces the default reserved ids.
    pub external_ids: Option<Vec<String>>,
    /// If specified, fully replaces the default worker list.
    pub workers: Option<Vec<WorkerEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerEntry {
    pub id: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    pub max_turns: Option<u32>,
    pub token_limit: Option<u64>,
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: String,
    pub state_file: PathBuf,
    pub manager: AgentSpec,
    pub workers: Vec<AgentSpec>,
    pub max_iterations: usize,
    pub external_ids: Vec<String>,
    pub max_turns: u32,
    pub token_limit: Option<u64>,
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub model: Option<String>,
    pub state_file: Option<PathBuf>,
    pub manager_id: Option<String>,
    pub manager_role: Option<String>,
    pub workers: Option<Vec<AgentSpec>>,
    pub max_iterations: Option<usize>,
    pub external_ids: Option<Vec<String>>,
    pub max_turns: Option<u32>,
    pub token_limit: Option<u64>,
}

impl ConfigFile {
    /// Flatten the file's sections into a mergeable layer.
    pub fn to_partial(&self) -> PartialConfig {
        let general = self.general.as_ref();
        let team = self.team.as_ref();
        let session = self.session.as_ref();

        PartialConfig {
            model: general.and_then(|g| g.model.clone()),
            state_file: general.and_then(|g| g.state_file.as_ref().map(PathBuf::from)),
            manager_id: team.and_then(|t| t.manager_id.clone()),
            manager_role: team.and_then(|t| t.manager_role.clone()),
            workers: team.and_then(|t| t.workers.as_ref()).map(|workers| {
                workers
                    .iter()
                    .map(|w| {
                        AgentSpec::new(
                            w.id.clone(),
                            w.role.clone().unwrap_or_else(|| "worker".to_string()),
                        )
                    })
                    .collect()
            }),
            max_iterations: team.and_then(|t| t.max_iterations),
            external_ids: team.and_then(|t| t.external_ids.clone()),
            max_turns: session.and_then(|s| s.max_turns),
            token_limit: session.and_then(|s| s.token_limit),
        }
    }
}
