use super::schema::{AppConfig, PartialConfig};
use crate::agent::genai_runtime::DEFAULT_MAX_TURNS;
use crate::team::AgentSpec;
use crate::team::coordinator::{DEFAULT_EXTERNAL_IDS, DEFAULT_MAX_ITERATIONS};
use std::path::PathBuf;

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence.
    /// For workers and external_ids: REPLACE semantics (if self has Some, use it entirely).
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            model: self.model.or(fallback.model),
            state_file: self.state_file.or(fallback.state_file),
            manager_id: self.manager_id.or(fallback.manager_id),
            manager_role: self.manager_role.or(fallback.manager_role),
            workers: self.workers.or(fallback.workers),
            max_iterations: self.max_iterations.or(fallback.max_iterations),
            external_ids: self.external_ids.or(fallback.external_ids),
            max_turns: self.max_turns.or(fallback.max_turns),
            token_limit: self.token_limit.or(fallback.token_limit),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    pub fn finalize(self) -> AppConfig {
        let manager = AgentSpec::new(
            self.manager_id.unwrap_or_else(|| "manager".to_string()),
            self.manager_role.unwrap_or_else(|| "manager".to_string()),
        );

        AppConfig {
            model: self.model.unwrap_or_else(|| "llama3.2".to_string()),
            state_file: self
                .state_file
                .unwrap_or_else(|| PathBuf::from("./huddle-state.json")),
            manager,
            workers: self
                .workers
                .unwrap_or_else(|| vec![AgentSpec::new("worker-1", "worker")]),
            max_iterations: self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
            external_ids: self.external_ids.unwrap_or_else(|| {
                DEFAULT_EXTERNAL_IDS.iter().map(|s| s.to_string()).collect()
            }),
            max_turns: self.max_turns.unwrap_or(DEFAULT_MAX_TURNS),
            token_limit: self.token_limit,
        }
    }
}
