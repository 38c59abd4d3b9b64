//! Persistence hooks: a JSONL event journal and a state snapshot file.
//!
//! The journal writes one self-describing JSON object per team event to
//! `{state_dir}/.huddle-logs/team-{timestamp}.jsonl`. The snapshot hook
//! rewrites the state file after every batch of transitions so an
//! interrupted run can be resumed.
//!
//! Journal writes use synchronous `std::fs`: lines are small and flushed
//! after each event.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use super::events::{TeamEvent, TeamHooks};
use super::state::TeamState;
use super::types::{Task, TeamMessage};
use crate::error::TeamError;

/// Name of the journal directory created next to the state file.
pub const LOG_DIR_NAME: &str = ".huddle-logs";

/// Current UTC time as an ISO 8601 string with milliseconds.
fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[derive(Serialize)]
struct JournalLine<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a TeamEvent,
}

/// Append-only JSONL journal of team events.
pub struct TeamJournal {
    writer: Mutex<BufWriter<fs::File>>,
    log_path: PathBuf,
}

impl TeamJournal {
    /// Create a journal in `{state_dir}/.huddle-logs/`.
    ///
    /// The file is named `team-{ISO8601}.jsonl` with colons replaced by
    /// dashes.
    pub fn new(state_dir: &Path) -> anyhow::Result<Self> {
        let log_dir = state_dir.join(LOG_DIR_NAME);
        fs::create_dir_all(&log_dir)?;

        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string();
        let log_path = log_dir.join(format!("team-{stamp}.jsonl"));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            log_path,
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Serialize one event as a JSON line and flush.
    pub fn log_event(&self, event: &TeamEvent) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_writer(
            &mut *writer,
            &JournalLine {
                timestamp: now_iso(),
                event,
            },
        )?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn record(&self, event: TeamEvent) {
        if let Err(e) = self.log_event(&event) {
            tracing::warn!(path = %self.log_path.display(), error = %e, "Failed to write journal entry");
        }
    }
}

#[async_trait]
impl TeamHooks for TeamJournal {
    async fn on_task_created(&self, task: &Task) {
        self.record(TeamEvent::TaskCreated { task: task.clone() });
    }

    async fn on_task_activated(&self, task: &Task) {
        self.record(TeamEvent::TaskActivated { task: task.clone() });
    }

    async fn on_task_completed(&self, task: &Task) {
        self.record(TeamEvent::TaskCompleted { task: task.clone() });
    }

    async fn on_message_sent(&self, message: &TeamMessage) {
        self.record(TeamEvent::MessageSent {
            message: message.clone(),
        });
    }

    async fn on_message_delivered(&self, message: &TeamMessage) {
        self.record(TeamEvent::MessageDelivered {
            message: message.clone(),
        });
    }

    async fn on_agent_blocked(&self, agent_id: &str, message_id: &str) {
        self.record(TeamEvent::AgentBlocked {
            agent_id: agent_id.to_string(),
            message_id: message_id.to_string(),
        });
    }

    async fn on_agent_unblocked(&self, agent_id: &str) {
        self.record(TeamEvent::AgentUnblocked {
            agent_id: agent_id.to_string(),
        });
    }

    async fn on_goal_complete(&self, summary: &str) {
        self.record(TeamEvent::GoalComplete {
            summary: summary.to_string(),
        });
    }
}

/// Hook that rewrites the state file on every state change.
pub struct StateSnapshot {
    path: PathBuf,
}

impl StateSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TeamHooks for StateSnapshot {
    async fn on_state_changed(&self, state: &TeamState) {
        if let Err(e) = save_state(&self.path, state).await {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to save team state");
        }
    }
}

/// Write `state` to `path` as pretty JSON, via a temporary sibling file.
pub async fn save_state(path: &Path, state: &TeamState) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = state.to_json()?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Load and validate a state file written by [`save_state`].
pub async fn load_state(path: &Path) -> anyhow::Result<TeamState> {
    let json = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to read team state from {}: {e}", path.display())
    })?;
    let state = TeamState::from_json(&json).map_err(|e: TeamError| {
        anyhow::anyhow!("Invalid team state in {}: {e}", path.display())
    })?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::team::types::{AgentState, TaskStatus};
    use std::io::BufRead;
    use tempfile::TempDir;

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        let file = fs::File::open(path).expect("open journal");
        std::io::BufReader::new(file)
            .lines()
            .map(|line| serde_json::from_str(&line.expect("read line")).expect("valid JSON"))
            .collect()
    }

    fn task() -> Task {
        Task {
            id: "T-0001".into(),
            title: "Survey".into(),
            brief: "b".into(),
            assignee: "worker-1".into(),
            created_by: "manager".into(),
            status: TaskStatus::Active,
            created_at: "2024-01-01T00:00:00Z".into(),
            completed_at: None,
            completion_summary: None,
        }
    }

    #[test]
    fn creates_journal_in_log_dir() {
        let tmp = TempDir::new().expect("tempdir");
        let journal = TeamJournal::new(tmp.path()).expect("journal");

        let log_dir = tmp.path().join(LOG_DIR_NAME);
        assert!(log_dir.is_dir());
        assert!(journal.log_path().starts_with(&log_dir));
        let name = journal.log_path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("team-"));
        assert!(name.ends_with(".jsonl"));
    }

    #[tokio::test]
    async fn hooks_append_tagged_lines() {
        let tmp = TempDir::new().expect("tempdir");
        let journal = TeamJournal::new(tmp.path()).expect("journal");

        journal.on_task_created(&task()).await;
        journal.on_agent_blocked("worker-1", "M-0001").await;
        journal.on_goal_complete("shipped").await;

        let lines = read_lines(journal.log_path());
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event_type"], "task_created");
        assert_eq!(lines[0]["task"]["id"], "T-0001");
        assert!(lines[0]["timestamp"].is_string());
        assert_eq!(lines[1]["event_type"], "agent_blocked");
        assert_eq!(lines[1]["message_id"], "M-0001");
        assert_eq!(lines[2]["summary"], "shipped");
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_file() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("nested").join("team.json");
        let hook = StateSnapshot::new(&path);

        let mut state = TeamState::new("goal", vec![AgentState::new("manager", "manager")]);
        state.goal_summary = Some("partial".into());
        hook.on_state_changed(&state).await;

        let loaded = load_state(hook.path()).await.expect("load");
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn load_state_rejects_invalid_file() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("team.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let err = load_state(&path).await.unwrap_err();
        assert!(err.to_string().contains("Invalid team state"));
    }
}
