//! The team state store: tasks, messages, per-agent run state and the goal flag.
//!
//! [`TeamState`] is plain data. It is the only object that gets persisted, and
//! it round-trips through JSON without any native map types: the agent roster
//! serializes as an ordered list of `[id, state]` pairs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::types::{
    AgentId, AgentState, AgentStatus, BlockedAgent, MessageKind, MessageStatus, Task, TaskStatus,
    TeamMessage, WorkItem,
};
use crate::error::TeamError;

/// Prefix used by the default task id generator.
pub const TASK_ID_PREFIX: &str = "T-";

/// Prefix used by the default message id generator.
pub const MESSAGE_ID_PREFIX: &str = "M-";

/// Insertion-ordered map of agent id to [`AgentState`].
///
/// Work items and blocked agents are derived by enumerating this collection,
/// so iteration order has to be stable. Teams are small, lookups are linear.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    into = "Vec<(AgentId, AgentState)>",
    try_from = "Vec<(AgentId, AgentState)>"
)]
pub struct AgentRoster {
    entries: Vec<(AgentId, AgentState)>,
}

impl AgentRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an agent. A replaced agent keeps its position.
    pub fn insert(&mut self, state: AgentState) {
        match self.entries.iter_mut().find(|(id, _)| *id == state.id) {
            Some((_, existing)) => *existing = state,
            None => self.entries.push((state.id.clone(), state)),
        }
    }

    pub fn get(&self, id: &str) -> Option<&AgentState> {
        self.entries
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, state)| state)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut AgentState> {
        self.entries
            .iter_mut()
            .find(|(key, _)| key == id)
            .map(|(_, state)| state)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentState> {
        self.entries.iter().map(|(_, state)| state)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<AgentRoster> for Vec<(AgentId, AgentState)> {
    fn from(roster: AgentRoster) -> Self {
        roster.entries
    }
}

impl TryFrom<Vec<(AgentId, AgentState)>> for AgentRoster {
    type Error = String;

    fn try_from(pairs: Vec<(AgentId, AgentState)>) -> Result<Self, Self::Error> {
        let mut seen = HashSet::new();
        for (id, state) in &pairs {
            if !seen.insert(id.as_str()) {
                return Err(format!("duplicate agent id in roster: {id}"));
            }
            if *id != state.id {
                return Err(format!(
                    "roster key `{id}` does not match agent state id `{}`",
                    state.id
                ));
            }
        }
        Ok(Self { entries: pairs })
    }
}

/// Aggregate root of a team: everything needed to resume a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamState {
    /// The overall objective the manager works toward.
    #[serde(default)]
    pub goal: String,
    /// All tasks, in creation order.
    pub tasks: Vec<Task>,
    /// All messages, in creation order.
    pub messages: Vec<TeamMessage>,
    pub agent_states: AgentRoster,
    pub goal_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_summary: Option<String>,
}

impl TeamState {
    /// Create an empty state for the given goal and agents.
    pub fn new(goal: impl Into<String>, agents: impl IntoIterator<Item = AgentState>) -> Self {
        let mut agent_states = AgentRoster::new();
        for agent in agents {
            agent_states.insert(agent);
        }
        Self {
            goal: goal.into(),
            agent_states,
            ..Default::default()
        }
    }

    pub fn agent(&self, id: &str) -> Result<&AgentState, TeamError> {
        self.agent_states
            .get(id)
            .ok_or_else(|| TeamError::UnknownAgent(id.to_string()))
    }

    pub fn agent_mut(&mut self, id: &str) -> Result<&mut AgentState, TeamError> {
        self.agent_states
            .get_mut(id)
            .ok_or_else(|| TeamError::UnknownAgent(id.to_string()))
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn message(&self, id: &str) -> Option<&TeamMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Agents that are ready to run: not blocked, with an active current task.
    /// Roster order.
    pub fn work_items(&self) -> Vec<WorkItem> {
        self.agent_states
            .iter()
            .filter(|agent| !agent.is_blocked())
            .filter_map(|agent| {
                let task = self.task(agent.current_task.as_deref()?)?;
                (task.status == TaskStatus::Active).then(|| WorkItem {
                    agent_id: agent.id.clone(),
                    task_id: task.id.clone(),
                    task: task.clone(),
                })
            })
            .collect()
    }

    /// Agents waiting on an ask, with the ask's recipient. Roster order.
    pub fn blocked_agents(&self) -> Vec<BlockedAgent> {
        self.agent_states
            .iter()
            .filter_map(|agent| {
                let message_id = agent.blocked_on.as_ref()?;
                Some(BlockedAgent {
                    agent_id: agent.id.clone(),
                    message_id: message_id.clone(),
                    waiting_on: self
                        .message(message_id)
                        .map(|m| m.to.clone())
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Whether any message addressed to `agent_id` is still pending.
    pub fn has_pending_inbound(&self, agent_id: &str) -> bool {
        self.messages
            .iter()
            .any(|m| m.to == agent_id && m.status == MessageStatus::Pending)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, TeamError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a state from JSON and validate its invariants.
    pub fn from_json(json: &str) -> Result<Self, TeamError> {
        let state: TeamState = serde_json::from_str(json)?;
        state.check_invariants()?;
        Ok(state)
    }

    /// Validate the structural invariants of the state.
    ///
    /// - every agent has at most one active task, and it is its `current_task`
    /// - `status == Blocked` iff `blocked_on` is set
    /// - `blocked_on` references an existing ask
    pub fn check_invariants(&self) -> Result<(), TeamError> {
        for agent in self.agent_states.iter() {
            let active: Vec<&Task> = self
                .tasks
                .iter()
                .filter(|t| t.assignee == agent.id && t.status == TaskStatus::Active)
                .collect();

            if active.len() > 1 {
                return Err(TeamError::InvalidState(format!(
                    "agent {} has {} active tasks",
                    agent.id,
                    active.len()
                )));
            }

            match (&agent.current_task, active.first()) {
                (Some(current), Some(task)) if *current == task.id => {}
                (None, None) => {}
                (current, task) => {
                    return Err(TeamError::InvalidState(format!(
                        "agent {} current task {:?} does not match active task {:?}",
                        agent.id,
                        current,
                        task.map(|t| &t.id)
                    )));
                }
            }

            if agent.current_task.is_none() && agent.status == AgentStatus::Working {
                return Err(TeamError::InvalidState(format!(
                    "agent {} is working without a task",
                    agent.id
                )));
            }

            match (&agent.blocked_on, agent.status == AgentStatus::Blocked) {
                (Some(message_id), true) => match self.message(message_id) {
                    Some(m) if m.kind == MessageKind::Ask => {}
                    _ => {
                        return Err(TeamError::InvalidState(format!(
                            "agent {} is blocked on {message_id}, which is not a known ask",
                            agent.id
                        )));
                    }
                },
                (None, false) => {}
                _ => {
                    return Err(TeamError::InvalidState(format!(
                        "agent {} has inconsistent blocked status",
                        agent.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Allocate the next id of the form `{prefix}{n:04}`.
///
/// Scans `existing` for ids matching the prefix followed by digits and returns
/// max + 1. Gaps and externally seeded ids are tolerated; ids that do not
/// match the pattern are ignored.
pub fn next_sequential_id<'a>(prefix: &str, existing: impl IntoIterator<Item = &'a str>) -> String {
    let max = existing
        .into_iter()
        .filter_map(|id| id.strip_prefix(prefix))
        .filter(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|suffix| suffix.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    format!("{prefix}{:04}", max + 1)
}

/// Default task id generator.
pub fn default_task_id(state: &TeamState) -> String {
    next_sequential_id(TASK_ID_PREFIX, state.tasks.iter().map(|t| t.id.as_str()))
}

/// Default message id generator.
pub fn default_message_id(state: &TeamState) -> String {
    next_sequential_id(MESSAGE_ID_PREFIX, state.messages.iter().map(|m| m.id.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::team::types::MessageStatus;

    fn sample_state() -> TeamState {
        TeamState::new(
            "ship it",
            vec![
                AgentState::new("manager", "manager"),
                AgentState::new("worker-b", "writer"),
                AgentState::new("worker-a", "researcher"),
            ],
        )
    }

    #[test]
    fn roster_preserves_insertion_order() {
        let state = sample_state();
        let ids: Vec<&str> = state.agent_states.ids().collect();
        assert_eq!(ids, vec!["manager", "worker-b", "worker-a"]);
    }

    #[test]
    fn roster_replace_keeps_position() {
        let mut state = sample_state();
        let mut replacement = AgentState::new("worker-b", "editor");
        replacement.status = AgentStatus::Idle;
        state.agent_states.insert(replacement);

        let ids: Vec<&str> = state.agent_states.ids().collect();
        assert_eq!(ids, vec!["manager", "worker-b", "worker-a"]);
        assert_eq!(state.agent_states.get("worker-b").unwrap().role, "editor");
    }

    #[test]
    fn roster_serializes_as_pairs() {
        let state = sample_state();
        let value = serde_json::to_value(&state).unwrap();
        let pairs = value["agentStates"].as_array().unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0][0], "manager");
        assert_eq!(pairs[1][1]["role"], "writer");
    }

    #[test]
    fn roster_rejects_duplicate_ids() {
        let json = r#"{
            "tasks": [], "messages": [], "goalComplete": false,
            "agentStates": [
                ["a", {"id": "a", "role": "x", "status": "idle"}],
                ["a", {"id": "a", "role": "y", "status": "idle"}]
            ]
        }"#;
        let err = TeamState::from_json(json).unwrap_err();
        assert!(err.to_string().contains("duplicate agent id"));
    }

    #[test]
    fn json_round_trip_preserves_everything() {
        let mut state = sample_state();
        state.goal_complete = true;
        state.goal_summary = Some("done".into());

        let restored = TeamState::from_json(&state.to_json().unwrap()).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn next_id_starts_at_one() {
        assert_eq!(next_sequential_id("T-", std::iter::empty()), "T-0001");
    }

    #[test]
    fn next_id_tolerates_gaps_and_foreign_ids() {
        let ids = ["T-0002", "T-0009", "custom", "T-abc", "T-", "M-0100"];
        assert_eq!(next_sequential_id("T-", ids), "T-0010");
    }

    #[test]
    fn next_id_grows_past_four_digits() {
        assert_eq!(next_sequential_id("M-", ["M-9999"]), "M-10000");
    }

    #[test]
    fn invariants_reject_blocked_without_pointer() {
        let mut state = sample_state();
        state.agent_states.get_mut("worker-a").unwrap().status = AgentStatus::Blocked;
        assert!(matches!(
            state.check_invariants(),
            Err(TeamError::InvalidState(_))
        ));
    }

    #[test]
    fn invariants_reject_blocked_on_tell() {
        let mut state = sample_state();
        state.messages.push(TeamMessage {
            id: "M-0001".into(),
            from: "worker-a".into(),
            to: "manager".into(),
            kind: MessageKind::Tell,
            content: "fyi".into(),
            in_reply_to: None,
            status: MessageStatus::Delivered,
            created_at: "2024-01-01T00:00:00Z".into(),
        });
        let agent = state.agent_states.get_mut("worker-a").unwrap();
        agent.status = AgentStatus::Blocked;
        agent.blocked_on = Some("M-0001".into());

        assert!(state.check_invariants().is_err());
    }

    #[test]
    fn invariants_reject_two_active_tasks() {
        let mut state = sample_state();
        for id in ["T-0001", "T-0002"] {
            state.tasks.push(Task {
                id: id.into(),
                title: "t".into(),
                brief: "b".into(),
                assignee: "worker-a".into(),
                created_by: "manager".into(),
                status: TaskStatus::Active,
                created_at: "2024-01-01T00:00:00Z".into(),
                completed_at: None,
                completion_summary: None,
            });
        }
        let agent = state.agent_states.get_mut("worker-a").unwrap();
        agent.status = AgentStatus::Working;
        agent.current_task = Some("T-0001".into());

        let err = state.check_invariants().unwrap_err();
        assert!(err.to_string().contains("2 active tasks"));
    }

    #[test]
    fn derived_views_follow_roster_order() {
        let mut state = sample_state();
        for (id, assignee) in [("T-0001", "worker-a"), ("T-0002", "worker-b")] {
            state.tasks.push(Task {
                id: id.into(),
                title: "t".into(),
                brief: "b".into(),
                assignee: assignee.into(),
                created_by: "manager".into(),
                status: TaskStatus::Active,
                created_at: "2024-01-01T00:00:00Z".into(),
                completed_at: None,
                completion_summary: None,
            });
            let agent = state.agent_states.get_mut(assignee).unwrap();
            agent.status = AgentStatus::Working;
            agent.current_task = Some(id.into());
        }
        let ids: Vec<String> = state.work_items().into_iter().map(|w| w.agent_id).collect();
        assert_eq!(ids, vec!["worker-b", "worker-a"]);

        state.messages.push(TeamMessage {
            id: "M-0001".into(),
            from: "worker-b".into(),
            to: "human".into(),
            kind: MessageKind::Ask,
            content: "ok?".into(),
            in_reply_to: None,
            status: MessageStatus::Pending,
            created_at: "2024-01-01T00:00:00Z".into(),
        });
        let agent = state.agent_states.get_mut("worker-b").unwrap();
        agent.status = AgentStatus::Blocked;
        agent.blocked_on = Some("M-0001".into());

        let work: Vec<String> = state.work_items().into_iter().map(|w| w.agent_id).collect();
        assert_eq!(work, vec!["worker-a"]);
        let blocked = state.blocked_agents();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].waiting_on, "human");
        assert!(state.has_pending_inbound("human"));
        assert!(!state.has_pending_inbound("manager"));
        state.check_invariants().unwrap();
    }
}
