//! Type definitions for the team coordination subsystem.
//!
//! These types form the shared vocabulary between the [`super::store::TeamStore`],
//! the coordination tools, the agent runner and the run loop. Everything that
//! lives inside [`super::state::TeamState`] derives both `Serialize` and
//! `Deserialize` so a team can be persisted and resumed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of an agent within a team (e.g. `"manager"`, `"worker-1"`).
pub type AgentId = String;

/// Identifier of a task, `T-0001` style by default.
pub type TaskId = String;

/// Identifier of a team message, `M-0001` style by default.
pub type MessageId = String;

/// Lifecycle status of a task. Transitions are monotonic:
/// `Queued -> Active -> Completed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Active,
    Completed,
}

/// A unit of work assigned by one agent to another.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub brief: String,
    pub assignee: AgentId,
    pub created_by: AgentId,
    pub status: TaskStatus,
    /// RFC 3339 timestamp.
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_summary: Option<String>,
}

/// Whether a message suspends its sender until answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Ask,
    Tell,
}

/// Delivery status of a message. Transitions only `Pending -> Delivered`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Delivered,
}

/// A message exchanged between two agents (or an agent and an external party).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMessage {
    pub id: MessageId,
    pub from: AgentId,
    pub to: AgentId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MessageId>,
    pub status: MessageStatus,
    pub created_at: String,
}

/// Scheduling status of an agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Working,
    Blocked,
}

/// One entry of an agent's conversation history.
///
/// Tool calls and their results are kept as separate turns so a runtime can
/// replay the history with call ids intact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ConversationTurn {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
    },
    ToolCall {
        call_id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        content: String,
    },
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    /// Text carried by this turn, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::System { content }
            | Self::User { content }
            | Self::Assistant { content }
            | Self::ToolResult { content, .. } => Some(content),
            Self::ToolCall { .. } => None,
        }
    }
}

/// Per-agent run state, created at team construction and kept for the
/// team's whole lifetime.
///
/// `status == Blocked` iff `blocked_on` is set. A working agent may become
/// blocked while still holding its `current_task`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub id: AgentId,
    /// Free-form descriptive label; carries no permissions.
    pub role: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_on: Option<MessageId>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
}

impl AgentState {
    pub fn new(id: impl Into<AgentId>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            status: AgentStatus::Idle,
            current_task: None,
            blocked_on: None,
            conversation_history: Vec::new(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.status == AgentStatus::Blocked
    }
}

/// An agent with an active task that is ready to run. Derived on demand,
/// never stored.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkItem {
    pub agent_id: AgentId,
    pub task_id: TaskId,
    pub task: Task,
}

/// An agent that is blocked waiting for a reply, as reported by the run loop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BlockedAgent {
    pub agent_id: AgentId,
    pub message_id: MessageId,
    /// Recipient of the ask the agent is waiting on.
    pub waiting_on: AgentId,
}

/// Payload of a suspension raised by a tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuspendInfo {
    pub reason: String,
    pub data: Value,
}

impl SuspendInfo {
    /// Message id carried by an `ask` suspension, if present.
    pub fn message_id(&self) -> Option<&str> {
        self.data.get("message_id").and_then(|v| v.as_str())
    }
}

/// Why an agent session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    TaskComplete,
    Suspended,
    MaxTurns,
    Error,
}

/// Normalized result of one agent invocation.
#[derive(Clone, Debug, Serialize)]
pub struct AgentRunResult {
    pub agent_id: AgentId,
    pub completed: bool,
    pub suspended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspend_info: Option<SuspendInfo>,
    pub final_output: String,
    pub completion_reason: CompletionReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentRunResult {
    pub(crate) fn failed(agent_id: impl Into<AgentId>, error: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            completed: false,
            suspended: false,
            suspend_info: None,
            final_output: String::new(),
            completion_reason: CompletionReason::Error,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_serializes_with_camel_case_fields() {
        let task = Task {
            id: "T-0001".into(),
            title: "Survey".into(),
            brief: "Look around".into(),
            assignee: "worker-1".into(),
            created_by: "manager".into(),
            status: TaskStatus::Active,
            created_at: "2024-01-01T00:00:00Z".into(),
            completed_at: None,
            completion_summary: None,
        };

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["createdBy"], "manager");
        assert_eq!(value["status"], "active");
        assert!(value.get("completedAt").is_none());
    }

    #[test]
    fn message_kind_serializes_as_type_field() {
        let msg = TeamMessage {
            id: "M-0001".into(),
            from: "worker-1".into(),
            to: "manager".into(),
            kind: MessageKind::Ask,
            content: "Which format?".into(),
            in_reply_to: None,
            status: MessageStatus::Pending,
            created_at: "2024-01-01T00:00:00Z".into(),
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "ask");
        assert_eq!(value["status"], "pending");
    }

    #[test]
    fn conversation_turn_is_tagged_by_role() {
        let turn = ConversationTurn::ToolCall {
            call_id: "c1".into(),
            name: "ask".into(),
            arguments: json!({"to": "manager"}),
        };
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["role"], "tool_call");
        assert_eq!(value["callId"], "c1");
        assert!(value.get("call_id").is_none());

        let result: ConversationTurn =
            serde_json::from_value(json!({"role": "tool_result", "callId": "c1", "content": "ok"}))
                .unwrap();
        assert_eq!(
            result,
            ConversationTurn::ToolResult {
                call_id: "c1".into(),
                content: "ok".into(),
            }
        );
        assert_eq!(turn.text(), None);
        assert_eq!(ConversationTurn::user("hi").text(), Some("hi"));
    }

    #[test]
    fn suspend_info_exposes_message_id() {
        let info = SuspendInfo {
            reason: "awaiting_reply".into(),
            data: json!({"message_id": "M-0003", "to": "manager"}),
        };
        assert_eq!(info.message_id(), Some("M-0003"));
    }
}
