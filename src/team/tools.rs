//! Coordination tools and the per-agent tool table.
//!
//! Every agent session gets `ask`, `tell`, `get_task_brief` and
//! `check_team_status`; the manager additionally gets `assign_task` and
//! `wait_for_task_completions`. These are the only way an agent mutates the
//! team state. Caller-supplied domain tools are merged into the same table.
//!
//! Tool misuse is never an `Err`: it comes back as a JSON `{"error": ...}`
//! value so the model can observe it and correct itself next turn.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use super::store::TeamStore;
use super::types::{AgentId, AgentStatus, TaskStatus};

/// Suspension reason used by `wait_for_task_completions`.
pub const SUSPEND_WAITING_FOR_TASKS: &str = "waiting_for_task_completions";

/// Result of a tool call: an ordinary value, or a request to end the
/// calling session early.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutput {
    Value(Value),
    Suspend { reason: String, data: Value },
}

impl ToolOutput {
    fn error(message: impl Into<String>) -> Self {
        Self::Value(json!({ "error": message.into() }))
    }

    /// Render for a model-facing tool response.
    pub fn to_content(&self) -> String {
        match self {
            Self::Value(Value::String(s)) => s.clone(),
            Self::Value(v) => v.to_string(),
            Self::Suspend { reason, data } => {
                json!({ "suspended": reason, "data": data }).to_string()
            }
        }
    }
}

/// A callable tool exposed to an agent session.
#[async_trait]
pub trait TeamTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "required": [] })
    }

    async fn execute(&self, args: Value) -> ToolOutput;
}

/// Ordered set of tools available to one session, keyed by name.
#[derive(Clone, Default)]
pub struct ToolTable {
    tools: Vec<Arc<dyn TeamTool>>,
}

impl ToolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. Returns `false` (and keeps the existing tool) if the name
    /// is already taken.
    pub fn insert(&mut self, tool: Arc<dyn TeamTool>) -> bool {
        if self.get(tool.name()).is_some() {
            return false;
        }
        self.tools.push(tool);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TeamTool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn TeamTool>> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute the named tool, or return a JSON error for unknown names.
    pub async fn execute(&self, name: &str, args: Value) -> ToolOutput {
        match self.get(name) {
            Some(tool) => tool.execute(args).await,
            None => ToolOutput::error(format!("Unknown tool: {name}")),
        }
    }

    /// Human-readable listing embedded in system prompts.
    pub fn descriptions(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("### {}\n{}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// The built-in coordination tools.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CoordinationKind {
    Ask,
    Tell,
    TaskBrief,
    TeamStatus,
    AssignTask,
    Wait,
}

impl CoordinationKind {
    const COMMON: [Self; 4] = [Self::Ask, Self::Tell, Self::TaskBrief, Self::TeamStatus];
    const MANAGER: [Self; 2] = [Self::AssignTask, Self::Wait];

    fn name(self) -> &'static str {
        match self {
            Self::Ask => "ask",
            Self::Tell => "tell",
            Self::TaskBrief => "get_task_brief",
            Self::TeamStatus => "check_team_status",
            Self::AssignTask => "assign_task",
            Self::Wait => "wait_for_task_completions",
        }
    }
}

/// Build the tool table for `agent_id`.
///
/// Coordination tools come first. Domain tools whose names collide with a
/// coordination tool (or an earlier domain tool) are dropped with a warning:
/// the coordination tool always wins.
pub fn build_tool_table(
    team: &TeamStore,
    agent_id: &str,
    domain_tools: &[Arc<dyn TeamTool>],
) -> ToolTable {
    let mut table = ToolTable::new();

    let manager_tools: &[CoordinationKind] = if team.is_manager(agent_id) {
        &CoordinationKind::MANAGER
    } else {
        &[]
    };
    for &kind in CoordinationKind::COMMON.iter().chain(manager_tools) {
        table.insert(Arc::new(CoordinationTool {
            kind,
            agent_id: agent_id.to_string(),
            team: team.clone(),
        }));
    }

    for tool in domain_tools {
        if !table.insert(tool.clone()) {
            tracing::warn!(
                agent_id,
                tool = tool.name(),
                "Domain tool shadowed by an existing tool of the same name; skipping"
            );
        }
    }

    table
}

/// One coordination tool bound to the agent that calls it.
struct CoordinationTool {
    kind: CoordinationKind,
    agent_id: AgentId,
    team: TeamStore,
}

#[async_trait]
impl TeamTool for CoordinationTool {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn description(&self) -> &str {
        match self.kind {
            CoordinationKind::Ask => {
                "Ask another agent (or an external party) a question. Your session ends \
                 until the reply arrives; the reply will appear in your conversation."
            }
            CoordinationKind::Tell => {
                "Send a message that does not wait for an answer. Set in_reply_to to the id \
                 of a question you are answering."
            }
            CoordinationKind::TaskBrief => "Return your current task, or a note that you have none.",
            CoordinationKind::TeamStatus => {
                "Return task counts by status for every agent and whether the goal is complete."
            }
            CoordinationKind::AssignTask => {
                "Assign a task to a team member. Idle members start immediately; busy members \
                 queue it behind their current task."
            }
            CoordinationKind::Wait => {
                "End your session until outstanding tasks finish. If nothing is outstanding, \
                 returns a hint that you may finalize the goal."
            }
        }
    }

    fn input_schema(&self) -> Value {
        match self.kind {
            CoordinationKind::Ask => json!({
                "type": "object",
                "properties": {
                    "to": { "type": "string", "description": "Agent id to ask" },
                    "question": { "type": "string", "description": "The question" }
                },
                "required": ["to", "question"]
            }),
            CoordinationKind::Tell => json!({
                "type": "object",
                "properties": {
                    "to": { "type": "string", "description": "Agent id to message" },
                    "content": { "type": "string", "description": "Message text" },
                    "in_reply_to": {
                        "type": "string",
                        "description": "Id of the question being answered"
                    }
                },
                "required": ["to", "content"]
            }),
            CoordinationKind::AssignTask => json!({
                "type": "object",
                "properties": {
                    "assignee": { "type": "string", "description": "Agent id of the assignee" },
                    "title": { "type": "string", "description": "Short task title" },
                    "brief": { "type": "string", "description": "Full task description" }
                },
                "required": ["assignee", "title", "brief"]
            }),
            CoordinationKind::TaskBrief | CoordinationKind::TeamStatus | CoordinationKind::Wait => {
                json!({ "type": "object", "properties": {}, "required": [] })
            }
        }
    }

    async fn execute(&self, args: Value) -> ToolOutput {
        match self.kind {
            CoordinationKind::Ask => self.dispatch_ask(&args).await,
            CoordinationKind::Tell => self.dispatch_tell(&args).await,
            CoordinationKind::TaskBrief => self.dispatch_task_brief(),
            CoordinationKind::TeamStatus => self.dispatch_team_status(),
            CoordinationKind::AssignTask => self.dispatch_assign_task(&args).await,
            CoordinationKind::Wait => self.dispatch_wait(),
        }
    }
}

/// Fetch a required string argument.
fn str_arg<'a>(args: &'a Value, tool: &str, key: &str) -> Result<&'a str, ToolOutput> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolOutput::error(format!("{tool}: missing or invalid '{key}' argument")))
}

#[derive(Serialize)]
struct AgentTaskCounts<'a> {
    agent_id: &'a str,
    role: &'a str,
    status: AgentStatus,
    queued: usize,
    active: usize,
    completed: usize,
}

impl CoordinationTool {
    async fn dispatch_ask(&self, args: &Value) -> ToolOutput {
        let (to, question) = match (str_arg(args, "ask", "to"), str_arg(args, "ask", "question")) {
            (Ok(to), Ok(q)) => (to, q),
            (Err(e), _) | (_, Err(e)) => return e,
        };
        match self.team.ask(&self.agent_id, to, question).await {
            Ok(output) => output,
            Err(e) => ToolOutput::error(format!("ask failed: {e}")),
        }
    }

    async fn dispatch_tell(&self, args: &Value) -> ToolOutput {
        let (to, content) = match (str_arg(args, "tell", "to"), str_arg(args, "tell", "content")) {
            (Ok(to), Ok(c)) => (to, c),
            (Err(e), _) | (_, Err(e)) => return e,
        };
        let in_reply_to = args.get("in_reply_to").and_then(|v| v.as_str());
        match self.team.tell(&self.agent_id, to, content, in_reply_to).await {
            Ok(message) => ToolOutput::Value(json!({
                "message_id": message.id,
                "status": message.status,
                "in_reply_to": message.in_reply_to,
            })),
            Err(e) => ToolOutput::error(format!("tell failed: {e}")),
        }
    }

    fn dispatch_task_brief(&self) -> ToolOutput {
        self.team.read(|state| {
            let task = state
                .agent_states
                .get(&self.agent_id)
                .and_then(|a| a.current_task.as_deref())
                .and_then(|id| state.task(id));
            match task {
                Some(task) => ToolOutput::Value(json!({
                    "task_id": task.id,
                    "title": task.title,
                    "brief": task.brief,
                    "status": task.status,
                    "created_by": task.created_by,
                })),
                None => ToolOutput::Value(json!({
                    "task": null,
                    "message": "You have no current task.",
                })),
            }
        })
    }

    fn dispatch_team_status(&self) -> ToolOutput {
        self.team.read(|state| {
            let agents: Vec<AgentTaskCounts<'_>> = state
                .agent_states
                .iter()
                .map(|agent| {
                    let count = |status: TaskStatus| {
                        state
                            .tasks
                            .iter()
                            .filter(|t| t.assignee == agent.id && t.status == status)
                            .count()
                    };
                    AgentTaskCounts {
                        agent_id: &agent.id,
                        role: &agent.role,
                        status: agent.status,
                        queued: count(TaskStatus::Queued),
                        active: count(TaskStatus::Active),
                        completed: count(TaskStatus::Completed),
                    }
                })
                .collect();
            ToolOutput::Value(json!({
                "agents": agents,
                "goal_complete": state.goal_complete,
            }))
        })
    }

    async fn dispatch_assign_task(&self, args: &Value) -> ToolOutput {
        let fields = (
            str_arg(args, "assign_task", "assignee"),
            str_arg(args, "assign_task", "title"),
            str_arg(args, "assign_task", "brief"),
        );
        let (assignee, title, brief) = match fields {
            (Ok(a), Ok(t), Ok(b)) => (a, t, b),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return e,
        };

        if !self.team.read(|state| state.agent_states.contains(assignee)) {
            let known: Vec<String> = self
                .team
                .read(|state| state.agent_states.ids().map(str::to_string).collect());
            return ToolOutput::error(format!(
                "assign_task: unknown assignee '{assignee}'. Known agents: {}",
                known.join(", ")
            ));
        }

        match self
            .team
            .assign_task(&self.agent_id, assignee, title, brief)
            .await
        {
            Ok(task) => ToolOutput::Value(json!({
                "task_id": task.id,
                "assignee": task.assignee,
                "status": task.status,
            })),
            Err(e) => ToolOutput::error(format!("assign_task failed: {e}")),
        }
    }

    fn dispatch_wait(&self) -> ToolOutput {
        let outstanding: Vec<String> = self.team.read(|state| {
            state
                .tasks
                .iter()
                .filter(|t| matches!(t.status, TaskStatus::Active | TaskStatus::Queued))
                .map(|t| t.id.clone())
                .collect()
        });

        if outstanding.is_empty() {
            return ToolOutput::Value(json!({
                "all_complete": true,
                "hint": "All tasks are complete. You may now finalize the goal with a summary.",
            }));
        }

        ToolOutput::Suspend {
            reason: SUSPEND_WAITING_FOR_TASKS.to_string(),
            data: json!({ "outstanding_task_ids": outstanding }),
        }
    }
}
