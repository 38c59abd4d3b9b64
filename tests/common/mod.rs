//! Shared fixtures for integration tests: a scripted session runtime and a
//! hook recorder.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use huddle::agent::runtime::{ModelConfig, SessionOutcome, SessionRequest, SessionRuntime};
use huddle::team::state::TeamState;
use huddle::team::types::{CompletionReason, ConversationTurn, SuspendInfo, Task, TeamMessage};
use huddle::team::{
    AgentSpec, CoordinatorOptions, StoreOptions, TeamCoordinator, TeamHooks, ToolOutput,
};

// ─── Scripted runtime ─────────────────────────────────────────────────

/// One action an agent takes during a scripted session.
#[derive(Clone, Debug)]
pub enum Step {
    /// Call a tool from the session's table. A suspending result ends the session.
    Call(&'static str, Value),
    /// End the session as `task_complete` with this summary.
    Complete(&'static str),
    /// Fail the session with a runtime error.
    Fail(&'static str),
    /// Signal `started`, then wait for cancellation.
    WaitForCancel,
}

/// What the runtime was asked to do, for assertions.
#[derive(Clone, Debug)]
pub struct SessionLog {
    pub agent_id: String,
    pub system_prompt: String,
    pub initial_message: Option<String>,
    pub tool_names: Vec<String>,
}

/// Runtime that replays a queue of scripts per agent. An agent with no
/// script left ends its session immediately with `max_turns`.
#[derive(Default)]
pub struct ScriptedRuntime {
    scripts: Mutex<HashMap<String, VecDeque<Vec<Step>>>>,
    log: Mutex<Vec<SessionLog>>,
    pub started: Notify,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the steps of one session for `agent_id`.
    pub fn script(self, agent_id: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(agent_id.to_string())
            .or_default()
            .push_back(steps);
        self
    }

    pub fn sessions(&self) -> Vec<SessionLog> {
        self.log.lock().unwrap().clone()
    }

    pub fn sessions_for(&self, agent_id: &str) -> Vec<SessionLog> {
        self.sessions()
            .into_iter()
            .filter(|s| s.agent_id == agent_id)
            .collect()
    }

    fn next_script(&self, agent_id: &str) -> Vec<Step> {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(agent_id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_default()
    }
}

fn outcome(
    conversation: Vec<ConversationTurn>,
    reason: CompletionReason,
    final_output: &str,
    suspend_info: Option<SuspendInfo>,
) -> SessionOutcome {
    SessionOutcome {
        final_conversation: conversation,
        completion_reason: reason,
        final_output: final_output.to_string(),
        suspend_info,
    }
}

#[async_trait]
impl SessionRuntime for ScriptedRuntime {
    async fn run_session(&self, request: SessionRequest) -> anyhow::Result<SessionOutcome> {
        let steps = self.next_script(&request.agent_id);
        self.log.lock().unwrap().push(SessionLog {
            agent_id: request.agent_id.clone(),
            system_prompt: request.system_prompt.clone(),
            initial_message: request.initial_message.clone(),
            tool_names: request.tools.names().iter().map(|n| n.to_string()).collect(),
        });

        let mut conversation = request.prior_conversation.clone();
        if let Some(message) = &request.initial_message {
            conversation.push(ConversationTurn::user(message.clone()));
        }

        for (i, step) in steps.into_iter().enumerate() {
            match step {
                Step::Call(name, args) => {
                    let call_id = format!("call-{i}");
                    conversation.push(ConversationTurn::ToolCall {
                        call_id: call_id.clone(),
                        name: name.to_string(),
                        arguments: args.clone(),
                    });
                    let output = request.tools.execute(name, args).await;
                    conversation.push(ConversationTurn::ToolResult {
                        call_id,
                        content: output.to_content(),
                    });
                    if let ToolOutput::Suspend { reason, data } = output {
                        let info = SuspendInfo { reason, data };
                        request.callbacks.on_suspend(&request.session_id, &info).await;
                        return Ok(outcome(
                            conversation,
                            CompletionReason::Suspended,
                            "",
                            Some(info),
                        ));
                    }
                    request
                        .callbacks
                        .on_messages_update(&request.session_id, &conversation)
                        .await;
                }
                Step::Complete(summary) => {
                    conversation.push(ConversationTurn::assistant(summary));
                    return Ok(outcome(
                        conversation,
                        CompletionReason::TaskComplete,
                        summary,
                        None,
                    ));
                }
                Step::Fail(message) => anyhow::bail!("{message}"),
                Step::WaitForCancel => {
                    self.started.notify_one();
                    request.cancel.cancelled().await;
                    anyhow::bail!("session cancelled");
                }
            }
        }

        Ok(outcome(conversation, CompletionReason::MaxTurns, "", None))
    }
}

// ─── Hook recorder ────────────────────────────────────────────────────

/// Records every hook call as a short string.
#[derive(Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<String>>,
    state_changes: Mutex<usize>,
}

impl RecordingHooks {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn state_changes(&self) -> usize {
        *self.state_changes.lock().unwrap()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl TeamHooks for RecordingHooks {
    async fn on_task_created(&self, task: &Task) {
        self.push(format!("task_created:{}", task.id));
    }

    async fn on_task_activated(&self, task: &Task) {
        self.push(format!("task_activated:{}", task.id));
    }

    async fn on_task_completed(&self, task: &Task) {
        self.push(format!("task_completed:{}", task.id));
    }

    async fn on_message_sent(&self, message: &TeamMessage) {
        self.push(format!("message_sent:{}", message.id));
    }

    async fn on_message_delivered(&self, message: &TeamMessage) {
        self.push(format!("message_delivered:{}", message.id));
    }

    async fn on_agent_blocked(&self, agent_id: &str, message_id: &str) {
        self.push(format!("agent_blocked:{agent_id}:{message_id}"));
    }

    async fn on_agent_unblocked(&self, agent_id: &str) {
        self.push(format!("agent_unblocked:{agent_id}"));
    }

    async fn on_goal_complete(&self, summary: &str) {
        self.push(format!("goal_complete:{summary}"));
    }

    async fn on_state_changed(&self, _state: &TeamState) {
        *self.state_changes.lock().unwrap() += 1;
    }
}

// ─── Builders ─────────────────────────────────────────────────────────

pub fn options() -> CoordinatorOptions {
    CoordinatorOptions::new(ModelConfig {
        model: "scripted".to_string(),
        max_turns: Some(10),
        token_limit: None,
    })
}

pub fn options_with_hooks(hooks: Arc<RecordingHooks>) -> CoordinatorOptions {
    let mut options = options();
    options.store = StoreOptions {
        hooks,
        ..StoreOptions::default()
    };
    options
}

/// A team with a `manager` and the given worker ids.
pub fn team(
    workers: &[&str],
    runtime: Arc<ScriptedRuntime>,
    options: CoordinatorOptions,
) -> TeamCoordinator {
    TeamCoordinator::new(
        "Write a short report",
        AgentSpec::new("manager", "manager"),
        workers
            .iter()
            .map(|id| AgentSpec::new(*id, "worker"))
            .collect(),
        runtime,
        options,
    )
    .expect("team construction")
}
