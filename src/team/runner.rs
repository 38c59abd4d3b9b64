//! Agent runner: one invocation of the session runtime for one agent.
//!
//! The runner builds the session (system prompt, kickoff message, merged tool
//! table), tracks it for cancellation while it is in flight, and folds the
//! outcome back into the team state: task completion, blocking on an ask, or
//! nothing at all. Runtime failures never escape; they become an
//! [`AgentRunResult`] with [`CompletionReason::Error`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::messages::SUSPEND_AWAITING_REPLY;
use super::store::TeamStore;
use super::tools::{TeamTool, build_tool_table};
use super::types::{AgentId, AgentRunResult, CompletionReason, ConversationTurn, SuspendInfo};
use crate::agent::runtime::{ModelConfig, SessionCallbacks, SessionRequest, SessionRuntime};
use crate::agent::system_prompt::{build_initial_message, build_system_prompt};
use crate::error::TeamError;

/// Kickoff message used when nothing new happened since the last session.
const CONTINUE_PROMPT: &str =
    "Continue with your work. Check your task brief and the team status if you need to.";

/// In-flight session entry.
struct InFlight {
    agent_id: AgentId,
    cancel_token: CancellationToken,
}

/// Runs single agent sessions against a [`SessionRuntime`].
#[derive(Clone)]
pub struct AgentRunner {
    team: TeamStore,
    runtime: Arc<dyn SessionRuntime>,
    model: ModelConfig,
    domain_tools: Vec<Arc<dyn TeamTool>>,
    sessions: Arc<Mutex<HashMap<String, InFlight>>>,
}

impl AgentRunner {
    pub fn new(
        team: TeamStore,
        runtime: Arc<dyn SessionRuntime>,
        model: ModelConfig,
        domain_tools: Vec<Arc<dyn TeamTool>>,
    ) -> Self {
        Self {
            team,
            runtime,
            model,
            domain_tools,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run one session for `agent_id` and apply its outcome.
    ///
    /// Fails only if `agent_id` is not part of the team.
    pub async fn run_agent(&self, agent_id: &str) -> Result<AgentRunResult, TeamError> {
        self.team.read(|state| state.agent(agent_id).map(|_| ()))?;

        let inbox = self.team.take_inbox(agent_id).await?;
        let is_manager = self.team.is_manager(agent_id);
        let tools = build_tool_table(&self.team, agent_id, &self.domain_tools);

        let (system_prompt, initial_message, prior_conversation) = self.team.read(|state| {
            let agent = state.agent(agent_id)?;
            let system_prompt =
                build_system_prompt(state, agent, is_manager, &tools.descriptions());
            let initial = build_initial_message(state, agent, is_manager, &inbox)
                .unwrap_or_else(|| CONTINUE_PROMPT.to_string());
            Ok::<_, TeamError>((system_prompt, initial, agent.conversation_history.clone()))
        })?;

        let session_id = Uuid::new_v4().to_string();
        let cancel_token = CancellationToken::new();
        self.track(&session_id, agent_id, cancel_token.clone());

        let callbacks = Arc::new(RunnerCallbacks {
            team: self.team.clone(),
            agent_id: agent_id.to_string(),
            suspend_info: Mutex::new(None),
        });

        tracing::info!(agent_id, session_id = %session_id, "Starting agent session");
        let outcome = self
            .runtime
            .run_session(SessionRequest {
                session_id: session_id.clone(),
                agent_id: agent_id.to_string(),
                model: self.model.clone(),
                system_prompt,
                tools,
                prior_conversation,
                initial_message: Some(initial_message),
                cancel: cancel_token,
                callbacks: callbacks.clone(),
            })
            .await;
        self.untrack(&session_id);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(agent_id, session_id = %session_id, error = %e, "Agent session failed");
                return Ok(AgentRunResult::failed(agent_id, format!("{e:#}")));
            }
        };

        self.team
            .lock()
            .agent_mut(agent_id)?
            .conversation_history = outcome.final_conversation;

        let suspend_info = outcome.suspend_info.or_else(|| callbacks.take_suspend());
        let mut result = AgentRunResult {
            agent_id: agent_id.to_string(),
            completed: false,
            suspended: false,
            suspend_info: None,
            final_output: outcome.final_output,
            completion_reason: outcome.completion_reason,
            error: None,
        };

        match outcome.completion_reason {
            CompletionReason::TaskComplete => {
                self.team.complete_task(agent_id, &result.final_output).await?;
                result.completed = true;
            }
            CompletionReason::Suspended => {
                if let Some(info) = &suspend_info {
                    self.apply_suspension(agent_id, info).await?;
                }
                result.suspended = true;
                result.suspend_info = suspend_info;
            }
            CompletionReason::MaxTurns => {
                tracing::warn!(agent_id, "Agent session hit its turn or token limit");
            }
            CompletionReason::Error => {
                result.error = Some(result.final_output.clone());
            }
        }

        tracing::info!(
            agent_id,
            session_id = %session_id,
            reason = ?result.completion_reason,
            "Agent session ended"
        );
        Ok(result)
    }

    /// Cancel every in-flight session. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        for (session_id, entry) in sessions.iter() {
            tracing::info!(session_id = %session_id, agent_id = %entry.agent_id, "Cancelling session");
            entry.cancel_token.cancel();
        }
        sessions.len()
    }

    /// Number of sessions currently in flight.
    pub fn in_flight(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn apply_suspension(&self, agent_id: &str, info: &SuspendInfo) -> Result<(), TeamError> {
        if info.reason != SUSPEND_AWAITING_REPLY {
            tracing::debug!(agent_id, reason = %info.reason, "Session suspended");
            return Ok(());
        }
        let Some(message_id) = info.message_id() else {
            tracing::warn!(agent_id, "Ask suspension without a message id");
            return Ok(());
        };
        match self.team.block_agent(agent_id, message_id).await {
            Err(TeamError::UnknownAgent(id)) => Err(TeamError::UnknownAgent(id)),
            Err(e) => {
                tracing::warn!(agent_id, message_id, error = %e, "Could not block agent");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    fn track(&self, session_id: &str, agent_id: &str, cancel_token: CancellationToken) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                session_id.to_string(),
                InFlight {
                    agent_id: agent_id.to_string(),
                    cancel_token,
                },
            );
    }

    fn untrack(&self, session_id: &str) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }
}

/// Callbacks handed to the runtime for one session.
struct RunnerCallbacks {
    team: TeamStore,
    agent_id: AgentId,
    suspend_info: Mutex<Option<SuspendInfo>>,
}

impl RunnerCallbacks {
    fn take_suspend(&self) -> Option<SuspendInfo> {
        self.suspend_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[async_trait]
impl SessionCallbacks for RunnerCallbacks {
    async fn on_suspend(&self, session_id: &str, info: &SuspendInfo) {
        tracing::debug!(session_id, agent_id = %self.agent_id, reason = %info.reason, "Session suspending");
        *self
            .suspend_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(info.clone());
    }

    async fn on_messages_update(&self, _session_id: &str, conversation: &[ConversationTurn]) {
        if let Some(agent) = self.team.lock().agent_states.get_mut(&self.agent_id) {
            agent.conversation_history = conversation.to_vec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::runtime::SessionOutcome;
    use crate::team::state::TeamState;
    use crate::team::store::StoreOptions;
    use crate::team::types::{AgentState, AgentStatus};
    use serde_json::json;

    /// Runtime that calls a single tool, then ends the way the tool says.
    struct OneShot {
        tool: &'static str,
        args: serde_json::Value,
    }

    #[async_trait]
    impl SessionRuntime for OneShot {
        async fn run_session(&self, request: SessionRequest) -> anyhow::Result<SessionOutcome> {
            let mut conversation = request.prior_conversation.clone();
            if let Some(msg) = &request.initial_message {
                conversation.push(ConversationTurn::user(msg.clone()));
            }
            let output = request.tools.execute(self.tool, self.args.clone()).await;
            let (reason, suspend_info) = match output {
                crate::team::tools::ToolOutput::Suspend { reason, data } => {
                    let info = SuspendInfo { reason, data };
                    request.callbacks.on_suspend(&request.session_id, &info).await;
                    (CompletionReason::Suspended, None)
                }
                crate::team::tools::ToolOutput::Value(_) => (CompletionReason::TaskComplete, None),
            };
            Ok(SessionOutcome {
                final_conversation: conversation,
                completion_reason: reason,
                final_output: "finished".into(),
                suspend_info,
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl SessionRuntime for Failing {
        async fn run_session(&self, _request: SessionRequest) -> anyhow::Result<SessionOutcome> {
            anyhow::bail!("model exploded")
        }
    }

    fn team() -> TeamStore {
        let state = TeamState::new(
            "goal",
            vec![
                AgentState::new("manager", "manager"),
                AgentState::new("worker-1", "worker"),
            ],
        );
        TeamStore::new(state, "manager", StoreOptions::default())
    }

    fn model() -> ModelConfig {
        ModelConfig {
            model: "test".into(),
            max_turns: Some(5),
            token_limit: None,
        }
    }

    #[tokio::test]
    async fn unknown_agent_is_fatal() {
        let runner = AgentRunner::new(team(), Arc::new(Failing), model(), vec![]);
        assert!(matches!(
            runner.run_agent("ghost").await,
            Err(TeamError::UnknownAgent(_))
        ));
    }

    #[tokio::test]
    async fn runtime_error_becomes_error_result() {
        let runner = AgentRunner::new(team(), Arc::new(Failing), model(), vec![]);
        let result = runner.run_agent("worker-1").await.unwrap();
        assert_eq!(result.completion_reason, CompletionReason::Error);
        assert!(result.error.unwrap().contains("model exploded"));
        assert_eq!(runner.in_flight(), 0);
    }

    #[tokio::test]
    async fn ask_suspension_blocks_agent_via_callback() {
        let team = team();
        let runtime = OneShot {
            tool: "ask",
            args: json!({"to": "manager", "question": "Which format?"}),
        };
        let runner = AgentRunner::new(team.clone(), Arc::new(runtime), model(), vec![]);

        let result = runner.run_agent("worker-1").await.unwrap();

        assert!(result.suspended);
        assert_eq!(result.suspend_info.unwrap().message_id(), Some("M-0001"));
        let state = team.snapshot();
        let worker = state.agent("worker-1").unwrap();
        assert_eq!(worker.status, AgentStatus::Blocked);
        assert_eq!(worker.blocked_on.as_deref(), Some("M-0001"));
        assert!(!worker.conversation_history.is_empty());
    }

    #[tokio::test]
    async fn task_complete_completes_current_task() {
        let team = team();
        team.assign_task("manager", "worker-1", "t", "b").await.unwrap();
        let runtime = OneShot {
            tool: "get_task_brief",
            args: json!({}),
        };
        let runner = AgentRunner::new(team.clone(), Arc::new(runtime), model(), vec![]);

        let result = runner.run_agent("worker-1").await.unwrap();

        assert!(result.completed);
        let state = team.snapshot();
        assert_eq!(
            state.task("T-0001").unwrap().completion_summary.as_deref(),
            Some("finished")
        );
        assert_eq!(state.agent("worker-1").unwrap().status, AgentStatus::Idle);
    }
}
