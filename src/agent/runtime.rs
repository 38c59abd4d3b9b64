//! Contract between the team coordinator and whatever runs an agent session.
//!
//! A [`SessionRuntime`] takes a system prompt, a tool table and the prior
//! conversation, drives the model turn by turn, and reports how the session
//! ended. The coordinator depends only on this shape; the genai-backed
//! implementation lives in [`super::genai_runtime`].

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use std::sync::Arc;

use crate::team::tools::ToolTable;
use crate::team::types::{AgentId, CompletionReason, ConversationTurn, SuspendInfo};

/// Model selection and limits for one session.
#[derive(Clone, Debug)]
pub struct ModelConfig {
    /// Model identifier understood by the runtime (e.g. `"llama3.2"`).
    pub model: String,
    pub max_turns: Option<u32>,
    /// Total prompt + completion tokens allowed for the session.
    pub token_limit: Option<u64>,
}

/// Notifications a runtime sends while a session is in flight.
#[async_trait]
pub trait SessionCallbacks: Send + Sync {
    /// A tool asked to suspend the session.
    async fn on_suspend(&self, session_id: &str, info: &SuspendInfo);

    /// The conversation grew; `conversation` is the full history so far.
    async fn on_messages_update(&self, session_id: &str, conversation: &[ConversationTurn]);
}

/// Everything a runtime needs to run one agent session.
pub struct SessionRequest {
    pub session_id: String,
    pub agent_id: AgentId,
    pub model: ModelConfig,
    pub system_prompt: String,
    pub tools: ToolTable,
    pub prior_conversation: Vec<ConversationTurn>,
    pub initial_message: Option<String>,
    /// Cancelled when the coordinator is asked to stop.
    pub cancel: CancellationToken,
    pub callbacks: Arc<dyn SessionCallbacks>,
}

/// How a session ended.
#[derive(Clone, Debug)]
pub struct SessionOutcome {
    pub final_conversation: Vec<ConversationTurn>,
    pub completion_reason: CompletionReason,
    /// Final assistant text; the completion summary for `TaskComplete`.
    pub final_output: String,
    pub suspend_info: Option<SuspendInfo>,
}

/// Runs agent sessions. Implementations must end a session as soon as a tool
/// returns [`crate::team::tools::ToolOutput::Suspend`], reporting
/// [`CompletionReason::Suspended`] with the suspension's info.
#[async_trait]
pub trait SessionRuntime: Send + Sync {
    async fn run_session(&self, request: SessionRequest) -> anyhow::Result<SessionOutcome>;
}
