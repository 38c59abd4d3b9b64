//! Session runtime backed by `genai`: streaming chat, tool dispatch through
//! the session's [`ToolTable`], turn and token limits, and cancellation.
//!
//! Each turn streams one model response. Tool calls are executed in order;
//! the first one that returns [`ToolOutput::Suspend`] ends the session, and a
//! call to the built-in `task_complete` tool ends it with
//! [`CompletionReason::TaskComplete`].

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use genai::Client;
use genai::chat::{
    ChatMessage, ChatOptions, ChatRequest, ChatStreamEvent, Tool, ToolCall, ToolResponse,
};
use serde_json::{Value, json};

use super::runtime::{SessionOutcome, SessionRequest, SessionRuntime};
use crate::error::SessionError;
use crate::team::tools::{ToolOutput, ToolTable};
use crate::team::types::{CompletionReason, ConversationTurn, SuspendInfo};

/// Name of the built-in tool that ends a session as complete.
pub const TASK_COMPLETE_TOOL: &str = "task_complete";

/// Turn bound used when the model config sets none.
pub const DEFAULT_MAX_TURNS: u32 = 30;

const NUDGE: &str = "Keep going with your tools. Call task_complete with a summary when you are done.";

/// Validate that Ollama is running and `model` is available.
///
/// Step 1: GET `http://localhost:11434/` with a 5-second timeout.
/// Step 2: POST `http://localhost:11434/api/show` to verify the model.
pub async fn check_ollama_ready(model: &str) -> Result<(), SessionError> {
    let http = reqwest::Client::new();

    let base_url = "http://localhost:11434/";
    http.get(base_url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map_err(|e| SessionError::OllamaUnavailable {
            url: base_url.to_string(),
            message: format!("Is Ollama running? {e}"),
        })?;

    let show_url = "http://localhost:11434/api/show";
    let resp = http
        .post(show_url)
        .json(&json!({ "model": model }))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| SessionError::ModelNotAvailable {
            model: model.to_string(),
            message: format!("Failed to query model info: {e}"),
        })?;

    if !resp.status().is_success() {
        return Err(SessionError::ModelNotAvailable {
            model: model.to_string(),
            message: format!(
                "Model not found (HTTP {}). Run `ollama pull {model}` to download it.",
                resp.status()
            ),
        });
    }

    Ok(())
}

/// Genai tool definitions for a session: the table plus `task_complete`.
pub fn define_tools(table: &ToolTable) -> Vec<Tool> {
    let mut tools: Vec<Tool> = table
        .iter()
        .map(|t| {
            Tool::new(t.name())
                .with_description(t.description())
                .with_schema(t.input_schema())
        })
        .collect();
    tools.push(
        Tool::new(TASK_COMPLETE_TOOL)
            .with_description(
                "Finish your current task (or, for the manager, the whole goal). \
                 Ends your session. Pass a concise summary of the result.",
            )
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "summary": {
                        "type": "string",
                        "description": "What was accomplished"
                    }
                },
                "required": ["summary"]
            })),
    );
    tools
}

/// Replay a stored conversation as genai chat messages.
///
/// Consecutive tool-call turns are grouped into one assistant message so
/// their responses follow them as the provider expects.
pub fn to_chat_messages(conversation: &[ConversationTurn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(conversation.len());
    let mut pending_calls: Vec<ToolCall> = Vec::new();

    for turn in conversation {
        if let ConversationTurn::ToolCall {
            call_id,
            name,
            arguments,
        } = turn
        {
            pending_calls.push(ToolCall {
                call_id: call_id.clone(),
                fn_name: name.clone(),
                fn_arguments: arguments.clone(),
                thought_signatures: None,
            });
            continue;
        }
        if !pending_calls.is_empty() {
            messages.push(ChatMessage::from(std::mem::take(&mut pending_calls)));
        }
        match turn {
            ConversationTurn::System { content } => messages.push(ChatMessage::system(content)),
            ConversationTurn::User { content } => messages.push(ChatMessage::user(content)),
            ConversationTurn::Assistant { content } => {
                messages.push(ChatMessage::assistant(content))
            }
            ConversationTurn::ToolResult { call_id, content } => {
                messages.push(ToolResponse::new(call_id.clone(), content.clone()).into())
            }
            ConversationTurn::ToolCall { .. } => {}
        }
    }
    if !pending_calls.is_empty() {
        messages.push(ChatMessage::from(pending_calls));
    }
    messages
}

/// Summary argument of a `task_complete` call.
fn completion_summary(arguments: &Value) -> String {
    match arguments.get("summary") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// What one streamed model response produced.
struct TurnOutput {
    text: Option<String>,
    tool_calls: Vec<ToolCall>,
    tokens: u64,
}

/// [`SessionRuntime`] that talks to an LLM through `genai`.
pub struct GenaiRuntime {
    client: Client,
    echo: bool,
}

impl Default for GenaiRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl GenaiRuntime {
    /// Runtime with the default genai client (Ollama for unprefixed models).
    pub fn new() -> Self {
        Self {
            client: Client::default(),
            echo: false,
        }
    }

    /// Stream model text to stdout as it arrives.
    pub fn with_echo(mut self, enabled: bool) -> Self {
        self.echo = enabled;
        self
    }

    async fn stream_turn(
        &self,
        model: &str,
        chat_req: ChatRequest,
        options: &ChatOptions,
    ) -> Result<TurnOutput, SessionError> {
        let stream_res = self
            .client
            .exec_chat_stream(model, chat_req, Some(options))
            .await
            .map_err(|e| SessionError::LlmError(format!("LLM stream error: {e}")))?;

        let mut stream = stream_res.stream;
        let mut output = TurnOutput {
            text: None,
            tool_calls: Vec::new(),
            tokens: 0,
        };

        while let Some(event) = stream.next().await {
            match event {
                Ok(ChatStreamEvent::Chunk(chunk)) => {
                    if self.echo {
                        print!("{}", chunk.content);
                        std::io::stdout().flush().ok();
                    }
                }
                Ok(ChatStreamEvent::End(end)) => {
                    if let Some(text) = end.captured_first_text() {
                        output.text = Some(text.to_string());
                    }
                    if let Some(calls) = end.captured_tool_calls() {
                        output.tool_calls = calls.into_iter().cloned().collect();
                    }
                    if let Some(usage) = &end.captured_usage {
                        output.tokens = usage.prompt_tokens.unwrap_or(0).max(0) as u64
                            + usage.completion_tokens.unwrap_or(0).max(0) as u64;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    // The End event may still arrive.
                    tracing::warn!(error = %e, "Stream error");
                }
            }
        }
        if self.echo {
            println!();
        }
        Ok(output)
    }
}

#[async_trait]
impl SessionRuntime for GenaiRuntime {
    async fn run_session(&self, request: SessionRequest) -> anyhow::Result<SessionOutcome> {
        let session_id = request.session_id.as_str();
        let agent_id = request.agent_id.as_str();
        let max_turns = request.model.max_turns.unwrap_or(DEFAULT_MAX_TURNS);
        let tool_defs = define_tools(&request.tools);
        let chat_options = ChatOptions::default()
            .with_capture_content(true)
            .with_capture_tool_calls(true)
            .with_capture_usage(true);

        let mut conversation = request.prior_conversation.clone();
        if let Some(message) = &request.initial_message {
            conversation.push(ConversationTurn::user(message.clone()));
        }
        request
            .callbacks
            .on_messages_update(session_id, &conversation)
            .await;

        let mut last_text = String::new();
        let mut tokens_used: u64 = 0;
        let mut turn: u32 = 0;

        let outcome = |conversation: Vec<ConversationTurn>,
                       reason: CompletionReason,
                       final_output: String,
                       suspend_info: Option<SuspendInfo>| SessionOutcome {
            final_conversation: conversation,
            completion_reason: reason,
            final_output,
            suspend_info,
        };

        loop {
            if request.cancel.is_cancelled() {
                return Err(SessionError::Cancelled.into());
            }
            if turn >= max_turns {
                tracing::info!(agent_id, turn, "Turn limit reached");
                return Ok(outcome(conversation, CompletionReason::MaxTurns, last_text, None));
            }
            turn += 1;

            let mut chat_req =
                ChatRequest::from_system(&request.system_prompt).with_tools(tool_defs.clone());
            for msg in to_chat_messages(&conversation) {
                chat_req = chat_req.append_message(msg);
            }

            if self.echo {
                eprintln!("[{agent_id}] turn {turn}");
            }
            let response = tokio::select! {
                _ = request.cancel.cancelled() => return Err(SessionError::Cancelled.into()),
                response = self.stream_turn(&request.model.model, chat_req, &chat_options) => response?,
            };
            tokens_used += response.tokens;

            if let Some(text) = response.text.filter(|t| !t.trim().is_empty()) {
                conversation.push(ConversationTurn::assistant(text.clone()));
                last_text = text;
            }

            if response.tool_calls.is_empty() {
                conversation.push(ConversationTurn::user(NUDGE));
            } else {
                for call in &response.tool_calls {
                    conversation.push(ConversationTurn::ToolCall {
                        call_id: call.call_id.clone(),
                        name: call.fn_name.clone(),
                        arguments: call.fn_arguments.clone(),
                    });
                }

                let mut ended: Option<(CompletionReason, String, Option<SuspendInfo>)> = None;
                for call in &response.tool_calls {
                    if ended.is_some() {
                        conversation.push(ConversationTurn::ToolResult {
                            call_id: call.call_id.clone(),
                            content: json!({ "skipped": "session ended" }).to_string(),
                        });
                        continue;
                    }

                    tracing::debug!(agent_id, tool = %call.fn_name, "Tool call");
                    if call.fn_name == TASK_COMPLETE_TOOL {
                        conversation.push(ConversationTurn::ToolResult {
                            call_id: call.call_id.clone(),
                            content: json!({ "ok": true }).to_string(),
                        });
                        ended = Some((
                            CompletionReason::TaskComplete,
                            completion_summary(&call.fn_arguments),
                            None,
                        ));
                        continue;
                    }

                    let output = request
                        .tools
                        .execute(&call.fn_name, call.fn_arguments.clone())
                        .await;
                    conversation.push(ConversationTurn::ToolResult {
                        call_id: call.call_id.clone(),
                        content: output.to_content(),
                    });
                    if let ToolOutput::Suspend { reason, data } = output {
                        let info = SuspendInfo { reason, data };
                        request.callbacks.on_suspend(session_id, &info).await;
                        ended = Some((CompletionReason::Suspended, last_text.clone(), Some(info)));
                    }
                }

                if let Some((reason, final_output, suspend_info)) = ended {
                    request
                        .callbacks
                        .on_messages_update(session_id, &conversation)
                        .await;
                    return Ok(outcome(conversation, reason, final_output, suspend_info));
                }
            }

            request
                .callbacks
                .on_messages_update(session_id, &conversation)
                .await;

            if let Some(limit) = request.model.token_limit {
                if tokens_used >= limit {
                    tracing::info!(agent_id, tokens_used, limit, "Token limit reached");
                    return Ok(outcome(conversation, CompletionReason::MaxTurns, last_text, None));
                }
            }
        }
    }
}
