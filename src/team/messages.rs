//! Message routing between agents: suspending asks, non-suspending tells,
//! reply matching, and blocking/unblocking of askers.

use serde_json::json;

use super::events::TeamEvent;
use super::state::TeamState;
use super::store::{TeamStore, now_rfc3339};
use super::tools::ToolOutput;
use super::types::{
    AgentStatus, ConversationTurn, MessageId, MessageKind, MessageStatus, TeamMessage,
};
use crate::error::TeamError;

/// Suspension reason used by `ask`.
pub const SUSPEND_AWAITING_REPLY: &str = "awaiting_reply";

impl TeamStore {
    /// Send a question from `from_id` to `to_id`.
    ///
    /// Always creates a `Pending` ask and returns a suspension carrying the new
    /// message id, which ends the asker's session. The asker is blocked once the
    /// runner processes that suspension (see [`TeamStore::block_agent`]).
    pub async fn ask(
        &self,
        from_id: &str,
        to_id: &str,
        question: &str,
    ) -> Result<ToolOutput, TeamError> {
        let message = {
            let mut state = self.lock();
            state.agent(from_id)?;
            let message = TeamMessage {
                id: self.next_message_id(&state),
                from: from_id.to_string(),
                to: to_id.to_string(),
                kind: MessageKind::Ask,
                content: question.to_string(),
                in_reply_to: None,
                status: MessageStatus::Pending,
                created_at: now_rfc3339(),
            };
            state.messages.push(message.clone());
            message
        };

        let output = ToolOutput::Suspend {
            reason: SUSPEND_AWAITING_REPLY.to_string(),
            data: json!({
                "message_id": message.id,
                "to": message.to,
            }),
        };
        self.emit(vec![TeamEvent::MessageSent { message }]).await;
        Ok(output)
    }

    /// Send a non-suspending message from `from_id` to `to_id`.
    ///
    /// With `in_reply_to`, the referenced ask is closed out. Without it, if the
    /// recipient is blocked on an ask it sent to `from_id`, this tell is taken
    /// as the reply to that ask. A matched asker that is still blocked on the
    /// ask is unblocked and sees the reply as a new conversation turn.
    pub async fn tell(
        &self,
        from_id: &str,
        to_id: &str,
        content: &str,
        in_reply_to: Option<&str>,
    ) -> Result<TeamMessage, TeamError> {
        let (message, events) = {
            let mut state = self.lock();
            state.agent(from_id)?;

            let matched = match in_reply_to {
                Some(ask_id) => {
                    let ask = state
                        .message(ask_id)
                        .ok_or_else(|| TeamError::UnknownMessage(ask_id.to_string()))?;
                    if ask.kind != MessageKind::Ask {
                        return Err(TeamError::NotAnAsk(ask_id.to_string()));
                    }
                    Some(ask_id.to_string())
                }
                None => implicit_reply_target(&state, from_id, to_id),
            };

            let message = TeamMessage {
                id: self.next_message_id(&state),
                from: from_id.to_string(),
                to: to_id.to_string(),
                kind: MessageKind::Tell,
                content: content.to_string(),
                in_reply_to: matched.clone(),
                status: MessageStatus::Delivered,
                created_at: now_rfc3339(),
            };
            state.messages.push(message.clone());

            let mut events = vec![TeamEvent::MessageSent {
                message: message.clone(),
            }];
            if let Some(ask_id) = matched {
                events.extend(close_ask(&mut state, &ask_id, from_id, content)?);
            }
            (message, events)
        };

        self.emit(events).await;
        Ok(message)
    }

    /// Deliver a reply to `message_id` from outside the team (e.g. a human).
    ///
    /// A missing or non-ask `message_id` is logged and ignored: nothing is
    /// mutated and no hook fires. Returns the synthesized reply on success.
    pub async fn deliver_message_reply(
        &self,
        message_id: &str,
        content: &str,
    ) -> Option<TeamMessage> {
        let (reply, events) = {
            let mut state = self.lock();
            let ask = match state.message(message_id) {
                Some(m) if m.kind == MessageKind::Ask => m.clone(),
                Some(_) => {
                    tracing::warn!(message_id, "Ignoring reply: message is not an ask");
                    return None;
                }
                None => {
                    tracing::warn!(message_id, "Ignoring reply: unknown message");
                    return None;
                }
            };

            let reply = TeamMessage {
                id: self.next_message_id(&state),
                from: ask.to.clone(),
                to: ask.from.clone(),
                kind: MessageKind::Tell,
                content: content.to_string(),
                in_reply_to: Some(ask.id.clone()),
                status: MessageStatus::Delivered,
                created_at: now_rfc3339(),
            };
            state.messages.push(reply.clone());

            let mut events = vec![TeamEvent::MessageSent {
                message: reply.clone(),
            }];
            match close_ask(&mut state, &ask.id, &ask.to, content) {
                Ok(more) => events.extend(more),
                Err(e) => {
                    tracing::warn!(message_id, error = %e, "Reply delivered but asker not updated");
                }
            }
            (reply, events)
        };

        self.emit(events).await;
        Some(reply)
    }

    /// Block `agent_id` until `message_id` is answered.
    ///
    /// Re-blocking an agent that already waits on a different ask replaces the
    /// old wait; the old ask stays pending and is logged.
    pub async fn block_agent(&self, agent_id: &str, message_id: &str) -> Result<(), TeamError> {
        {
            let mut state = self.lock();
            state.agent(agent_id)?;
            match state.message(message_id) {
                Some(m) if m.kind == MessageKind::Ask => {}
                Some(_) => return Err(TeamError::NotAnAsk(message_id.to_string())),
                None => return Err(TeamError::UnknownMessage(message_id.to_string())),
            }
            let agent = state.agent_mut(agent_id)?;
            if let Some(previous) = agent.blocked_on.as_deref() {
                if previous != message_id {
                    tracing::warn!(
                        agent_id,
                        previous,
                        message_id,
                        "Agent re-blocked while already waiting on another ask"
                    );
                }
            }
            agent.status = AgentStatus::Blocked;
            agent.blocked_on = Some(message_id.to_string());
        }

        self.emit(vec![TeamEvent::AgentBlocked {
            agent_id: agent_id.to_string(),
            message_id: message_id.to_string(),
        }])
        .await;
        Ok(())
    }

    /// Surface pending inbound messages to `agent_id`.
    ///
    /// Pending tells are marked delivered as they are read. Pending asks are
    /// returned too but stay pending until answered.
    pub async fn take_inbox(&self, agent_id: &str) -> Result<Vec<TeamMessage>, TeamError> {
        let (inbox, events) = {
            let mut state = self.lock();
            state.agent(agent_id)?;

            let mut inbox = Vec::new();
            let mut events = Vec::new();
            for message in state
                .messages
                .iter_mut()
                .filter(|m| m.to == agent_id && m.status == MessageStatus::Pending)
            {
                if message.kind == MessageKind::Tell {
                    message.status = MessageStatus::Delivered;
                    events.push(TeamEvent::MessageDelivered {
                        message: message.clone(),
                    });
                }
                inbox.push(message.clone());
            }
            (inbox, events)
        };

        self.emit(events).await;
        Ok(inbox)
    }
}

/// Heuristic reply matching for a tell sent without `in_reply_to`.
///
/// If the recipient is blocked on an ask it sent to the sender, that ask is
/// the one being answered.
fn implicit_reply_target(state: &TeamState, from_id: &str, to_id: &str) -> Option<MessageId> {
    let recipient = state.agent_states.get(to_id)?;
    if recipient.status != AgentStatus::Blocked {
        return None;
    }
    let ask = state.message(recipient.blocked_on.as_deref()?)?;
    (ask.kind == MessageKind::Ask && ask.from == to_id && ask.to == from_id)
        .then(|| ask.id.clone())
}

/// Mark `ask_id` delivered and unblock its sender if it is waiting on it.
fn close_ask(
    state: &mut TeamState,
    ask_id: &str,
    replier: &str,
    reply: &str,
) -> Result<Vec<TeamEvent>, TeamError> {
    let mut events = Vec::new();

    let ask = state
        .messages
        .iter_mut()
        .find(|m| m.id == ask_id)
        .ok_or_else(|| TeamError::UnknownMessage(ask_id.to_string()))?;
    if ask.status == MessageStatus::Pending {
        ask.status = MessageStatus::Delivered;
        events.push(TeamEvent::MessageDelivered {
            message: ask.clone(),
        });
    }
    let asker_id = ask.from.clone();

    // The asker may be outside the team (an external party asked us).
    let Some(asker) = state.agent_states.get_mut(&asker_id) else {
        return Ok(events);
    };
    if asker.blocked_on.as_deref() == Some(ask_id) {
        asker.blocked_on = None;
        asker.status = if asker.current_task.is_some() {
            AgentStatus::Working
        } else {
            AgentStatus::Idle
        };
        asker.conversation_history.push(ConversationTurn::user(format!(
            "Reply from {replier} to your question ({ask_id}):\n\n{reply}"
        )));
        events.push(TeamEvent::AgentUnblocked { agent_id: asker_id });
    }
    Ok(events)
}
