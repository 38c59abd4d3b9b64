//! Observable team transitions and the callback interface for them.
//!
//! Every mutation of the [`super::state::TeamState`] produces one or more
//! [`TeamEvent`]s. The store dispatches them to a [`TeamHooks`] implementation
//! after releasing its lock, awaiting each hook before the mutating call
//! returns, so hooks may persist state.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::state::TeamState;
use super::types::{AgentId, MessageId, Task, TeamMessage};

/// A single observable transition.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TeamEvent {
    TaskCreated { task: Task },
    TaskActivated { task: Task },
    TaskCompleted { task: Task },
    MessageSent { message: TeamMessage },
    MessageDelivered { message: TeamMessage },
    AgentBlocked { agent_id: AgentId, message_id: MessageId },
    AgentUnblocked { agent_id: AgentId },
    GoalComplete { summary: String },
}

/// Callback hooks for team transitions. All methods default to no-ops.
#[async_trait]
pub trait TeamHooks: Send + Sync {
    async fn on_task_created(&self, _task: &Task) {}
    async fn on_task_activated(&self, _task: &Task) {}
    async fn on_task_completed(&self, _task: &Task) {}
    async fn on_message_sent(&self, _message: &TeamMessage) {}
    async fn on_message_delivered(&self, _message: &TeamMessage) {}
    async fn on_agent_blocked(&self, _agent_id: &str, _message_id: &str) {}
    async fn on_agent_unblocked(&self, _agent_id: &str) {}
    async fn on_goal_complete(&self, _summary: &str) {}
    /// Fired once after each batch of transitions with a snapshot of the state.
    async fn on_state_changed(&self, _state: &TeamState) {}
}

/// Route an event to the matching hook method.
pub async fn dispatch(hooks: &dyn TeamHooks, event: &TeamEvent) {
    match event {
        TeamEvent::TaskCreated { task } => hooks.on_task_created(task).await,
        TeamEvent::TaskActivated { task } => hooks.on_task_activated(task).await,
        TeamEvent::TaskCompleted { task } => hooks.on_task_completed(task).await,
        TeamEvent::MessageSent { message } => hooks.on_message_sent(message).await,
        TeamEvent::MessageDelivered { message } => hooks.on_message_delivered(message).await,
        TeamEvent::AgentBlocked {
            agent_id,
            message_id,
        } => hooks.on_agent_blocked(agent_id, message_id).await,
        TeamEvent::AgentUnblocked { agent_id } => hooks.on_agent_unblocked(agent_id).await,
        TeamEvent::GoalComplete { summary } => hooks.on_goal_complete(summary).await,
    }
}

/// Hooks that do nothing.
pub struct NoopHooks;

impl TeamHooks for NoopHooks {}

/// Hooks that log every transition through `tracing`.
pub struct TracingHooks;

#[async_trait]
impl TeamHooks for TracingHooks {
    async fn on_task_created(&self, task: &Task) {
        tracing::info!(
            task_id = %task.id,
            assignee = %task.assignee,
            created_by = %task.created_by,
            status = ?task.status,
            "Task created: {}",
            task.title
        );
    }

    async fn on_task_activated(&self, task: &Task) {
        tracing::info!(task_id = %task.id, assignee = %task.assignee, "Task activated");
    }

    async fn on_task_completed(&self, task: &Task) {
        tracing::info!(task_id = %task.id, assignee = %task.assignee, "Task completed");
    }

    async fn on_message_sent(&self, message: &TeamMessage) {
        tracing::info!(
            message_id = %message.id,
            from = %message.from,
            to = %message.to,
            kind = ?message.kind,
            "Message sent"
        );
    }

    async fn on_message_delivered(&self, message: &TeamMessage) {
        tracing::debug!(message_id = %message.id, to = %message.to, "Message delivered");
    }

    async fn on_agent_blocked(&self, agent_id: &str, message_id: &str) {
        tracing::info!(agent_id, message_id, "Agent blocked awaiting reply");
    }

    async fn on_agent_unblocked(&self, agent_id: &str) {
        tracing::info!(agent_id, "Agent unblocked");
    }

    async fn on_goal_complete(&self, summary: &str) {
        tracing::info!(summary, "Goal complete");
    }
}

/// Fan-out to several hook implementations, in order.
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Vec<Arc<dyn TeamHooks>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hooks: Arc<dyn TeamHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }
}

#[async_trait]
impl TeamHooks for HookSet {
    async fn on_task_created(&self, task: &Task) {
        for h in &self.hooks {
            h.on_task_created(task).await;
        }
    }

    async fn on_task_activated(&self, task: &Task) {
        for h in &self.hooks {
            h.on_task_activated(task).await;
        }
    }

    async fn on_task_completed(&self, task: &Task) {
        for h in &self.hooks {
            h.on_task_completed(task).await;
        }
    }

    async fn on_message_sent(&self, message: &TeamMessage) {
        for h in &self.hooks {
            h.on_message_sent(message).await;
        }
    }

    async fn on_message_delivered(&self, message: &TeamMessage) {
        for h in &self.hooks {
            h.on_message_delivered(message).await;
        }
    }

    async fn on_agent_blocked(&self, agent_id: &str, message_id: &str) {
        for h in &self.hooks {
            h.on_agent_blocked(agent_id, message_id).await;
        }
    }

    async fn on_agent_unblocked(&self, agent_id: &str) {
        for h in &self.hooks {
            h.on_agent_unblocked(agent_id).await;
        }
    }

    async fn on_goal_complete(&self, summary: &str) {
        for h in &self.hooks {
            h.on_goal_complete(summary).await;
        }
    }

    async fn on_state_changed(&self, state: &TeamState) {
        for h in &self.hooks {
            h.on_state_changed(state).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TeamHooks for Recorder {
        async fn on_agent_blocked(&self, agent_id: &str, message_id: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("blocked:{agent_id}:{message_id}"));
        }

        async fn on_goal_complete(&self, summary: &str) {
            self.calls.lock().unwrap().push(format!("goal:{summary}"));
        }
    }

    #[tokio::test]
    async fn dispatch_routes_to_matching_hook() {
        let recorder = Recorder::default();
        dispatch(
            &recorder,
            &TeamEvent::AgentBlocked {
                agent_id: "w1".into(),
                message_id: "M-0001".into(),
            },
        )
        .await;
        dispatch(&recorder, &TeamEvent::AgentUnblocked { agent_id: "w1".into() }).await;

        assert_eq!(*recorder.calls.lock().unwrap(), vec!["blocked:w1:M-0001"]);
    }

    #[tokio::test]
    async fn hook_set_fans_out_in_order() {
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let set = HookSet::new().with(a.clone()).with(b.clone());

        set.on_goal_complete("shipped").await;

        assert_eq!(*a.calls.lock().unwrap(), vec!["goal:shipped"]);
        assert_eq!(*b.calls.lock().unwrap(), vec!["goal:shipped"]);
    }

    #[test]
    fn events_serialize_with_tag() {
        let value = serde_json::to_value(TeamEvent::GoalComplete {
            summary: "ok".into(),
        })
        .unwrap();
        assert_eq!(value["event_type"], "goal_complete");
    }
}
