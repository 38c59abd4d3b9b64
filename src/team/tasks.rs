//! Task lifecycle: creation, activation, completion and FIFO promotion.
//!
//! Each agent works on at most one active task. Tasks assigned to a busy agent
//! wait as `Queued` and are promoted in creation order when the agent
//! completes its current task.

use super::events::TeamEvent;
use super::state::TeamState;
use super::store::{TeamStore, now_rfc3339};
use super::types::{
    AgentStatus, ConversationTurn, MessageKind, MessageStatus, Task, TaskStatus,
    TeamMessage,
};
use crate::error::TeamError;

/// Outcome of [`TeamStore::complete_task`].
#[derive(Clone, Debug, PartialEq)]
pub enum TaskCompletion {
    /// The manager declared the goal complete.
    GoalComplete,
    /// The agent had no current task; its session only processed messages.
    NoTask,
    /// The agent's task was completed, optionally followed by a promotion.
    Completed {
        task: Task,
        notification: TeamMessage,
        promoted: Option<Task>,
    },
}

impl TeamStore {
    /// Create a task for `assignee_id`.
    ///
    /// The task starts `Active` and becomes the assignee's current task if the
    /// assignee has none, otherwise it is `Queued`.
    pub async fn assign_task(
        &self,
        creator_id: &str,
        assignee_id: &str,
        title: &str,
        brief: &str,
    ) -> Result<Task, TeamError> {
        let (task, events) = {
            let mut state = self.lock();
            state.agent(assignee_id)?;

            let id = self.next_task_id(&state);
            let idle = state.agent(assignee_id)?.current_task.is_none();
            let task = Task {
                id: id.clone(),
                title: title.to_string(),
                brief: brief.to_string(),
                assignee: assignee_id.to_string(),
                created_by: creator_id.to_string(),
                status: if idle {
                    TaskStatus::Active
                } else {
                    TaskStatus::Queued
                },
                created_at: now_rfc3339(),
                completed_at: None,
                completion_summary: None,
            };
            state.tasks.push(task.clone());

            let mut events = vec![TeamEvent::TaskCreated { task: task.clone() }];
            if idle {
                bind_task(&mut state, assignee_id, &id)?;
                // A fresh agent gets the brief in its kickoff message instead.
                let agent = state.agent_mut(assignee_id)?;
                if !agent.conversation_history.is_empty() {
                    agent.conversation_history.push(ConversationTurn::user(format!(
                        "New task assigned: {} \"{}\" (from {creator_id}).\n\n{brief}",
                        task.id, task.title
                    )));
                }
                events.push(TeamEvent::TaskActivated { task: task.clone() });
            }
            (task, events)
        };

        tracing::debug!(task_id = %task.id, assignee = assignee_id, status = ?task.status, "Assigned task");
        self.emit(events).await;
        Ok(task)
    }

    /// Record that `agent_id` finished its work with `summary`.
    ///
    /// For the manager this declares the whole goal complete. For a worker it
    /// completes the current task, notifies the task's creator with a pending
    /// `tell`, and promotes the oldest queued task for the same worker.
    pub async fn complete_task(
        &self,
        agent_id: &str,
        summary: &str,
    ) -> Result<TaskCompletion, TeamError> {
        if self.is_manager(agent_id) {
            {
                let mut state = self.lock();
                state.agent(agent_id)?;
                state.goal_complete = true;
                state.goal_summary = Some(summary.to_string());
            }
            self.emit(vec![TeamEvent::GoalComplete {
                summary: summary.to_string(),
            }])
            .await;
            return Ok(TaskCompletion::GoalComplete);
        }

        let (completion, events) = {
            let mut state = self.lock();
            let Some(task_id) = state.agent(agent_id)?.current_task.clone() else {
                tracing::debug!(agent_id, "Session ended without a current task");
                return Ok(TaskCompletion::NoTask);
            };

            let now = now_rfc3339();
            let task = {
                let task = state
                    .tasks
                    .iter_mut()
                    .find(|t| t.id == task_id)
                    .ok_or_else(|| {
                        TeamError::InvalidState(format!(
                            "agent {agent_id} holds unknown task {task_id}"
                        ))
                    })?;
                task.status = TaskStatus::Completed;
                task.completed_at = Some(now.clone());
                task.completion_summary = Some(summary.to_string());
                task.clone()
            };

            let agent = state.agent_mut(agent_id)?;
            agent.current_task = None;
            if agent.status != AgentStatus::Blocked {
                agent.status = AgentStatus::Idle;
            }

            let mut events = vec![TeamEvent::TaskCompleted { task: task.clone() }];

            let notification = TeamMessage {
                id: self.next_message_id(&state),
                from: agent_id.to_string(),
                to: task.created_by.clone(),
                kind: MessageKind::Tell,
                content: format!(
                    "Task {} \"{}\" completed by {agent_id}.\nSummary: {summary}",
                    task.id, task.title
                ),
                in_reply_to: None,
                status: MessageStatus::Pending,
                created_at: now,
            };
            state.messages.push(notification.clone());
            events.push(TeamEvent::MessageSent {
                message: notification.clone(),
            });

            let promoted = promote_next_queued(&mut state, agent_id)?;
            if let Some(task) = &promoted {
                events.push(TeamEvent::TaskActivated { task: task.clone() });
            }

            (
                TaskCompletion::Completed {
                    task,
                    notification,
                    promoted,
                },
                events,
            )
        };

        self.emit(events).await;
        Ok(completion)
    }
}

/// Make `task_id` the current task of `agent_id`.
fn bind_task(state: &mut TeamState, agent_id: &str, task_id: &str) -> Result<(), TeamError> {
    let agent = state.agent_mut(agent_id)?;
    agent.current_task = Some(task_id.to_string());
    if agent.status != AgentStatus::Blocked {
        agent.status = AgentStatus::Working;
    }
    Ok(())
}

/// Activate the oldest queued task for `agent_id`, if any, and tell the agent
/// about it through a synthetic conversation turn.
fn promote_next_queued(state: &mut TeamState, agent_id: &str) -> Result<Option<Task>, TeamError> {
    let Some(task) = state
        .tasks
        .iter_mut()
        .find(|t| t.assignee == agent_id && t.status == TaskStatus::Queued)
    else {
        return Ok(None);
    };
    task.status = TaskStatus::Active;
    let task = task.clone();

    bind_task(state, agent_id, &task.id)?;
    state
        .agent_mut(agent_id)?
        .conversation_history
        .push(ConversationTurn::user(format!(
            "Your previous task is complete. New task assigned: {} \"{}\" (from {}).\n\n{}",
            task.id, task.title, task.created_by, task.brief
        )));

    tracing::info!(task_id = %task.id, agent_id, "Promoted queued task");
    Ok(Some(task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::team::store::StoreOptions;
    use crate::team::types::AgentState;

    fn store() -> TeamStore {
        let state = TeamState::new(
            "goal",
            vec![
                AgentState::new("manager", "manager"),
                AgentState::new("worker-1", "worker"),
            ],
        );
        TeamStore::new(state, "manager", StoreOptions::default())
    }

    #[tokio::test]
    async fn assign_to_idle_agent_activates() {
        let store = store();
        let task = store
            .assign_task("manager", "worker-1", "Survey", "Look around")
            .await
            .unwrap();

        assert_eq!(task.id, "T-0001");
        assert_eq!(task.status, TaskStatus::Active);
        let state = store.snapshot();
        let worker = state.agent("worker-1").unwrap();
        assert_eq!(worker.status, AgentStatus::Working);
        assert_eq!(worker.current_task.as_deref(), Some("T-0001"));
    }

    #[tokio::test]
    async fn assign_to_busy_agent_queues() {
        let store = store();
        store.assign_task("manager", "worker-1", "a", "a").await.unwrap();
        let second = store.assign_task("manager", "worker-1", "b", "b").await.unwrap();

        assert_eq!(second.status, TaskStatus::Queued);
        let state = store.snapshot();
        assert_eq!(
            state.agent("worker-1").unwrap().current_task.as_deref(),
            Some("T-0001")
        );
    }

    #[tokio::test]
    async fn assign_to_unknown_agent_fails() {
        let store = store();
        let err = store
            .assign_task("manager", "ghost", "a", "a")
            .await
            .unwrap_err();
        assert!(matches!(err, TeamError::UnknownAgent(id) if id == "ghost"));
        assert!(store.snapshot().tasks.is_empty());
    }

    #[tokio::test]
    async fn complete_notifies_creator_and_idles_agent() {
        let store = store();
        store.assign_task("manager", "worker-1", "a", "a").await.unwrap();

        let completion = store.complete_task("worker-1", "done").await.unwrap();
        let TaskCompletion::Completed {
            task,
            notification,
            promoted,
        } = completion
        else {
            panic!("expected completion");
        };

        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
        assert_eq!(task.completion_summary.as_deref(), Some("done"));
        assert_eq!(notification.to, "manager");
        assert_eq!(notification.status, MessageStatus::Pending);
        assert!(notification.content.contains("done"));
        assert!(promoted.is_none());

        let state = store.snapshot();
        assert_eq!(state.agent("worker-1").unwrap().status, AgentStatus::Idle);
        assert!(state.check_invariants().is_ok());
    }

    #[tokio::test]
    async fn complete_promotes_oldest_queued_task() {
        let store = store();
        store.assign_task("manager", "worker-1", "a", "a").await.unwrap();
        store.assign_task("manager", "worker-1", "b", "brief b").await.unwrap();
        store.assign_task("manager", "worker-1", "c", "c").await.unwrap();

        let completion = store.complete_task("worker-1", "done").await.unwrap();
        let TaskCompletion::Completed { promoted, .. } = completion else {
            panic!("expected completion");
        };
        assert_eq!(promoted.unwrap().id, "T-0002");

        let state = store.snapshot();
        let worker = state.agent("worker-1").unwrap();
        assert_eq!(worker.status, AgentStatus::Working);
        assert_eq!(worker.current_task.as_deref(), Some("T-0002"));
        assert!(worker
            .conversation_history
            .last()
            .and_then(|t| t.text())
            .unwrap()
            .contains("brief b"));
        assert_eq!(state.task("T-0003").unwrap().status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn complete_without_task_is_noop() {
        let store = store();
        let before = store.snapshot();
        let completion = store.complete_task("worker-1", "nothing").await.unwrap();
        assert_eq!(completion, TaskCompletion::NoTask);
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn manager_completion_sets_goal() {
        let store = store();
        store.assign_task("manager", "worker-1", "a", "a").await.unwrap();

        let completion = store.complete_task("manager", "all shipped").await.unwrap();
        assert_eq!(completion, TaskCompletion::GoalComplete);

        let state = store.snapshot();
        assert!(state.goal_complete);
        assert_eq!(state.goal_summary.as_deref(), Some("all shipped"));
        assert_eq!(state.task("T-0001").unwrap().status, TaskStatus::Active);
    }

    #[tokio::test]
    async fn complete_for_unknown_agent_fails() {
        let store = store();
        assert!(matches!(
            store.complete_task("ghost", "x").await,
            Err(TeamError::UnknownAgent(_))
        ));
    }
}
