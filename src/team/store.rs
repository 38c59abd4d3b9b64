//! Shared handle to a team's private state.
//!
//! [`TeamStore`] wraps the [`TeamState`] behind `Arc<Mutex<..>>` so the run
//! loop, the agent runner and the coordination tools handed to a session can
//! all reach it. Each coordinator builds its own store; nothing is global.
//!
//! **Concurrency model:** agent sessions run one at a time, so the lock is
//! uncontended. It is only held for the synchronous part of a mutation: the
//! events a mutation produces are collected under the lock and dispatched to
//! the hooks after it is released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::events::{NoopHooks, TeamEvent, TeamHooks, dispatch};
use super::state::{TeamState, default_message_id, default_task_id};
use super::types::AgentId;

/// Pluggable id generator: receives the current state, returns a fresh id.
pub type IdGenerator = Arc<dyn Fn(&TeamState) -> String + Send + Sync>;

/// Construction options for a [`TeamStore`].
#[derive(Clone)]
pub struct StoreOptions {
    pub task_ids: IdGenerator,
    pub message_ids: IdGenerator,
    pub hooks: Arc<dyn TeamHooks>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            task_ids: Arc::new(default_task_id),
            message_ids: Arc::new(default_message_id),
            hooks: Arc::new(NoopHooks),
        }
    }
}

/// Per-team state store handle. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct TeamStore {
    state: Arc<Mutex<TeamState>>,
    manager_id: AgentId,
    task_ids: IdGenerator,
    message_ids: IdGenerator,
    hooks: Arc<dyn TeamHooks>,
}

impl TeamStore {
    pub fn new(state: TeamState, manager_id: impl Into<AgentId>, options: StoreOptions) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            manager_id: manager_id.into(),
            task_ids: options.task_ids,
            message_ids: options.message_ids,
            hooks: options.hooks,
        }
    }

    pub fn manager_id(&self) -> &str {
        &self.manager_id
    }

    pub fn is_manager(&self, agent_id: &str) -> bool {
        agent_id == self.manager_id
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> TeamState {
        self.lock().clone()
    }

    /// Run a read-only closure against the state.
    pub fn read<R>(&self, f: impl FnOnce(&TeamState) -> R) -> R {
        f(&self.lock())
    }

    pub fn goal_complete(&self) -> bool {
        self.lock().goal_complete
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TeamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn next_task_id(&self, state: &TeamState) -> String {
        (self.task_ids)(state)
    }

    pub(crate) fn next_message_id(&self, state: &TeamState) -> String {
        (self.message_ids)(state)
    }

    /// Dispatch events to the hooks, then report the new state once.
    pub(crate) async fn emit(&self, events: Vec<TeamEvent>) {
        if events.is_empty() {
            return;
        }
        for event in &events {
            dispatch(self.hooks.as_ref(), event).await;
        }
        let snapshot = self.snapshot();
        self.hooks.on_state_changed(&snapshot).await;
    }
}

/// Current time as an RFC 3339 string.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
