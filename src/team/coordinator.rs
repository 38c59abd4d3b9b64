//! Run loop and scheduler for a team of one manager and N workers.
//!
//! [`TeamCoordinator`] owns a private [`TeamStore`] and an [`AgentRunner`].
//! Each iteration it derives work items and blocked agents from the state,
//! decides which agent runs next, and detects termination. Sessions run one
//! at a time: the loop awaits every invocation before scheduling the next.
//!
//! **Stopping:** [`TeamCoordinator::stop`] sets a cooperative flag checked at
//! loop and batch boundaries, cancels in-flight sessions, and waits on a
//! `watch` channel until the loop has actually exited.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::watch;

use super::runner::AgentRunner;
use super::state::TeamState;
use super::store::{StoreOptions, TeamStore};
use super::tools::TeamTool;
use super::types::{AgentId, AgentRunResult, AgentState, BlockedAgent, TeamMessage, WorkItem};
use crate::agent::runtime::{ModelConfig, SessionRuntime};
use crate::error::TeamError;

/// Default bound on run loop iterations.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Identifiers treated as outside the team even if no agent has that id.
pub const DEFAULT_EXTERNAL_IDS: &[&str] = &["human", "operator"];

/// Id and free-form role of one team member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentSpec {
    pub id: AgentId,
    pub role: String,
}

impl AgentSpec {
    pub fn new(id: impl Into<AgentId>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
        }
    }
}

/// Construction options for a [`TeamCoordinator`].
#[derive(Clone)]
pub struct CoordinatorOptions {
    pub model: ModelConfig,
    pub max_iterations: usize,
    /// Reserved ids whose asks can only be answered from outside the team.
    pub external_ids: Vec<String>,
    /// Domain tools merged into every agent's tool table.
    pub domain_tools: Vec<Arc<dyn TeamTool>>,
    pub store: StoreOptions,
}

impl CoordinatorOptions {
    pub fn new(model: ModelConfig) -> Self {
        Self {
            model,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            external_ids: DEFAULT_EXTERNAL_IDS.iter().map(|s| s.to_string()).collect(),
            domain_tools: Vec::new(),
            store: StoreOptions::default(),
        }
    }
}

/// Why the run loop exited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    GoalComplete,
    /// Some agent waits on a reply that must come from outside the team.
    ExternallyBlocked,
    /// Agents wait on each other and nobody can answer.
    Deadlocked,
    /// No work and nothing blocked after the manager reassessed.
    Finished,
    Stopped,
    MaxIterations,
}

/// Outcome of [`TeamCoordinator::run`].
#[derive(Clone, Debug, Serialize)]
pub struct TeamRunResult {
    pub complete: bool,
    pub blocked_agents: Vec<BlockedAgent>,
    pub iterations: usize,
    pub termination: Termination,
}

/// Clears the running and stop flags when the loop future finishes or is
/// dropped.
struct RunningGuard {
    running: Arc<watch::Sender<bool>>,
    stop_requested: Arc<AtomicBool>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.send_replace(false);
        self.stop_requested.store(false, Ordering::SeqCst);
    }
}

/// Coordinates one team. Cheap to clone; clones drive the same team.
#[derive(Clone)]
pub struct TeamCoordinator {
    team: TeamStore,
    runner: AgentRunner,
    max_iterations: usize,
    external_ids: Arc<Vec<String>>,
    stop_requested: Arc<AtomicBool>,
    running: Arc<watch::Sender<bool>>,
}

impl TeamCoordinator {
    /// Build a fresh team: the manager first, then the workers in order.
    pub fn new(
        goal: impl Into<String>,
        manager: AgentSpec,
        workers: Vec<AgentSpec>,
        runtime: Arc<dyn SessionRuntime>,
        options: CoordinatorOptions,
    ) -> Result<Self, TeamError> {
        let manager_id = manager.id.clone();
        let mut state = TeamState::new(goal, [AgentState::new(manager.id, manager.role)]);
        for worker in workers {
            if state.agent_states.contains(&worker.id) {
                return Err(TeamError::InvalidState(format!(
                    "duplicate agent id: {}",
                    worker.id
                )));
            }
            state
                .agent_states
                .insert(AgentState::new(worker.id, worker.role));
        }
        Ok(Self::from_parts(state, manager_id, runtime, options))
    }

    /// Resume a team from a previously persisted state.
    pub fn restore(
        state: TeamState,
        manager_id: impl Into<AgentId>,
        runtime: Arc<dyn SessionRuntime>,
        options: CoordinatorOptions,
    ) -> Result<Self, TeamError> {
        let manager_id = manager_id.into();
        state.check_invariants()?;
        state.agent(&manager_id)?;
        tracing::info!(
            manager_id = %manager_id,
            agents = state.agent_states.len(),
            tasks = state.tasks.len(),
            messages = state.messages.len(),
            "Restoring team"
        );
        Ok(Self::from_parts(state, manager_id, runtime, options))
    }

    fn from_parts(
        state: TeamState,
        manager_id: AgentId,
        runtime: Arc<dyn SessionRuntime>,
        options: CoordinatorOptions,
    ) -> Self {
        let team = TeamStore::new(state, manager_id, options.store);
        let runner = AgentRunner::new(team.clone(), runtime, options.model, options.domain_tools);
        let (running, _) = watch::channel(false);
        Self {
            team,
            runner,
            max_iterations: options.max_iterations,
            external_ids: Arc::new(options.external_ids),
            stop_requested: Arc::new(AtomicBool::new(false)),
            running: Arc::new(running),
        }
    }

    /// Handle to the team's state store.
    pub fn store(&self) -> &TeamStore {
        &self.team
    }

    /// Clone of the current state.
    pub fn state(&self) -> TeamState {
        self.team.snapshot()
    }

    pub fn work_items(&self) -> Vec<WorkItem> {
        self.team.read(TeamState::work_items)
    }

    pub fn blocked_agents(&self) -> Vec<BlockedAgent> {
        self.team.read(TeamState::blocked_agents)
    }

    /// Deliver a reply from outside the team to a pending ask.
    ///
    /// Unknown or non-ask message ids are logged and ignored.
    pub async fn deliver_message_reply(
        &self,
        message_id: &str,
        content: &str,
    ) -> Option<TeamMessage> {
        self.team.deliver_message_reply(message_id, content).await
    }

    /// Run one agent session outside the loop.
    pub async fn run_agent(&self, agent_id: &str) -> Result<AgentRunResult, TeamError> {
        self.runner.run_agent(agent_id).await
    }

    /// Drive the team until the goal completes, progress needs outside input,
    /// it stalls, it is stopped, or the iteration bound is reached.
    ///
    /// A `stop()` issued before the loop starts is honored: the run returns
    /// `Stopped` without invoking any agent.
    pub async fn run(&self) -> TeamRunResult {
        self.running.send_replace(true);
        let _guard = RunningGuard {
            running: self.running.clone(),
            stop_requested: self.stop_requested.clone(),
        };
        let result = self.run_loop().await;
        tracing::info!(
            termination = ?result.termination,
            iterations = result.iterations,
            blocked = result.blocked_agents.len(),
            "Team run finished"
        );
        result
    }

    /// Stop the loop and cancel in-flight sessions.
    ///
    /// Resolves with the current state once the loop has exited.
    pub async fn stop(&self) -> TeamState {
        self.stop_requested.store(true, Ordering::SeqCst);
        let cancelled = self.runner.cancel_all();
        tracing::info!(cancelled, "Stop requested");

        let mut rx = self.running.subscribe();
        // Only fails if the sender is gone, which means no loop is running.
        let _ = rx.wait_for(|running| !*running).await;
        self.state()
    }

    fn should_stop(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    async fn run_loop(&self) -> TeamRunResult {
        let manager_id = self.team.manager_id().to_string();
        let mut iterations = 0;

        if self.should_stop() {
            return self.finish(Termination::Stopped, iterations);
        }
        self.manager_pass(&manager_id).await;

        loop {
            if self.team.goal_complete() {
                return self.finish(Termination::GoalComplete, iterations);
            }
            if self.should_stop() {
                return self.finish(Termination::Stopped, iterations);
            }
            if iterations >= self.max_iterations {
                tracing::warn!(max_iterations = self.max_iterations, "Iteration bound reached");
                return self.finish(Termination::MaxIterations, iterations);
            }
            iterations += 1;

            let (external, internal) = self.partition_blocked();
            if !external.is_empty() {
                for blocked in &external {
                    tracing::info!(
                        agent_id = %blocked.agent_id,
                        message_id = %blocked.message_id,
                        waiting_on = %blocked.waiting_on,
                        "Agent waiting on an external reply"
                    );
                }
                return TeamRunResult {
                    complete: false,
                    blocked_agents: external,
                    iterations,
                    termination: Termination::ExternallyBlocked,
                };
            }

            let work = self.work_items();
            if work.is_empty() {
                if !internal.is_empty() {
                    match self.find_responder() {
                        Some(responder) => {
                            tracing::debug!(agent_id = %responder, "Running responder for blocked teammate");
                            self.invoke(&responder).await;
                            continue;
                        }
                        None => {
                            tracing::warn!(blocked = internal.len(), "Team deadlocked");
                            return self.finish(Termination::Deadlocked, iterations);
                        }
                    }
                }

                tracing::debug!("No work pending, manager reassessing");
                self.invoke(&manager_id).await;
                if self.team.goal_complete() {
                    continue;
                }
                let stalled = self.team.read(|s| s.work_items().is_empty() && s.blocked_agents().is_empty());
                if stalled {
                    return self.finish(Termination::Finished, iterations);
                }
                continue;
            }

            tracing::debug!(items = work.len(), iteration = iterations, "Executing work batch");
            for item in &work {
                if self.team.goal_complete() || self.should_stop() {
                    break;
                }
                self.invoke(&item.agent_id).await;
            }

            if !self.team.goal_complete() && !self.should_stop() {
                self.manager_pass(&manager_id).await;
            }
        }
    }

    /// Run one agent; failures are logged and the loop carries on.
    async fn invoke(&self, agent_id: &str) -> Option<AgentRunResult> {
        match self.runner.run_agent(agent_id).await {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::error!(agent_id, error = %e, "Agent invocation failed");
                None
            }
        }
    }

    /// Run the manager unless it is waiting on a reply. A blocked manager is
    /// resumed by the reply, not by another session.
    async fn manager_pass(&self, manager_id: &str) {
        let blocked = self
            .team
            .read(|state| state.agent(manager_id).is_ok_and(|a| a.is_blocked()));
        if blocked {
            tracing::debug!(agent_id = manager_id, "Manager is blocked; skipping its pass");
            return;
        }
        self.invoke(manager_id).await;
    }

    /// Split blocked agents into (external, internal).
    ///
    /// An agent is externally blocked when its ask is addressed to an id that
    /// is not on the roster or is a reserved external id.
    fn partition_blocked(&self) -> (Vec<BlockedAgent>, Vec<BlockedAgent>) {
        self.team.read(|state| {
            state.blocked_agents().into_iter().partition(|blocked| {
                !state.agent_states.contains(&blocked.waiting_on)
                    || self.external_ids.iter().any(|id| *id == blocked.waiting_on)
            })
        })
    }

    /// First non-blocked agent, in roster order, with a pending inbound message.
    fn find_responder(&self) -> Option<AgentId> {
        self.team.read(|state| {
            state
                .agent_states
                .iter()
                .find(|agent| !agent.is_blocked() && state.has_pending_inbound(&agent.id))
                .map(|agent| agent.id.clone())
        })
    }

    fn finish(&self, termination: Termination, iterations: usize) -> TeamRunResult {
        TeamRunResult {
            complete: self.team.goal_complete(),
            blocked_agents: self.blocked_agents(),
            iterations,
            termination,
        }
    }
}
