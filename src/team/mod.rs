//! Team coordination core: state, task and message lifecycles, coordination
//! tools, and the run loop that schedules agents.

pub mod coordinator;
pub mod events;
pub mod journal;
pub mod messages;
pub mod runner;
pub mod state;
pub mod store;
pub mod tasks;
pub mod tools;
pub mod types;

pub use coordinator::{
    AgentSpec, CoordinatorOptions, TeamCoordinator, TeamRunResult, Termination,
};
pub use events::{HookSet, NoopHooks, TeamEvent, TeamHooks, TracingHooks};
pub use state::TeamState;
pub use store::{StoreOptions, TeamStore};
pub use tools::{TeamTool, ToolOutput, ToolTable};
