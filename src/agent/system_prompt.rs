//! System prompt and session kickoff message construction.
//!
//! The system prompt wraps the agent's role with team context (goal, roster,
//! available tools, working rules). The kickoff message tells the agent what
//! changed since its last session: its current task and any inbound messages.

use crate::team::state::TeamState;
use crate::team::types::{AgentState, MessageKind, TeamMessage};

/// Build the system prompt for `agent`.
pub fn build_system_prompt(
    state: &TeamState,
    agent: &AgentState,
    is_manager: bool,
    tool_descriptions: &str,
) -> String {
    let mut prompt = String::with_capacity(2048);

    if is_manager {
        prompt.push_str(&format!(
            "You are {}, the manager of a small team of autonomous agents.\n\
             You are responsible for the team's goal and are the only one who can \
             declare it complete.\n\n",
            agent.id
        ));
    } else {
        prompt.push_str(&format!(
            "You are {}, a team member with the role: {}.\n\
             You receive tasks from your manager and report back when they are done.\n\n",
            agent.id, agent.role
        ));
    }

    prompt.push_str("## Team Goal\n\n");
    prompt.push_str(&state.goal);
    prompt.push_str("\n\n");

    prompt.push_str("## Team Members\n\n");
    for member in state.agent_states.iter() {
        let marker = if member.id == agent.id { " (you)" } else { "" };
        prompt.push_str(&format!("- **{}**: {}{marker}\n", member.id, member.role));
    }
    prompt.push('\n');

    prompt.push_str("## Available Tools\n\n");
    prompt.push_str(tool_descriptions);
    prompt.push_str("\n\n");

    prompt.push_str("## Instructions\n\n");
    if is_manager {
        prompt.push_str(
            "1. Break the goal into concrete tasks and hand them out with assign_task.\n\
             2. After assigning work, call wait_for_task_completions instead of polling.\n\
             3. Completion reports arrive as messages; review them and decide next steps.\n\
             4. Answer questions from team members with tell, using in_reply_to.\n\
             5. When the goal is fully achieved, call task_complete with a final summary.\n",
        );
    } else {
        prompt.push_str(
            "1. Use get_task_brief to read your current task.\n\
             2. If you need information from someone, use ask; you will resume once they reply.\n\
             3. Answer questions addressed to you with tell, using in_reply_to.\n\
             4. When your task is done, call task_complete with a concise summary of the result.\n",
        );
    }

    prompt
}

/// Build the opening user message for a session.
///
/// Returns `None` when there is nothing new to tell the agent.
pub fn build_initial_message(
    state: &TeamState,
    agent: &AgentState,
    is_manager: bool,
    inbox: &[TeamMessage],
) -> Option<String> {
    let mut sections = Vec::new();

    if is_manager && agent.conversation_history.is_empty() {
        sections.push(format!(
            "Goal: {}\n\nPlan the work and assign tasks to your team.",
            state.goal
        ));
    }

    if agent.conversation_history.is_empty() {
        if let Some(task) = agent.current_task.as_deref().and_then(|id| state.task(id)) {
            sections.push(format!(
                "Your current task is {} \"{}\" (from {}):\n\n{}",
                task.id, task.title, task.created_by, task.brief
            ));
        }
    }

    if !inbox.is_empty() {
        let mut lines = String::from("New messages:\n");
        for message in inbox {
            match message.kind {
                MessageKind::Ask => lines.push_str(&format!(
                    "- [{}] question from {}: {}\n  (answer with tell, in_reply_to = {})\n",
                    message.id, message.from, message.content, message.id
                )),
                MessageKind::Tell => lines.push_str(&format!(
                    "- [{}] from {}: {}\n",
                    message.id, message.from, message.content
                )),
            }
        }
        sections.push(lines);
    }

    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}
