use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use huddle::agent::genai_runtime::{GenaiRuntime, check_ollama_ready};
use huddle::agent::runtime::ModelConfig;
use huddle::cli::{Cli, Commands};
use huddle::config::{self, AppConfig};
use huddle::team::journal::{StateSnapshot, TeamJournal, load_state, save_state};
use huddle::team::types::{MessageKind, MessageStatus};
use huddle::team::{
    CoordinatorOptions, HookSet, StoreOptions, TeamCoordinator, TeamRunResult, TeamState,
    TeamStore, Termination, TracingHooks,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli)?;
    tracing::info!(model = %config.model, state_file = %config.state_file.display(), "Config loaded");

    match cli.command {
        Commands::Run { goal, no_check, .. } => {
            if !no_check {
                check_ollama_ready(&config.model).await?;
            }
            let coordinator = TeamCoordinator::new(
                goal,
                config.manager.clone(),
                config.workers.clone(),
                Arc::new(GenaiRuntime::new().with_echo(true)),
                coordinator_options(&config)?,
            )?;
            drive(coordinator, &config.state_file).await?;
        }
        Commands::Resume { no_check, .. } => {
            if !no_check {
                check_ollama_ready(&config.model).await?;
            }
            let state = load_state(&config.state_file).await?;
            if state.goal_complete {
                println!("Goal already complete: {}", state.goal_summary.unwrap_or_default());
                return Ok(());
            }
            let coordinator = TeamCoordinator::restore(
                state,
                config.manager.id.clone(),
                Arc::new(GenaiRuntime::new().with_echo(true)),
                coordinator_options(&config)?,
            )?;
            drive(coordinator, &config.state_file).await?;
        }
        Commands::Reply {
            message_id,
            content,
            ..
        } => {
            let state = load_state(&config.state_file).await?;
            let store = TeamStore::new(
                state,
                config.manager.id.clone(),
                StoreOptions {
                    hooks: Arc::new(TracingHooks),
                    ..StoreOptions::default()
                },
            );
            let Some(reply) = store.deliver_message_reply(&message_id, &content).await else {
                anyhow::bail!("{message_id} is not a known question; nothing was delivered");
            };
            save_state(&config.state_file, &store.snapshot()).await?;
            println!(
                "Delivered {} to {} in reply to {message_id}. Run `huddle resume` to continue.",
                reply.id, reply.to
            );
        }
        Commands::Status { .. } => {
            let state = load_state(&config.state_file).await?;
            print_status(&state);
        }
    }

    Ok(())
}

fn coordinator_options(config: &AppConfig) -> anyhow::Result<CoordinatorOptions> {
    let state_dir = match config.state_file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    let journal = TeamJournal::new(&state_dir).context("Failed to create team journal")?;
    tracing::info!(path = %journal.log_path().display(), "Journal opened");

    let hooks = HookSet::new()
        .with(Arc::new(TracingHooks))
        .with(Arc::new(journal))
        .with(Arc::new(StateSnapshot::new(&config.state_file)));

    let mut options = CoordinatorOptions::new(ModelConfig {
        model: config.model.clone(),
        max_turns: Some(config.max_turns),
        token_limit: config.token_limit,
    });
    options.max_iterations = config.max_iterations;
    options.external_ids = config.external_ids.clone();
    options.store = StoreOptions {
        hooks: Arc::new(hooks),
        ..StoreOptions::default()
    };
    Ok(options)
}

/// Run the loop until it finishes or Ctrl-C, then persist the final state.
async fn drive(coordinator: TeamCoordinator, state_file: &Path) -> anyhow::Result<()> {
    let runner = coordinator.clone();
    let mut handle = tokio::spawn(async move { runner.run().await });

    let result = tokio::select! {
        joined = &mut handle => joined?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nStopping team...");
            coordinator.stop().await;
            handle.await?
        }
    };

    save_state(state_file, &coordinator.state()).await?;
    print_result(&result, &coordinator.state());
    eprintln!("State saved to {}", state_file.display());
    Ok(())
}

fn print_result(result: &TeamRunResult, state: &TeamState) {
    match result.termination {
        Termination::GoalComplete => println!(
            "Goal complete after {} iterations.\n\n{}",
            result.iterations,
            state.goal_summary.as_deref().unwrap_or_default()
        ),
        Termination::ExternallyBlocked => {
            println!("Waiting on replies from outside the team:");
            for blocked in &result.blocked_agents {
                let question = state
                    .message(&blocked.message_id)
                    .map(|m| m.content.as_str())
                    .unwrap_or_default();
                println!(
                    "  [{}] {} asks {}: {question}",
                    blocked.message_id, blocked.agent_id, blocked.waiting_on
                );
            }
            println!("Answer with `huddle reply --message-id <id> --content <text>`, then `huddle resume`.");
        }
        other => println!(
            "Run ended ({other:?}) after {} iterations; goal not complete.",
            result.iterations
        ),
    }
}

fn print_status(state: &TeamState) {
    println!("Goal: {}", state.goal);
    if state.goal_complete {
        println!("Status: complete");
        if let Some(summary) = &state.goal_summary {
            println!("Summary: {summary}");
        }
    }

    println!("\nAgents:");
    for agent in state.agent_states.iter() {
        let task = agent.current_task.as_deref().unwrap_or("-");
        let blocked = agent
            .blocked_on
            .as_deref()
            .map(|m| format!(" (waiting on {m})"))
            .unwrap_or_default();
        println!("  {:<16} {:<8?} task {task}{blocked}", agent.id, agent.status);
    }

    println!("\nTasks:");
    for task in &state.tasks {
        println!(
            "  {} {:<9?} {} -> {}: {}",
            task.id, task.status, task.created_by, task.assignee, task.title
        );
    }

    let open: Vec<_> = state
        .messages
        .iter()
        .filter(|m| m.kind == MessageKind::Ask && m.status == MessageStatus::Pending)
        .collect();
    if !open.is_empty() {
        println!("\nOpen questions:");
        for message in open {
            println!("  [{}] {} -> {}: {}", message.id, message.from, message.to, message.content);
        }
    }
}
