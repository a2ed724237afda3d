//! CLI execution subcommands.

use anyhow::{Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use capflow_core::repository::PageRequest;
use capflow_core::repository::execution::ExecutionFilter;
use capflow_types::execution::{ExecutionStatus, LogLevel, NodeStatus, WorkflowExecution};

use crate::state::AppState;

#[derive(Subcommand)]
pub enum ExecutionCommand {
    /// List executions, newest first.
    #[command(alias = "ls")]
    List {
        /// Only executions of this workflow.
        #[arg(long)]
        workflow: Option<Uuid>,

        /// queued, running, completed, failed or cancelled.
        #[arg(long)]
        status: Option<ExecutionStatus>,

        #[arg(long, default_value = "1")]
        page: u32,
    },

    /// Show an execution with its node records.
    Show { id: Uuid },

    /// Show one node's log lines.
    Logs { id: Uuid, node_id: String },

    /// Show durable events after a sequence number.
    Events {
        id: Uuid,

        #[arg(long, default_value = "0")]
        after_seq: u64,
    },

    /// Cancel a queued or running execution.
    Cancel { id: Uuid },

    /// Re-run a finished execution from a node and wait for the result.
    Resume { id: Uuid, node_id: String },
}

pub async fn handle_execution_command(cmd: ExecutionCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        ExecutionCommand::List { workflow, status, page } => {
            let filter = ExecutionFilter {
                workflow_id: workflow,
                status,
            };
            let page = state
                .engine
                .list(&filter, PageRequest::new(Some(page), None))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&page.items)?);
            } else {
                print_execution_list(&page.items, page.total);
            }
        }

        ExecutionCommand::Show { id } => {
            let execution = state.engine.get(&id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&execution)?);
            } else {
                print_execution(&execution);
            }
        }

        ExecutionCommand::Logs { id, node_id } => {
            let logs = state.engine.node_logs(&id, &node_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&logs)?);
            } else if logs.is_empty() {
                println!("  No log lines for node '{node_id}'.");
            } else {
                for entry in &logs {
                    let level = match entry.level {
                        LogLevel::Debug => style("DEBUG").dim(),
                        LogLevel::Info => style("INFO ").green(),
                        LogLevel::Warn => style("WARN ").yellow(),
                        LogLevel::Error => style("ERROR").red(),
                    };
                    println!(
                        "  {} {level} {}",
                        style(entry.at.format("%H:%M:%S%.3f")).dim(),
                        entry.message
                    );
                }
            }
        }

        ExecutionCommand::Events { id, after_seq } => {
            let events = state.engine.events_since(&id, after_seq).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else {
                for event in &events {
                    println!(
                        "  {:>4}  {}  {}",
                        event.seq,
                        style(event.at.format("%H:%M:%S%.3f")).dim(),
                        serde_json::to_string(&event.kind)?
                    );
                }
            }
        }

        ExecutionCommand::Cancel { id } => {
            state.engine.cancel(&id).await?;
            let execution = state.engine.get(&id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&execution)?);
            } else {
                println!(
                    "  {} Execution {id} is {}",
                    style("*").green().bold(),
                    status_style(execution.status)
                );
            }
        }

        ExecutionCommand::Resume { id, node_id } => {
            if !json {
                println!(
                    "  {} Resuming {id} from '{}'...",
                    style(">").cyan().bold(),
                    style(&node_id).cyan()
                );
            }
            let execution = state.engine.resume_and_wait(&id, &node_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&execution)?);
            } else {
                print_execution(&execution);
            }
            if execution.status != ExecutionStatus::Completed {
                bail!("execution {} finished as {}", execution.id, execution.status);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn status_style(status: ExecutionStatus) -> console::StyledObject<&'static str> {
    match status {
        ExecutionStatus::Completed => style(status.as_str()).green(),
        ExecutionStatus::Failed => style(status.as_str()).red(),
        ExecutionStatus::Cancelled => style(status.as_str()).yellow(),
        ExecutionStatus::Queued | ExecutionStatus::Running => style(status.as_str()).cyan(),
    }
}

fn node_status_color(status: NodeStatus) -> Color {
    match status {
        NodeStatus::Completed => Color::Green,
        NodeStatus::Failed => Color::Red,
        NodeStatus::Running => Color::Cyan,
        _ => Color::DarkGrey,
    }
}

fn print_execution_list(executions: &[WorkflowExecution], total: u64) {
    if executions.is_empty() {
        println!("  No executions.");
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Trigger"),
            Cell::new("Status"),
            Cell::new("Created"),
        ]);

    for execution in executions {
        table.add_row(vec![
            Cell::new(execution.id).fg(Color::Cyan),
            Cell::new(format!("{} v{}", execution.workflow_name, execution.workflow_version)),
            Cell::new(execution.trigger_type.as_str()),
            Cell::new(execution.status.as_str()),
            Cell::new(execution.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!("{table}");
    println!("  {}", style(format!("{} of {total} execution(s)", executions.len())).dim());
}

/// Print an execution summary with one row per node and its final artifacts.
pub fn print_execution(execution: &WorkflowExecution) {
    println!();
    println!(
        "  Execution {} ({})",
        style(execution.id).cyan(),
        status_style(execution.status)
    );
    println!("  Workflow: {} v{}", execution.workflow_name, execution.workflow_version);
    if let Some(origin) = &execution.resumed_from {
        println!("  Resumed from: {} at '{}'", origin.execution_id, origin.node_id);
    }
    if let Some(error) = &execution.error_message {
        println!("  Error: {}", style(error).red());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Duration"),
            Cell::new("Error"),
        ]);

    for node in &execution.node_executions {
        table.add_row(vec![
            Cell::new(&node.node_id).fg(Color::Cyan),
            Cell::new(&node.node_type),
            Cell::new(node.status.as_str()).fg(node_status_color(node.status)),
            Cell::new(node.attempt_count),
            Cell::new(node.duration_ms.map(|ms| format!("{ms} ms")).unwrap_or_default()),
            Cell::new(node.error_message.as_deref().unwrap_or("")),
        ]);
    }
    println!("{table}");

    if !execution.final_artifacts.is_empty() {
        println!("  Artifacts:");
        for artifact in &execution.final_artifacts {
            println!(
                "    - {} ({}, {} bytes) {}",
                style(&artifact.name).cyan(),
                artifact.mime_type,
                artifact.size_bytes,
                style(artifact.artifact_id).dim()
            );
        }
    }
    println!();
}
