//! CLI workflow subcommands.
//!
//! Workflow files may be JSON or YAML (`.yaml` / `.yml`); both use the same
//! shape as the REST API body.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Map, Value};
use uuid::Uuid;

use capflow_core::engine::ExecutionRequest;
use capflow_core::repository::PageRequest;
use capflow_core::workflow::WorkflowServiceError;
use capflow_types::execution::ExecutionStatus;
use capflow_types::workflow::Workflow;

use crate::cli::execution::print_execution;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Check a workflow file without storing it.
    Validate {
        /// Path to a JSON or YAML workflow file.
        file: PathBuf,
    },

    /// Store a workflow from a file.
    Create {
        /// Path to a JSON or YAML workflow file.
        file: PathBuf,
    },

    /// List stored workflows.
    #[command(alias = "ls")]
    List {
        /// Only workflows carrying this tag.
        #[arg(long)]
        tag: Option<String>,

        #[arg(long, default_value = "1")]
        page: u32,
    },

    /// Show a stored workflow's definition.
    Show { id: Uuid },

    /// Delete a stored workflow. Its executions are kept.
    Delete { id: Uuid },

    /// Run a workflow and wait for it to finish.
    Run {
        /// Stored workflow ID or path to a workflow file.
        target: String,

        /// Variable value as `key=value`. Values that parse as JSON are
        /// used as JSON, anything else as a string.
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },
}

pub async fn handle_workflow_command(cmd: WorkflowCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        WorkflowCommand::Validate { file } => handle_validate(&file, state, json),
        WorkflowCommand::Create { file } => handle_create(&file, state, json).await,
        WorkflowCommand::List { tag, page } => handle_list(tag.as_deref(), page, state, json).await,
        WorkflowCommand::Show { id } => {
            let workflow = state.workflow_service.get(&id).await?;
            println!("{}", serde_json::to_string_pretty(&workflow)?);
            Ok(())
        }
        WorkflowCommand::Delete { id } => {
            state.workflow_service.delete(&id).await?;
            state.deactivate_triggers(&id).await;
            if json {
                println!("{}", serde_json::json!({ "deleted": true, "id": id }));
            } else {
                println!("  {} Deleted workflow {id}", style("*").green().bold());
            }
            Ok(())
        }
        WorkflowCommand::Run { target, vars } => handle_run(&target, &vars, state, json).await,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read a workflow definition from a JSON or YAML file.
pub fn load_workflow_file(path: &Path) -> Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    if is_yaml {
        serde_yaml_ng::from_str(&content).with_context(|| format!("invalid workflow YAML in {}", path.display()))
    } else {
        serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
    }
}

/// Parse `key=value`. The value is JSON when it parses as JSON.
pub fn parse_var(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected KEY=VALUE, got '{raw}'");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("variable name is empty in '{raw}'");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn print_definition_errors(err: &WorkflowServiceError) {
    match err {
        WorkflowServiceError::Invalid(errors) => {
            eprintln!(
                "  {} {} definition error(s):",
                style("x").red().bold(),
                errors.errors().len()
            );
            for e in errors.errors() {
                eprintln!("    - {e}");
            }
        }
        other => eprintln!("  {} {other}", style("x").red().bold()),
    }
}

// ---------------------------------------------------------------------------
// Validate / create
// ---------------------------------------------------------------------------

fn handle_validate(file: &Path, state: &AppState, json: bool) -> Result<()> {
    let mut workflow = load_workflow_file(file)?;
    let result = state.workflow_service.prepare(&mut workflow);

    if json {
        let out = match &result {
            Ok(()) => serde_json::json!({ "valid": true, "errors": [] }),
            Err(WorkflowServiceError::Invalid(errors)) => {
                serde_json::json!({ "valid": false, "errors": errors })
            }
            Err(other) => serde_json::json!({ "valid": false, "errors": [other.to_string()] }),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if result.is_ok() {
        println!(
            "  {} '{}' is valid ({} nodes, {} edges)",
            style("*").green().bold(),
            style(&workflow.name).cyan(),
            workflow.nodes.len(),
            workflow.edges.len()
        );
    } else if let Err(e) = &result {
        print_definition_errors(e);
    }

    if result.is_err() {
        bail!("workflow is invalid");
    }
    Ok(())
}

async fn handle_create(file: &Path, state: &AppState, json: bool) -> Result<()> {
    let workflow = load_workflow_file(file)?;
    state.check_webhook_paths(&workflow)?;

    let workflow = match state.workflow_service.create(workflow).await {
        Ok(workflow) => workflow,
        Err(e) => {
            if !json {
                print_definition_errors(&e);
            }
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
    } else {
        println!();
        println!(
            "  {} Created workflow '{}'",
            style("*").green().bold(),
            style(&workflow.name).cyan()
        );
        println!("  ID: {}", workflow.id);
        println!("  Nodes: {}", workflow.nodes.len());
        println!("  Triggers: {}", workflow.triggers.len());
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn handle_list(tag: Option<&str>, page: u32, state: &AppState, json: bool) -> Result<()> {
    let page = state
        .workflow_service
        .list(tag, PageRequest::new(Some(page), None))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page.items)?);
        return Ok(());
    }

    if page.items.is_empty() {
        println!();
        println!("  No workflows stored.");
        println!(
            "  Create one with: {}",
            style("capflow workflow create <file.json>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("ID"),
            Cell::new("Version"),
            Cell::new("Nodes"),
            Cell::new("Triggers"),
            Cell::new("Tags"),
            Cell::new("Updated"),
        ]);

    for wf in &page.items {
        table.add_row(vec![
            Cell::new(&wf.name).fg(Color::Cyan),
            Cell::new(wf.id),
            Cell::new(wf.version),
            Cell::new(wf.nodes.len()),
            Cell::new(wf.triggers.len()),
            Cell::new(wf.tags.join(", ")),
            Cell::new(wf.updated_at.format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!("{table}");
    println!(
        "  {}",
        style(format!(
            "page {} - {} of {} workflow(s)",
            page.page,
            page.items.len(),
            page.total
        ))
        .dim()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

async fn handle_run(target: &str, raw_vars: &[String], state: &AppState, json: bool) -> Result<()> {
    let workflow = match target.parse::<Uuid>() {
        Ok(id) => state.workflow_service.get(&id).await?,
        Err(_) => {
            let mut workflow = load_workflow_file(Path::new(target))?;
            if let Err(e) = state.workflow_service.prepare(&mut workflow) {
                if !json {
                    print_definition_errors(&e);
                }
                return Err(e.into());
            }
            workflow
        }
    };

    let mut variables = Map::new();
    for raw in raw_vars {
        let (key, value) = parse_var(raw)?;
        variables.insert(key, value);
    }

    if !json {
        println!(
            "  {} Running '{}'...",
            style(">").cyan().bold(),
            style(&workflow.name).cyan()
        );
    }

    let request = ExecutionRequest::manual(variables).triggered_by("cli");
    let execution = state.engine.execute(&workflow, request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
    } else {
        print_execution(&execution);
    }

    if execution.status != ExecutionStatus::Completed {
        bail!("execution {} finished as {}", execution.id, execution.status);
    }
    Ok(())
}
