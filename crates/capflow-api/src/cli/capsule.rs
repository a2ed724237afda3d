//! CLI capsule subcommands: browse the catalogue and test-run a capsule.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Map, Value};

use capflow_types::artifact::ArtifactSlot;
use capflow_types::capsule::{CapsuleCategory, CapsuleTestRunResult, TestRunStatus};

use crate::state::AppState;

#[derive(Subcommand)]
pub enum CapsuleCommand {
    /// List capsule types.
    #[command(alias = "ls")]
    List {
        /// trigger, processor or output.
        #[arg(long)]
        category: Option<CapsuleCategory>,
    },

    /// Show a capsule type's config schema and slots.
    Show { type_key: String },

    /// Validate a config and run the capsule once against mock input.
    TestRun {
        type_key: String,

        /// Config object as JSON.
        #[arg(long, default_value = "{}")]
        config: String,

        /// Mock input as JSON: slot payloads by input slot ID.
        #[arg(long, default_value = "{}")]
        input: String,
    },
}

pub async fn handle_capsule_command(cmd: CapsuleCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        CapsuleCommand::List { category } => {
            let types = state.registry.list_types(category);
            if json {
                println!("{}", serde_json::to_string_pretty(&types)?);
                return Ok(());
            }

            let mut table = Table::new();
            table
                .load_preset(presets::UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    Cell::new("Type").fg(Color::Cyan),
                    Cell::new("Category"),
                    Cell::new("Name"),
                    Cell::new("Inputs"),
                    Cell::new("Outputs"),
                    Cell::new("Testable"),
                ]);
            let slots = |slots: &[ArtifactSlot]| {
                slots.iter().map(|s| s.slot_id.as_str()).collect::<Vec<_>>().join(", ")
            };
            for meta in &types {
                table.add_row(vec![
                    Cell::new(&meta.type_key).fg(Color::Cyan),
                    Cell::new(meta.category.as_str()),
                    Cell::new(&meta.name),
                    Cell::new(slots(&meta.default_inputs)),
                    Cell::new(slots(&meta.default_outputs)),
                    Cell::new(if meta.testable { "yes" } else { "no" }),
                ]);
            }
            println!("{table}");
        }

        CapsuleCommand::Show { type_key } => {
            let meta = state.registry.get_type(&type_key)?;
            println!("{}", serde_json::to_string_pretty(meta)?);
        }

        CapsuleCommand::TestRun { type_key, config, input } => {
            let config: Map<String, Value> =
                serde_json::from_str(&config).context("--config must be a JSON object")?;
            let input: Value = serde_json::from_str(&input).context("--input must be JSON")?;

            let result = state.registry.test_run(&type_key, &config, &input).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_test_run(&type_key, &result)?;
            }
        }
    }
    Ok(())
}

fn print_test_run(type_key: &str, result: &CapsuleTestRunResult) -> Result<()> {
    let verdict = match result.status {
        TestRunStatus::Success => style("success").green(),
        TestRunStatus::Failed => style("failed").red(),
        TestRunStatus::Invalid => style("invalid config").red(),
        TestRunStatus::Skipped => style("skipped (not testable)").yellow(),
    };
    println!();
    println!("  Test run of '{}': {verdict}", style(type_key).cyan());

    for field in &result.field_validations {
        let mark = if field.valid { style("ok").green() } else { style("!!").red() };
        println!(
            "    [{mark}] {}{}",
            field.key,
            field
                .message
                .as_deref()
                .map(|m| format!(": {m}"))
                .unwrap_or_default()
        );
    }

    if let Some(output) = &result.output {
        println!("  Output:");
        println!("{}", serde_json::to_string_pretty(output)?);
    }
    for line in &result.logs {
        println!("  {}", style(line).dim());
    }
    if let Some(error) = &result.error_message {
        println!("  Error: {}", style(error).red());
    }
    println!();
    Ok(())
}
