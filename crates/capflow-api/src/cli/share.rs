//! CLI share link subcommands.

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use capflow_core::share::CreateShareLink;
use capflow_types::share::AccessLevel;

use crate::state::AppState;

#[derive(Subcommand)]
pub enum ShareCommand {
    /// Share a finished execution's artifacts.
    Create {
        execution_id: Uuid,

        /// public or authenticated.
        #[arg(long, default_value = "public")]
        access: AccessLevel,

        /// Days until the link expires; 0 never expires. Defaults to config.
        #[arg(long)]
        expires_in_days: Option<u32>,

        /// Share only these artifacts (repeatable).
        #[arg(long = "artifact")]
        artifact_ids: Vec<Uuid>,

        #[arg(long)]
        title: Option<String>,
    },

    /// List share links, newest first.
    #[command(alias = "ls")]
    List,

    /// Revoke a share link.
    Revoke { id: Uuid },
}

pub async fn handle_share_command(cmd: ShareCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        ShareCommand::Create {
            execution_id,
            access,
            expires_in_days,
            artifact_ids,
            title,
        } => {
            let mut create = CreateShareLink::new(execution_id, access);
            create.expires_in_days = expires_in_days;
            create.artifact_ids = (!artifact_ids.is_empty()).then_some(artifact_ids);
            create.title = title;
            create.created_by = Some("cli".to_string());

            let (link, url) = state.share_service.create(create).await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({ "link": link, "url": url }))?
                );
            } else {
                println!();
                println!("  {} Share link created", style("*").green().bold());
                println!("  URL: {}", style(&url).cyan());
                println!("  Access: {}", link.access_level.as_str());
                println!("  Artifacts: {}", link.artifacts.len());
                match link.expires_at {
                    Some(at) => println!("  Expires: {}", at.format("%Y-%m-%d %H:%M UTC")),
                    None => println!("  Expires: never"),
                }
                println!();
            }
        }

        ShareCommand::List => {
            let links = state.share_service.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&links)?);
                return Ok(());
            }
            if links.is_empty() {
                println!("  No share links.");
                return Ok(());
            }

            let mut table = Table::new();
            table
                .load_preset(presets::UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    Cell::new("ID").fg(Color::Cyan),
                    Cell::new("Execution"),
                    Cell::new("Access"),
                    Cell::new("Views"),
                    Cell::new("Expires"),
                    Cell::new("State"),
                ]);
            for link in &links {
                let state_cell = if link.revoked {
                    Cell::new("revoked").fg(Color::Red)
                } else if link.is_expired_at(chrono::Utc::now()) {
                    Cell::new("expired").fg(Color::Yellow)
                } else {
                    Cell::new("active").fg(Color::Green)
                };
                table.add_row(vec![
                    Cell::new(link.id).fg(Color::Cyan),
                    Cell::new(link.resource_id),
                    Cell::new(link.access_level.as_str()),
                    Cell::new(link.view_count),
                    Cell::new(
                        link.expires_at
                            .map(|at| at.format("%Y-%m-%d").to_string())
                            .unwrap_or_else(|| "never".to_string()),
                    ),
                    state_cell,
                ]);
            }
            println!("{table}");
        }

        ShareCommand::Revoke { id } => {
            let link = state.share_service.revoke(&id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&link)?);
            } else {
                println!("  {} Revoked share link {id}", style("*").green().bold());
            }
        }
    }
    Ok(())
}
