//! CLI command definitions for the `capflow` binary.
//!
//! Uses clap derive macros. Commands follow a noun-verb pattern
//! (`capflow workflow run`, `capflow execution logs`) and operate on the same
//! data directory the server uses.

pub mod capsule;
pub mod execution;
pub mod share;
pub mod workflow;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use capsule::CapsuleCommand;
use execution::ExecutionCommand;
use share::ShareCommand;
use workflow::WorkflowCommand;

/// Compose capsules into workflows and run them.
#[derive(Parser)]
#[command(name = "capflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit log lines as JSON objects.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server with live triggers.
    Serve {
        /// Port to listen on (default: from config.toml, else 3000).
        #[arg(long)]
        port: Option<u16>,

        /// Host to bind to (default: from config.toml, else 127.0.0.1).
        #[arg(long)]
        host: Option<String>,
    },

    /// Validate, store, run and delete workflows.
    #[command(alias = "wf")]
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommand,
    },

    /// Inspect, cancel and resume executions.
    #[command(alias = "exec")]
    Execution {
        #[command(subcommand)]
        command: ExecutionCommand,
    },

    /// Browse and test capsule types.
    Capsule {
        #[command(subcommand)]
        command: CapsuleCommand,
    },

    /// Create, list and revoke share links.
    Share {
        #[command(subcommand)]
        command: ShareCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
