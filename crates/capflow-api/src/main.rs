//! capflow CLI and REST API entry point.
//!
//! Binary name: `capflow`
//!
//! Parses CLI arguments, initializes storage and services, then dispatches
//! to a command handler or starts the REST API server with live triggers.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;
use console::style;

use capflow_observe::TracingOptions;
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut options = TracingOptions::from_verbosity(cli.verbose);
    if cli.quiet {
        options.default_filter = "error".to_string();
    }
    options.json = cli.log_json;
    options.otel = cli.otel;
    capflow_observe::init_tracing(&options).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "capflow", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    let result = match cli.command {
        Commands::Serve { port, host } => serve(state, host, port, cli.quiet).await,
        Commands::Workflow { command } => cli::workflow::handle_workflow_command(command, &state, cli.json).await,
        Commands::Execution { command } => {
            cli::execution::handle_execution_command(command, &state, cli.json).await
        }
        Commands::Capsule { command } => cli::capsule::handle_capsule_command(command, &state, cli.json).await,
        Commands::Share { command } => cli::share::handle_share_command(command, &state, cli.json).await,
        Commands::Completions { .. } => Ok(()),
    };

    capflow_observe::shutdown_tracing();
    result
}

async fn serve(state: AppState, host: Option<String>, port: Option<u16>, quiet: bool) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);

    let timer_jobs = state.start_timers().await?;
    let data_dir = state.data_dir.clone();
    let scheduler = state.scheduler.clone();
    let router = http::router::build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(%addr, timer_jobs, "capflow API listening");
    if !quiet {
        println!();
        println!(
            "  {} capflow API listening on {}",
            style("*").green().bold(),
            style(format!("http://{addr}")).cyan()
        );
        println!("  Data dir: {}", data_dir.display());
        println!("  Timer jobs: {timer_jobs}");
        println!("  Press Ctrl+C to stop.");
        println!();
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    if !quiet {
        println!("\n  Server stopped.");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
///
/// A handler that cannot be installed never fires; the other one still does.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
