use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

use plugin_bridge::commands;
use plugin_bridge::config;
use plugin_bridge::logging;

#[derive(Parser, Debug)]
#[command(name = "plugin-bridge")]
#[command(about = "Runs extension-point pipelines across plugin processes", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (YAML/JSON/TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Launch the configured plugins and run the pipeline once (default)
    Run,
    /// Validate configuration
    Check {
        /// Also start each plugin once to confirm it launches
        #[arg(long)]
        spawn: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init(args.debug, args.json_logs).context("Failed to initialise logging")?;

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            config::load_from_path(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?
        }
        None => {
            info!("Loading configuration from default locations");
            config::load_from_env_or_file().context("Failed to load configuration")?
        }
    };
    info!("Loaded {} plugin configuration(s)", config.plugins.len());

    match args.command.unwrap_or(Command::Run) {
        Command::Check { spawn } => {
            commands::run_config_check(config, spawn).await?;
        }
        Command::Run => {
            tokio::select! {
                outcome = commands::run_pipeline(config) => {
                    if let Err(e) = &outcome {
                        error!("Pipeline failed: {}", e);
                    }
                    outcome?;
                }
                _ = shutdown_signal() => {
                    warn!("Interrupted; stopping plugins");
                }
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
