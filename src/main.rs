//! Rollout CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;

use rollout::cli::commands::feedback::FeedbackArgs;
use rollout::cli::{Cli, Commands, TraceCommands};
use rollout::domain::models::Config;
use rollout::infrastructure::{ConfigLoader, LogConfig, LoggerImpl};

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let log_config = LogConfig::try_from(&config.logging).map_err(anyhow::Error::msg)?;
    let _logger = LoggerImpl::init(&log_config).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Plan {
            space,
            mode,
            runs,
            seed,
            assignments,
        } => rollout::cli::commands::plan::execute(&space, mode.into(), runs, seed, assignments, cli.json),
        Commands::Feedback {
            payload,
            priority,
            limit,
            max_block_chars,
            sources,
        } => {
            let args = FeedbackArgs {
                priority,
                limit,
                max_block_chars,
                sources,
            };
            rollout::cli::commands::feedback::execute(&config, &payload, &args, cli.json)
        }
        Commands::Trace(TraceCommands::Show {
            trajectory_id,
            store,
        }) => rollout::cli::commands::trace::handle_show(&config.store, &trajectory_id, store, cli.json).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = run(cli).await {
        rollout::cli::handle_error(&err, json);
    }
}
