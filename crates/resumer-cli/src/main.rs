mod cli;
mod commands;
mod completions;
mod config;
mod error;
mod output;

use anyhow::Result;
use clap::Parser;
use resumer_core::ResumerClient;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::config::CliConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        completions::generate_completions(shell);
        return;
    }

    let _guard = init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        error::handle_error(err);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = CliConfig::load();
    let client = ResumerClient::new(config.server(cli.server))
        .with_credentials(config.credentials(cli.api_key, cli.token));
    let format = cli.format;

    tracing::debug!(server = client.address(), "Connecting to replica");

    match cli.command {
        Commands::Completions { .. } => Ok(()),
        Commands::Record(args) => commands::record::run(&client, args, format).await,
        Commands::Replay(args) => commands::replay::run(&client, args, format).await,
        Commands::Cancel { conversation_id } => {
            commands::status::cancel(&client, &conversation_id, format).await
        }
        Commands::Check { conversation_ids } => {
            commands::status::check(&client, &conversation_ids, format).await
        }
        Commands::Status { conversation_id } => {
            commands::status::status(&client, &conversation_id, format).await
        }
        Commands::Enabled => commands::status::enabled(&client, format).await,
    }
}

/// Logs go to a daily file so command output stays clean.
fn init_logging(verbose: bool) -> Option<WorkerGuard> {
    let log_dir = config::log_dir()?;
    std::fs::create_dir_all(&log_dir).ok()?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "resumer.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Some(guard)
}
