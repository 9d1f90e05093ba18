#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use resumer_core::directory::{DirectoryServer, InMemoryDirectory};
use resumer_core::{ReplicaCore, ResumerConfig};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

const DEFAULT_LOG_FILTER: &str = "info,resumer_core=debug,resumer_server=debug";

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "resumer-server")]
#[command(version, about = "Response resumer replica and ownership directory")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file (defaults to ./resumer.toml, then RESUMER_* env vars)
    #[arg(long, global = true, env = "RESUMER_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Command {
    /// Run a resumer replica (default)
    Serve(ServeArgs),

    /// Run the shared ownership directory
    Directory(DirectoryArgs),

    /// Print the effective configuration and exit
    Config,
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Listen address, overriding server.host and server.port
    #[arg(long)]
    listen: Option<String>,

    /// Address advertised to other replicas (host:port)
    #[arg(long)]
    advertised_address: Option<String>,
}

#[derive(Args)]
struct DirectoryArgs {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:9191")]
    listen: String,

    /// Seconds between sweeps of expired claims
    #[arg(long, default_value_t = 30)]
    purge_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => serve(cli.config.as_deref(), args).await,
        Command::Directory(args) => run_directory(args).await,
        Command::Config => {
            let config = ResumerConfig::load(cli.config.as_deref())?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn serve(config_path: Option<&Path>, args: ServeArgs) -> Result<()> {
    let mut config = ResumerConfig::load(config_path)?;
    if let Some(advertised) = args.advertised_address {
        config.server.advertised_address = Some(advertised);
        config.validate()?;
    }

    let listen = args
        .listen
        .unwrap_or_else(|| config.server.listen_address());
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind {listen}"))?;
    let bound = listener.local_addr()?;

    let core = ReplicaCore::new(&config, Some(bound))?;
    let server = core.server(listener, &config);
    info!(listen = %bound, "Response resumer listening");

    run_until_shutdown(|shutdown| server.run(shutdown)).await
}

async fn run_directory(args: DirectoryArgs) -> Result<()> {
    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    let server = DirectoryServer::new(Arc::new(InMemoryDirectory::new()), listener)
        .with_purge_interval(Duration::from_secs(args.purge_interval_secs.max(1)));

    run_until_shutdown(|shutdown| server.run(shutdown)).await
}

/// Run a server task until ctrl-c, then signal it to stop and wait.
async fn run_until_shutdown<F, Fut>(start: F) -> Result<()>
where
    F: FnOnce(broadcast::Receiver<()>) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut task = tokio::spawn(start(shutdown_rx));

    tokio::select! {
        result = &mut task => {
            return result.context("Server task failed")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(());
    task.await.context("Server task failed")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_is_default() {
        let cli = Cli::try_parse_from(["resumer-server", "--log-format", "json"]).unwrap();
        assert!(cli.command.is_none());
        assert!(matches!(cli.log_format, LogFormat::Json));

        let cli = Cli::try_parse_from([
            "resumer-server",
            "serve",
            "--listen",
            "127.0.0.1:0",
            "--advertised-address",
            "replica-a:9090",
        ])
        .unwrap();
        let Some(Command::Serve(args)) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.listen.as_deref(), Some("127.0.0.1:0"));
        assert_eq!(args.advertised_address.as_deref(), Some("replica-a:9090"));
    }

    #[test]
    fn test_directory_defaults() {
        let cli = Cli::try_parse_from(["resumer-server", "directory"]).unwrap();
        let Some(Command::Directory(args)) = cli.command else {
            panic!("expected directory");
        };
        assert_eq!(args.listen, "0.0.0.0:9191");
        assert_eq!(args.purge_interval_secs, 30);
    }
}
