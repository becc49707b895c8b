use anyhow::{Context, Result};
use clap::Parser;
use mirror_server::{
    cli::{Cli, Commands},
    commands, run_server, Config,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_or_default(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    cli.apply_to(&mut config);

    // Held until exit so the file writer flushes.
    let _log_guard = mirror_logging::init_subscriber(&config.logging);
    info!(command = ?cli.command, "crates-mirror {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve { .. } => run_server(config).await,
        Commands::Sync {
            prefetch,
            concurrency,
        } => commands::run_sync(&config, prefetch, concurrency).await,
        Commands::Reconcile => commands::run_reconcile(&config).await,
        Commands::Status => commands::run_status(&config).await,
    }
}
