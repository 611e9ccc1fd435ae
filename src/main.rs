mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use sweepbox::config::Config;
use sweepbox::lifecycle::Lifecycle;
use sweepbox::observability::init_tracing;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();

    let config = Config::load().map_err(|e| format!("Failed to load config: {e}"))?;
    init_tracing(&config.telemetry.log_level);

    match cli.command {
        Commands::Server(args) => sweepbox::api::run(config, args.address).await?,
        Commands::Prune(args) => {
            let lifecycle = Lifecycle::open(&config)?;
            let report = lifecycle.prune.run(args.dry_run).await?;
            lifecycle.store.persist()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Drain => {
            let lifecycle = Lifecycle::open(&config)?;
            let report = lifecycle.drain.run().await?;
            lifecycle.queue.flush()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
