use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "sweepbox")]
#[command(about = "Sweepbox: expiring posts with reclaimed image storage", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server and the sweep scheduler
    Server(ServerArgs),
    /// Run one prune pass and print its report
    Prune(PruneArgs),
    /// Drain the deletion queue once and print the report
    Drain,
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to (defaults to server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct PruneArgs {
    /// Report what would be deleted without touching either store
    #[arg(long)]
    pub dry_run: bool,
}
