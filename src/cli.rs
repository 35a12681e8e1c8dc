use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "downloaderd")]
#[command(about = "Download daemon: queue URLs, fetch them in the background, get notified", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server and worker pool
    Server(ServerArgs),
}

/// Flags override the loaded configuration
#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Configuration file (default: $DOWNLOADERD_CONFIG or config/downloaderd.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to bind the HTTP server to
    #[arg(long)]
    pub address: Option<SocketAddr>,

    /// Number of download workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Capacity of the download queue
    #[arg(long)]
    pub queue_length: Option<usize>,
}
