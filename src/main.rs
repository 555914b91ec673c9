mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use memstore::config::{self, MemoryConfig};

#[derive(Parser)]
#[command(name = "memstore", version, about = "Local memory store for AI coding agents")]
struct Cli {
    /// Config file (defaults to ~/.memstore/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open the configured backend and report its status
    Doctor,
    /// Print the namespace derived from the embedding configuration
    Namespace,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let config = MemoryConfig::load_from(&config_path)?;

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Doctor => cli::doctor::doctor(&config, &config_path).await?,
        Command::Namespace => println!("{}", config.namespace()),
    }

    Ok(())
}
