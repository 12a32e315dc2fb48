//! Command-line driver for Strand
//!
//! Prints the effective configuration and runs end-to-end simulations of the gossip
//! map and cross-partition transactions on an in-memory cluster.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{config, simulate};

#[derive(Parser)]
#[command(name = "strand")]
#[command(about = "Strand - replicated maps, partitioned primitives and transactions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path; `STRAND_*` variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML
    Config,

    /// Run a gossip and transaction scenario on an in-memory cluster
    Simulate(simulate::SimulateArgs),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            print!("{}", settings.to_toml()?);
        }
        Commands::Simulate(args) => {
            let report = simulate::run(&settings, &args).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
