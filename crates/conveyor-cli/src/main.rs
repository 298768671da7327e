mod commands;
mod config;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "conveyor", version, about = "Replication engine for connector pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a replication sync
    Run {
        /// Path to sync YAML file
        sync: PathBuf,
        /// Directory for connector launch files (defaults to a
        /// temporary directory per job)
        #[arg(long)]
        job_root: Option<PathBuf>,
    },
    /// Validate a sync configuration without running it
    Check {
        /// Path to sync YAML file
        sync: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { sync, job_root } => commands::run::execute(&sync, job_root).await,
        Commands::Check { sync } => commands::check::execute(&sync),
    }
}
