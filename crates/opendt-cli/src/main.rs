mod commands;
mod logging;
mod replay;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "opendt", version, about = "Shadow-mode digital twin for datacenters")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulation pipeline (and calibration when enabled)
    Run {
        /// Path to the service YAML config
        #[arg(long)]
        config: PathBuf,
        /// Replay a JSONL event trace instead of waiting for live traffic
        #[arg(long)]
        trace: Option<PathBuf>,
    },
    /// Validate the configuration and report the effective settings
    Check {
        /// Path to the service YAML config
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { config, trace } => commands::run::execute(&config, trace.as_deref()).await,
        Commands::Check { config } => commands::check::execute(&config),
    }
}
