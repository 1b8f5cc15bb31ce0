// ABOUTME: Entry point for the fleetcomm binary.
// ABOUTME: Parses CLI args and runs the operator console or the config check.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fleetcomm")]
#[command(about = "Telemetry and command console for a robot fleet")]
struct Cli {
    /// Config file path
    #[arg(short, long, env = "FLEETCOMM_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect the fleet and run the console (default)
    Run {
        /// Print status events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Validate the config file and exit
    Check,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    fleetcomm_log::init_for(&["fleetcomm", "fleetcomm_cli"]);

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run { json: false }) {
        Commands::Run { json } => fleetcomm_cli::run(cli.config, json).await,
        Commands::Check => {
            println!("{}", fleetcomm_cli::check(cli.config)?);
            Ok(())
        }
    }
}
