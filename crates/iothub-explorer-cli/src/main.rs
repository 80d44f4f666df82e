//! iothub-explorer - Command-line interface for IoT hub device management.
//!
//! Manages the device registry of a hub and simulates devices sending
//! telemetry, receiving cloud-to-device messages and uploading files.

mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;

use cli::{Cli, Commands};
use error::{exit_codes, CliError};
use output::console;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout; everything else is a usage error
            let _ = e.print();
            std::process::exit(exit_codes::for_usage(&e));
        }
    };

    init_tracing(cli.verbose);

    let result = run(cli).await;

    match result {
        Ok(()) => std::process::exit(exit_codes::SUCCESS),
        Err(e) => {
            console::report(&e);
            std::process::exit(e.exit_code());
        }
    }
}

/// Diagnostics go to stderr so stdout stays clean for command output.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "iothub_explorer=debug,iothub_explorer_core=debug"
    } else {
        "warn"
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .compact()
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Login(args) => {
            commands::run_login(args, cli.json).await
        }
        Commands::Logout => {
            commands::run_logout().await
        }
        Commands::List(args) => {
            commands::run_list(args, cli.timeout, cli.json).await
        }
        Commands::Get(args) => {
            commands::run_get(args, cli.timeout, cli.json).await
        }
        Commands::Create(args) => {
            commands::run_create(args, cli.timeout, cli.json).await
        }
        Commands::Delete(args) => {
            commands::run_delete(args, cli.timeout, cli.json).await
        }
        Commands::SimulateDevice(args) => {
            commands::run_simulate_device(args, cli.timeout, cli.json).await
        }
    }
}
