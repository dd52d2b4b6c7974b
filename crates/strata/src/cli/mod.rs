/// Clap argument definitions
mod args;

/// `load`, `range` and `get` commands
mod load;

/// `reconcile` command
mod reconcile;

use clap::Parser;
use log::warn;

use strata_core::Strata;
use strata_core::config::Config;
use strata_core::fs::RealFileSystem;

pub use args::Cli;
use args::Commands;

/// Type alias for the workspace handle used throughout the CLI.
pub type CliStrata = Strata<RealFileSystem>;

/// Main entry point for the CLI
pub fn run_cli() {
    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring unreadable config: {}", e);
            Config::default()
        }
    };
    if let Some(workspace) = cli.workspace {
        config.workspace_dir = workspace;
    }

    let strata = match Strata::open(RealFileSystem, config) {
        Ok(strata) => strata,
        Err(e) => {
            eprintln!("✗ Could not open workspace: {}", e);
            std::process::exit(1);
        }
    };

    let success = match cli.command {
        Commands::Reconcile => reconcile::handle_reconcile(&strata, cli.json),

        Commands::Load {
            id,
            mode,
            size,
            index,
            query,
            end,
        } => load::handle_load(&strata, id, mode, size, index, query, end, cli.json),

        Commands::Range { start, end, query } => {
            load::handle_range(&strata, &start, &end, &query, cli.json)
        }

        Commands::Get { id } => load::handle_get(&strata, &id, cli.json),
    };

    if let Err(e) = strata.close() {
        eprintln!("✗ Failed to close workspace: {}", e);
        std::process::exit(1);
    }
    if !success {
        std::process::exit(1);
    }
}

/// Print a value as pretty JSON. Returns false if it could not be serialized.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            true
        }
        Err(e) => {
            eprintln!("✗ Failed to serialize output: {}", e);
            false
        }
    }
}
