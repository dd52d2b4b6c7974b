//! `strata` command-line interface.
//!
//! ```text
//! strata reconcile
//! strata load <id> --mode down --size 32
//! strata range <start id> <end id>
//! strata get <id> --json
//! ```

/// CLI module - command-line interface for strata
mod cli;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .init();

    cli::run_cli();
}
