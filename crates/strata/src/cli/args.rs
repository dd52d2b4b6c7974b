//! Command-line argument structures and enums

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use strata_core::loader::LoadMode;

#[derive(Parser)]
#[command(name = "strata")]
#[command(version)]
#[command(about = "Repair indexes and load document windows of a strata workspace", long_about = None)]
pub struct Cli {
    /// Override workspace location
    #[arg(short, long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check the identity and queryable indexes against the tree files and repair them
    Reconcile,

    /// Load a window of blocks around a node
    Load {
        /// Node or document id
        id: String,

        /// focus, up, down, both or end (or 0-4)
        #[arg(short, long, default_value = "focus")]
        mode: LoadMode,

        /// Weighted block budget (default: config's default_window_size)
        #[arg(short, long)]
        size: Option<usize>,

        /// 1-based position hint
        #[arg(short, long, default_value_t = 0)]
        index: usize,

        /// Terms to highlight
        #[arg(short, long, default_value = "")]
        query: String,

        /// Last block of a previously loaded window; reloads that range if still valid
        #[arg(long)]
        end: Option<String>,
    },

    /// Load the sibling run between two blocks, both included
    Range {
        /// First block id
        start: String,

        /// Last block id
        end: String,

        /// Terms to highlight
        #[arg(short, long, default_value = "")]
        query: String,
    },

    /// Show where a block lives
    Get {
        /// Block id
        id: String,
    },
}
