#![doc = include_str!("../README.md")]

/// Identity index (node id -> tree location)
pub mod blocktree;

/// Configuration options
pub mod config;

/// Error (common error types)
pub mod error;

/// Index progress and notice events
pub mod events;

/// Filesystem abstraction
pub mod fs;

/// Node ids and timestamps
pub mod id;

/// Windowed document loading
pub mod loader;

/// Ordered write pipeline for the queryable index
pub mod queue;

/// Index consistency repair
pub mod reconcile;

/// Shared exiting flag
pub mod shutdown;

/// Queryable (SQLite) index
pub mod sql;

/// Unified API over one workspace
pub mod strata;

/// Document trees and their storage
pub mod tree;

/// Workspace layout and notebooks
pub mod workspace;

pub use error::{Result, StrataError};
pub use strata::Strata;

#[cfg(test)]
pub mod test_utils;
