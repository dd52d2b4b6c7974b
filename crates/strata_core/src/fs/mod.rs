//! Filesystem abstraction module.
//!
//! This module provides the `FileSystem` trait for abstracting filesystem operations,
//! so the tree store can run against the real disk or an in-memory filesystem
//! (tests, previews of a workspace that is not mounted).
//!
//! Paths handed to a `FileSystem` are always absolute workspace paths; the tree
//! store is responsible for joining box ids and tree paths onto the data dir.

mod memory;
mod native;

pub use memory::InMemoryFileSystem;
pub use native::RealFileSystem;

use std::io::Result;
use std::path::{Path, PathBuf};

/// Abstraction over filesystem operations
/// Allows for different implementations: real filesystem, in-memory, etc.
/// Send + Sync required because the index pipeline flushes from background tasks.
pub trait FileSystem: Send + Sync {
    /// Reads the file content (tree JSON, box conf, index snapshots)
    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Overwrites a file, creating it if needed
    fn write_file(&self, path: &Path, content: &str) -> Result<()>;

    /// Deletes a file
    fn delete_file(&self, path: &Path) -> Result<()>;

    /// Checks if a file or directory exists
    fn exists(&self, path: &Path) -> bool;

    /// Creates a directory and all parent directories
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Checks if a path is a directory
    fn is_dir(&self, path: &Path) -> bool;

    /// Move/rename a file or a directory from `from` to `to`.
    ///
    /// Implementations should treat this as an atomic-ish move when possible,
    /// and should error if the source does not exist or if the destination already exists.
    /// Missing parent directories of `to` are created.
    fn move_path(&self, from: &Path, to: &Path) -> Result<()>;

    /// Removes a directory and everything below it
    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    /// List the immediate entries (files and directories) of a directory
    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Recursively list all files below `dir` with the given extension.
    ///
    /// The walk is iterative and returns paths in sorted order so that callers
    /// relying on "first seen wins" semantics behave deterministically.
    fn list_files_recursive(&self, dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            for entry in self.list_dir(&current)? {
                if self.is_dir(&entry) {
                    pending.push(entry);
                } else if entry.extension().is_some_and(|e| e == ext) {
                    files.push(entry);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

// Blanket implementation for references to FileSystem
impl<T: FileSystem> FileSystem for &T {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        (*self).read_to_string(path)
    }

    fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        (*self).write_file(path, content)
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        (*self).delete_file(path)
    }

    fn exists(&self, path: &Path) -> bool {
        (*self).exists(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        (*self).create_dir_all(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        (*self).is_dir(path)
    }

    fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        (*self).move_path(from, to)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        (*self).remove_dir_all(path)
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        (*self).list_dir(dir)
    }
}
