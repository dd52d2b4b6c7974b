//! In-memory filesystem, used by tests and by workspaces that are not backed by a disk.

use std::collections::{HashMap, HashSet};
use std::io::{Error, ErrorKind, Result};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::FileSystem;

/// An in-memory filesystem implementation
/// Clones share the same underlying storage.
#[derive(Clone, Default)]
pub struct InMemoryFileSystem {
    /// Files stored as path -> content
    files: Arc<RwLock<HashMap<PathBuf, String>>>,
    /// Directories that exist (implicitly created when files are added)
    directories: Arc<RwLock<HashSet<PathBuf>>>,
}

impl InMemoryFileSystem {
    /// Create a new empty in-memory filesystem
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a filesystem pre-populated with files
    pub fn with_files(entries: Vec<(PathBuf, String)>) -> Self {
        let fs = Self::new();
        {
            let mut files = fs.files.write().unwrap();
            let mut dirs = fs.directories.write().unwrap();

            for (path, content) in entries {
                let path = Self::normalize_path(&path);
                Self::insert_ancestors(&mut dirs, &path);
                files.insert(path, content);
            }
        }
        fs
    }

    /// Get a list of all file paths in the filesystem
    pub fn list_all_files(&self) -> Vec<PathBuf> {
        let files = self.files.read().unwrap();
        let mut paths: Vec<PathBuf> = files.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Helper to normalize paths (remove . and .. components where possible)
    fn normalize_path(path: &Path) -> PathBuf {
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if !components.is_empty() {
                        components.pop();
                    }
                }
                c => components.push(c),
            }
        }
        components.iter().collect()
    }

    fn insert_ancestors(dirs: &mut HashSet<PathBuf>, path: &Path) {
        let mut current = path;
        while let Some(parent) = current.parent() {
            if !parent.as_os_str().is_empty() {
                dirs.insert(parent.to_path_buf());
            }
            current = parent;
        }
    }
}

impl FileSystem for InMemoryFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let normalized = Self::normalize_path(path);
        let files = self.files.read().unwrap();
        files
            .get(&normalized)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("File not found: {:?}", path)))
    }

    fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        let normalized = Self::normalize_path(path);

        if let Some(parent) = normalized.parent() {
            self.create_dir_all(parent)?;
        }

        let mut files = self.files.write().unwrap();
        files.insert(normalized, content.to_string());
        Ok(())
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        let normalized = Self::normalize_path(path);
        let mut files = self.files.write().unwrap();
        if files.remove(&normalized).is_some() {
            return Ok(());
        }

        Err(Error::new(
            ErrorKind::NotFound,
            format!("File not found: {:?}", path),
        ))
    }

    fn exists(&self, path: &Path) -> bool {
        let normalized = Self::normalize_path(path);
        let files = self.files.read().unwrap();
        let dirs = self.directories.read().unwrap();
        files.contains_key(&normalized) || dirs.contains(&normalized)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let normalized = Self::normalize_path(path);
        let mut dirs = self.directories.write().unwrap();
        if !normalized.as_os_str().is_empty() {
            dirs.insert(normalized.clone());
        }
        Self::insert_ancestors(&mut dirs, &normalized);
        Ok(())
    }

    fn is_dir(&self, path: &Path) -> bool {
        let normalized = Self::normalize_path(path);
        let dirs = self.directories.read().unwrap();
        dirs.contains(&normalized)
    }

    fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        let from_norm = Self::normalize_path(from);
        let to_norm = Self::normalize_path(to);

        if from_norm == to_norm {
            return Ok(());
        }

        if !self.exists(&from_norm) {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("Source not found: {:?}", from),
            ));
        }
        if self.exists(&to_norm) {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                format!("Destination already exists: {:?}", to),
            ));
        }

        let mut files = self.files.write().unwrap();
        let mut dirs = self.directories.write().unwrap();

        if dirs.contains(&from_norm) {
            // Relocate every file and directory under the source prefix
            let moved: Vec<PathBuf> = files
                .keys()
                .filter(|p| p.starts_with(&from_norm))
                .cloned()
                .collect();
            for old_path in moved {
                if let Some(content) = files.remove(&old_path)
                    && let Ok(relative) = old_path.strip_prefix(&from_norm)
                {
                    files.insert(to_norm.join(relative), content);
                }
            }

            let old_dirs: Vec<PathBuf> = dirs
                .iter()
                .filter(|d| d.starts_with(&from_norm))
                .cloned()
                .collect();
            for old_dir in old_dirs {
                dirs.remove(&old_dir);
                if let Ok(relative) = old_dir.strip_prefix(&from_norm) {
                    dirs.insert(to_norm.join(relative));
                }
            }
        } else if let Some(content) = files.remove(&from_norm) {
            files.insert(to_norm.clone(), content);
        }

        Self::insert_ancestors(&mut dirs, &to_norm);
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let normalized = Self::normalize_path(path);
        let mut files = self.files.write().unwrap();
        let mut dirs = self.directories.write().unwrap();
        if !dirs.contains(&normalized) {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("Directory not found: {:?}", path),
            ));
        }
        files.retain(|p, _| !p.starts_with(&normalized));
        dirs.retain(|d| !d.starts_with(&normalized));
        Ok(())
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let normalized = Self::normalize_path(dir);
        let files = self.files.read().unwrap();
        let dirs = self.directories.read().unwrap();

        let mut result: Vec<PathBuf> = files
            .keys()
            .chain(dirs.iter())
            .filter(|p| p.parent() == Some(normalized.as_path()))
            .cloned()
            .collect();
        result.sort();
        result.dedup();
        Ok(result)
    }
}
