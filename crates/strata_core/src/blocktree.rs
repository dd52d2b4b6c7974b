//! Identity index: node id -> where the node lives.
//!
//! Kept in memory behind a lock and snapshotted to `temp/blocktree.json`. It is
//! a derived cache of the tree files; the reconciler rebuilds it from disk when
//! the two disagree.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::fs::FileSystem;
use crate::tree::Tree;

/// One identity index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTreeEntry {
    pub id: String,
    pub root_id: String,
    #[serde(default)]
    pub parent_id: String,
    pub box_id: String,
    pub path: String,
    #[serde(default)]
    pub hpath: String,
    #[serde(default)]
    pub updated: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl BlockTreeEntry {
    pub fn is_root(&self) -> bool {
        self.id == self.root_id
    }
}

#[derive(Debug, Default)]
pub struct BlockTree {
    entries: RwLock<HashMap<String, BlockTreeEntry>>,
    dirty: AtomicBool,
}

impl BlockTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot. A missing or unreadable snapshot yields an empty
    /// index, which the reconciler then repopulates.
    pub fn open<FS: FileSystem>(fs: &FS, path: &Path) -> Self {
        let index = Self::new();
        if !fs.exists(path) {
            return index;
        }
        let loaded = fs
            .read_to_string(path)
            .map_err(StrataError::from)
            .and_then(|content| Ok(serde_json::from_str::<Vec<BlockTreeEntry>>(&content)?));
        match loaded {
            Ok(entries) => {
                let mut map = index.entries.write().unwrap();
                for e in entries {
                    map.insert(e.id.clone(), e);
                }
                debug!("Loaded {} identity index entries", map.len());
            }
            Err(e) => info!("Discarding unreadable identity index snapshot: {}", e),
        }
        index
    }

    /// Write the snapshot if anything changed since the last save.
    pub fn save<FS: FileSystem>(&self, fs: &FS, path: &Path) -> Result<()> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut entries: Vec<BlockTreeEntry> =
            self.entries.read().unwrap().values().cloned().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        let content = serde_json::to_string(&entries)?;
        fs.write_file(path, &content)
            .map_err(|source| StrataError::FileWrite {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<BlockTreeEntry> {
        self.entries.read().unwrap().get(id).cloned()
    }

    /// Add every identified block of a tree.
    pub fn index_tree(&self, tree: &Tree) {
        let mut fresh = Vec::new();
        for key in tree.walk() {
            let node = tree.node(key);
            if node.id.is_empty() || !node.kind.is_block() {
                continue;
            }
            let parent_id = crate::tree::walk::parent_block(tree, key)
                .map(|p| tree.node(p).id.clone())
                .unwrap_or_default();
            let updated = node.attr("updated").unwrap_or_default().to_string();
            fresh.push(BlockTreeEntry {
                id: node.id.clone(),
                root_id: tree.id.clone(),
                parent_id,
                box_id: tree.box_id.clone(),
                path: tree.path.clone(),
                hpath: tree.hpath.clone(),
                updated,
                kind: node.kind.abbr().to_string(),
            });
        }
        let mut entries = self.entries.write().unwrap();
        for e in fresh {
            entries.insert(e.id.clone(), e);
        }
        drop(entries);
        self.touch();
    }

    /// Replace everything known about a tree.
    pub fn reindex_tree(&self, tree: &Tree) {
        self.remove_by_root(&tree.id);
        self.index_tree(tree);
    }

    fn remove_where(&self, pred: impl Fn(&BlockTreeEntry) -> bool) -> usize {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, e| !pred(e));
        let removed = before - entries.len();
        drop(entries);
        if removed > 0 {
            self.touch();
        }
        removed
    }

    pub fn remove_by_root(&self, root_id: &str) -> usize {
        self.remove_where(|e| e.root_id == root_id)
    }

    pub fn remove_by_path(&self, box_id: &str, path: &str) -> usize {
        self.remove_where(|e| e.box_id == box_id && e.path == path)
    }

    /// Remove entries whose path starts with `prefix`, e.g. a moved folder.
    pub fn remove_by_path_prefix(&self, box_id: &str, prefix: &str) -> usize {
        self.remove_where(|e| e.box_id == box_id && e.path.starts_with(prefix))
    }

    pub fn remove_by_box(&self, box_id: &str) -> usize {
        self.remove_where(|e| e.box_id == box_id)
    }

    /// `(root id, updated)` for every indexed tree, sorted by root id.
    pub fn root_updated(&self) -> Vec<(String, String)> {
        let entries = self.entries.read().unwrap();
        let mut roots: Vec<(String, String)> = entries
            .values()
            .filter(|e| e.is_root())
            .map(|e| (e.id.clone(), e.updated.clone()))
            .collect();
        roots.sort();
        roots
    }

    /// Root entry of every indexed tree.
    pub fn root_entries(&self) -> Vec<BlockTreeEntry> {
        let entries = self.entries.read().unwrap();
        let mut roots: Vec<BlockTreeEntry> =
            entries.values().filter(|e| e.is_root()).cloned().collect();
        roots.sort_by(|a, b| a.id.cmp(&b.id));
        roots
    }

    /// Box ids that have at least one entry.
    pub fn box_ids(&self) -> HashSet<String> {
        let entries = self.entries.read().unwrap();
        entries.values().map(|e| e.box_id.clone()).collect()
    }

    /// On-disk paths of a box that the index does not know about.
    pub fn missing_paths(&self, box_id: &str, on_disk: &[String]) -> Vec<String> {
        let known = self.indexed_paths(box_id);
        on_disk
            .iter()
            .filter(|p| !known.contains(p.as_str()))
            .cloned()
            .collect()
    }

    /// Indexed paths of a box that no longer exist on disk.
    pub fn redundant_paths(&self, box_id: &str, on_disk: &[String]) -> Vec<String> {
        let disk: HashSet<&str> = on_disk.iter().map(String::as_str).collect();
        let mut stale: Vec<String> = self
            .indexed_paths(box_id)
            .into_iter()
            .filter(|p| !disk.contains(p.as_str()))
            .collect();
        stale.sort();
        stale
    }

    /// Drop entries whose path is gone from disk. Returns the removed paths.
    pub fn clear_redundant(&self, box_id: &str, on_disk: &[String]) -> Vec<String> {
        let stale = self.redundant_paths(box_id, on_disk);
        for path in &stale {
            self.remove_by_path(box_id, path);
        }
        stale
    }

    fn indexed_paths(&self, box_id: &str) -> HashSet<String> {
        let entries = self.entries.read().unwrap();
        entries
            .values()
            .filter(|e| e.box_id == box_id)
            .map(|e| e.path.clone())
            .collect()
    }
}
