//! Loading and persisting trees on a [`FileSystem`].
//!
//! Every operation works on one tree file at a time; a write replaces the whole
//! file, so a crash leaves either the old or the new tree behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use log::{debug, warn};

use super::{Node, NodeType, Tree, parse_tree, render_tree};
use crate::error::{Result, StrataError};
use crate::fs::FileSystem;
use crate::id;
use crate::workspace::{BOX_META_DIR, BoxConf, Notebook, WorkspaceLayout};

/// Title shown for ancestors whose file cannot be read.
const UNTITLED: &str = "Untitled";

/// Reads and writes trees for one workspace.
pub struct TreeStore<FS: FileSystem> {
    fs: FS,
    layout: WorkspaceLayout,
    /// Document titles by `<box><path>`, kept current by every read and write
    /// so a human readable path does not re-parse its ancestors.
    titles: Mutex<HashMap<String, String>>,
}

fn title_key(box_id: &str, path: &str) -> String {
    format!("{box_id}{path}")
}

impl<FS: FileSystem> TreeStore<FS> {
    pub fn new(fs: FS, layout: WorkspaceLayout) -> Self {
        Self {
            fs,
            layout,
            titles: Mutex::new(HashMap::new()),
        }
    }

    pub fn fs(&self) -> &FS {
        &self.fs
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    /// All notebooks in the workspace, sorted by id.
    pub fn notebooks(&self) -> Result<Vec<Notebook>> {
        let mut boxes = Vec::new();
        for dir in self.fs.list_dir(&self.layout.data_dir())? {
            if !self.fs.is_dir(&dir) {
                continue;
            }
            let Some(box_id) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !id::is_node_id(box_id) {
                continue;
            }
            boxes.push(Notebook {
                id: box_id.to_string(),
                conf: self.box_conf(box_id)?,
            });
        }
        boxes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(boxes)
    }

    fn box_conf(&self, box_id: &str) -> Result<BoxConf> {
        let path = self.layout.box_conf(box_id);
        if !self.fs.exists(&path) {
            return Ok(BoxConf::default());
        }
        let content = self
            .fs
            .read_to_string(&path)
            .map_err(|source| StrataError::FileRead {
                path: path.clone(),
                source,
            })?;
        match serde_json::from_str(&content) {
            Ok(conf) => Ok(conf),
            Err(e) => {
                warn!("Unreadable conf for box {}: {}", box_id, e);
                Ok(BoxConf::default())
            }
        }
    }

    pub fn exists(&self, box_id: &str, path: &str) -> bool {
        self.fs.exists(&self.layout.tree_file(box_id, path))
    }

    /// Load a tree and fill in its human readable path.
    pub fn load_tree(&self, box_id: &str, path: &str) -> Result<Tree> {
        let mut tree = self.read_tree(box_id, path)?;
        tree.hpath = self.hpath_for(box_id, path, tree.title());
        Ok(tree)
    }

    fn read_tree(&self, box_id: &str, path: &str) -> Result<Tree> {
        let file = self.layout.tree_file(box_id, path);
        if !self.fs.exists(&file) {
            return Err(StrataError::TreeNotFound(path.to_string()));
        }
        let content = self
            .fs
            .read_to_string(&file)
            .map_err(|source| StrataError::FileRead {
                path: file.clone(),
                source,
            })?;
        let tree = parse_tree(&content, box_id, path)?;
        self.remember_title(&tree);
        Ok(tree)
    }

    fn remember_title(&self, tree: &Tree) {
        self.titles
            .lock()
            .unwrap()
            .insert(title_key(&tree.box_id, &tree.path), tree.title().to_string());
    }

    fn forget_titles(&self, box_id: &str, path_prefix: &str) {
        let prefix = title_key(box_id, path_prefix);
        self.titles.lock().unwrap().retain(|k, _| !k.starts_with(&prefix));
    }

    /// Title of the document at `path`, from the cache or its file.
    fn title_of(&self, box_id: &str, path: &str) -> Option<String> {
        if let Some(title) = self.titles.lock().unwrap().get(&title_key(box_id, path)) {
            return Some(title.clone());
        }
        self.read_tree(box_id, path).ok().map(|t| t.title().to_string())
    }

    fn hpath_for(&self, box_id: &str, path: &str, title: &str) -> String {
        let segments: Vec<&str> = path
            .trim_start_matches('/')
            .trim_end_matches(".sy")
            .split('/')
            .collect();
        let mut hpath = String::new();
        let mut prefix = String::new();
        for ancestor in &segments[..segments.len().saturating_sub(1)] {
            prefix.push('/');
            prefix.push_str(ancestor);
            let ancestor_title = self
                .title_of(box_id, &format!("{prefix}.sy"))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| UNTITLED.to_string());
            hpath.push('/');
            hpath.push_str(&ancestor_title);
        }
        hpath.push('/');
        hpath.push_str(if title.is_empty() { UNTITLED } else { title });
        hpath
    }

    /// Persist a tree.
    ///
    /// A document with no blocks gets an empty paragraph so it stays editable,
    /// and the root is stamped `updated`. An existing root `updated` is kept
    /// otherwise; callers that change content stamp it themselves.
    pub fn write_tree(&self, tree: &mut Tree) -> Result<()> {
        let root = tree.root();
        if tree.first_child(root).is_none() {
            let para_id = id::new_node_id();
            let mut para = Node::new(NodeType::Paragraph, para_id);
            para.ial.insert("updated".to_string(), id::now_timestamp());
            let key = tree.alloc(para);
            tree.append_child(root, key);
            tree.set_attr(root, "updated", &id::now_timestamp());
        } else if tree.root_node().attr("updated").is_none() {
            tree.set_attr(root, "updated", &id::now_timestamp());
        }

        let content = render_tree(tree)?;
        let file = self.layout.tree_file(&tree.box_id, &tree.path);
        self.fs
            .write_file(&file, &content)
            .map_err(|source| StrataError::FileWrite { path: file, source })?;
        self.remember_title(tree);
        debug!("Wrote tree {} ({})", tree.id, tree.path);
        Ok(())
    }

    /// Every tree path of a box, sorted. `assets` folders and box metadata are skipped.
    pub fn tree_paths(&self, box_id: &str) -> Result<Vec<String>> {
        let box_dir = self.layout.box_dir(box_id);
        let mut paths = Vec::new();
        for file in self.fs.list_files_recursive(&box_dir, "sy")? {
            let Ok(rel) = file.strip_prefix(&box_dir) else {
                continue;
            };
            let skip = rel.components().any(|c| {
                let c = c.as_os_str();
                c == "assets" || c == BOX_META_DIR
            });
            if skip {
                continue;
            }
            paths.push(to_tree_path(rel));
        }
        paths.sort();
        Ok(paths)
    }

    /// Move a tree file out of the box into `corrupted/<timestamp>/<box>/<path>`.
    pub fn quarantine(&self, box_id: &str, path: &str) -> Result<PathBuf> {
        let from = self.layout.tree_file(box_id, path);
        let stamp = Local::now().format("%Y-%m-%d-%H%M%S").to_string();
        let to = self
            .layout
            .corrupted_dir()
            .join(stamp)
            .join(box_id)
            .join(path.trim_start_matches('/'));
        self.fs.move_path(&from, &to)?;
        self.forget_titles(box_id, path);
        warn!("Quarantined {}{} to {}", box_id, path, to.display());
        Ok(to)
    }

    /// Rename the child folder `<dir>/<old_id>` to `<dir>/<new_id>` if present.
    pub fn rename_child_dir(&self, box_id: &str, dir: &str, old_id: &str, new_id: &str) -> Result<bool> {
        let base = self.layout.tree_file(box_id, dir);
        let from = base.join(old_id);
        if !self.fs.is_dir(&from) {
            return Ok(false);
        }
        self.fs.move_path(&from, &base.join(new_id))?;
        self.forget_titles(box_id, &format!("{}/{}/", dir.trim_end_matches('/'), old_id));
        Ok(true)
    }

    pub fn remove_tree(&self, box_id: &str, path: &str) -> Result<()> {
        self.fs.delete_file(&self.layout.tree_file(box_id, path))?;
        self.forget_titles(box_id, path);
        Ok(())
    }
}

fn to_tree_path(rel: &Path) -> String {
    let mut out = String::new();
    for c in rel.components() {
        out.push('/');
        out.push_str(&c.as_os_str().to_string_lossy());
    }
    out
}

/// Directory part of a tree path: `/a/b.sy` -> `/a`, `/b.sy` -> `/`.
pub fn tree_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}
