//! Workspace directory layout and notebook (box) configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Directory holding per-box metadata.
pub const BOX_META_DIR: &str = ".strata";

/// Resolves every on-disk location of a workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn box_dir(&self, box_id: &str) -> PathBuf {
        self.data_dir().join(box_id)
    }

    pub fn box_conf(&self, box_id: &str) -> PathBuf {
        self.box_dir(box_id).join(BOX_META_DIR).join("conf.json")
    }

    /// Absolute location of a tree path such as `/a/b.sy`.
    pub fn tree_file(&self, box_id: &str, path: &str) -> PathBuf {
        self.box_dir(box_id).join(path.trim_start_matches('/'))
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    pub fn blocktree_file(&self) -> PathBuf {
        self.temp_dir().join("blocktree.json")
    }

    pub fn index_db(&self) -> PathBuf {
        self.temp_dir().join("index.db")
    }

    pub fn corrupted_dir(&self) -> PathBuf {
        self.root.join("corrupted")
    }
}

/// Notebook configuration stored in `.strata/conf.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoxConf {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub closed: bool,
}

/// A notebook: a top-level directory of trees.
#[derive(Debug, Clone, PartialEq)]
pub struct Notebook {
    pub id: String,
    pub conf: BoxConf,
}

impl Notebook {
    pub fn is_open(&self) -> bool {
        !self.conf.closed
    }
}
