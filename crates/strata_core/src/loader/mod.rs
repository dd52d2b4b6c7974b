//! Windowed document loading.
//!
//! Editors never receive a whole document. A [`DocRequest`] names a node, a
//! direction ([`LoadMode`]) and a budget; the [`Loader`] picks the matching
//! run of sibling blocks, copies them into a detached tree and decorates the
//! copy (ref counts, anchors, search and virtual-ref marks).
//!
//! ```no_run
//! use strata_core::loader::{DocRequest, LoadMode};
//!
//! let req = DocRequest::new("20240101093000-abc1234").mode(LoadMode::Down).size(32);
//! assert_eq!(req.mode, LoadMode::Down);
//! ```

mod mode;
mod range;
mod render;

pub use mode::{LoadMode, Window, WindowCtx, WindowStrategy};
pub use render::{SEARCH_MARK, VIRTUAL_REF_MARK};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::blocktree::BlockTree;
use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::fs::FileSystem;
use crate::queue::TaskQueue;
use crate::tree::walk::{FoldMap, heading_parent};
use crate::tree::{NodeKey, NodeType, Tree, TreeStore, serialize_tree};
use render::{Decorator, Selection};

/// What to load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocRequest {
    /// Node to load around; a document id opens the document
    pub id: String,
    /// 1-based position hint; 0 when unknown
    pub index: usize,
    /// Search terms to highlight, whitespace separated
    pub query: String,
    pub mode: LoadMode,
    /// Weighted block budget; 0 uses the configured default
    pub size: usize,
}

impl DocRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn mode(mut self, mode: LoadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }
}

/// A decorated slice of a document.
#[derive(Debug, Clone, Serialize)]
pub struct DocWindow {
    /// Number of document-level blocks in the whole document
    pub block_count: usize,
    /// Window nodes under a detached document root
    #[serde(serialize_with = "serialize_tree")]
    pub blocks: Tree,
    pub parent_id: String,
    /// Closest enclosing heading, or the parent when there is none
    pub parent2_id: String,
    pub root_id: String,
    #[serde(rename = "type")]
    pub kind: NodeType,
    pub eof: bool,
    pub box_id: String,
    pub path: String,
    pub index_start: usize,
}

impl DocWindow {
    /// Ids of the top-level window blocks, in order.
    pub fn block_ids(&self) -> Vec<String> {
        self.blocks
            .children(self.blocks.root())
            .into_iter()
            .map(|k| self.blocks.node(k).id.clone())
            .collect()
    }
}

pub struct Loader<FS: FileSystem> {
    store: Arc<TreeStore<FS>>,
    blocktree: Arc<BlockTree>,
    queue: Arc<TaskQueue>,
    config: Config,
}

impl<FS: FileSystem> Loader<FS> {
    pub fn new(store: Arc<TreeStore<FS>>, blocktree: Arc<BlockTree>, queue: Arc<TaskQueue>, config: Config) -> Self {
        Self {
            store,
            blocktree,
            queue,
            config,
        }
    }

    /// Load a window for `req`.
    ///
    /// An id the identity index does not know is `BlockNotFound`, or
    /// `TreeNotFound` for [`LoadMode::Focus`] so an editor opening a deleted
    /// document closes instead of retrying.
    pub fn load_doc(&self, req: &DocRequest) -> Result<DocWindow> {
        self.queue.wait_drained()?;
        let tree = self.tree_of(&req.id).map_err(|e| match e {
            StrataError::BlockNotFound(id) if req.mode == LoadMode::Focus => StrataError::TreeNotFound(id),
            e => e,
        })?;
        let requested = tree
            .find_by_id(&req.id)
            .ok_or_else(|| StrataError::BlockNotFound(req.id.clone()))?;

        let folds = FoldMap::build(&tree);
        let is_doc = requested == tree.root();
        let is_heading = tree.node(requested).kind == NodeType::Heading;
        let Some((focus, index)) = resolve_focus(&tree, &folds, requested, req.index, req.mode) else {
            return self.assemble(&tree, &folds, Vec::new(), tree.root(), requested, &req.query, true, req.index);
        };

        let size = if req.size == 0 {
            self.config.default_window_size
        } else {
            req.size
        };
        let ctx = WindowCtx {
            tree: &tree,
            folds: &folds,
            focus,
            size,
            input_index: req.index,
            is_doc,
            is_heading,
        };
        let window = req.mode.strategy().load(&ctx);
        let mut out = self.assemble(&tree, &folds, window.nodes, focus, requested, &req.query, window.eof, index)?;
        if is_doc {
            out.kind = NodeType::Document;
        }
        Ok(out)
    }

    fn tree_of(&self, id: &str) -> Result<Tree> {
        let entry = self
            .blocktree
            .get(id)
            .ok_or_else(|| StrataError::BlockNotFound(id.to_string()))?;
        self.store.load_tree(&entry.box_id, &entry.path)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        tree: &Tree,
        folds: &FoldMap,
        nodes: Vec<NodeKey>,
        focus: NodeKey,
        requested: NodeKey,
        query: &str,
        eof: bool,
        index: usize,
    ) -> Result<DocWindow> {
        let decorator = Decorator {
            sql: self.queue.sql(),
            config: &self.config,
        };
        let blocks = decorator.render(
            &Selection {
                source: tree,
                folds,
                nodes: &nodes,
                focus,
                requested,
            },
            query,
        )?;
        let (parent_id, parent2_id) = parent_ids(tree, focus);
        Ok(DocWindow {
            block_count: tree.doc_block_count(),
            blocks,
            parent_id,
            parent2_id,
            root_id: tree.id.clone(),
            kind: tree.node(focus).kind.clone(),
            eof,
            box_id: tree.box_id.clone(),
            path: tree.path.clone(),
            index_start: index,
        })
    }
}

/// Pick the node a window is built around and the index it starts at.
/// `None` for a document without blocks.
fn resolve_focus(
    tree: &Tree,
    folds: &FoldMap,
    requested: NodeKey,
    index: usize,
    mode: LoadMode,
) -> Option<(NodeKey, usize)> {
    let root = tree.root();
    let mut index = index;
    let mut focus = requested;
    let mut located = false;

    if requested == root {
        if mode == LoadMode::End {
            focus = tree.last_child(root)?;
            index += tree.walk().len();
            located = true;
        } else {
            focus = tree.first_child(root)?;
            if index > 0
                && let Some(&child) = tree.children(root).get(index - 1)
            {
                // Landing inside a folded section shows its heading instead
                focus = folds.hidden_by(child).unwrap_or(child);
                located = true;
            }
        }
    } else if index == 0 && mode != LoadMode::Focus {
        let walk = tree.walk();
        if let Some(pos) = walk.iter().position(|k| *k == requested) {
            index = pos + 1;
            focus = tree.doc_child(requested);
            located = true;
        }
    }

    if index > 1
        && !located
        && let Some(&key) = tree.walk().get(index - 1)
    {
        focus = tree.doc_child(key);
    }
    Some((focus, index))
}

/// Parent id and closest heading-or-parent id for the window focus.
fn parent_ids(tree: &Tree, focus: NodeKey) -> (String, String) {
    let Some(parent) = tree.parent(focus) else {
        let id = tree.node(focus).id.clone();
        return (id.clone(), id);
    };
    let parent_id = tree.node(parent).id.clone();
    // List items report the list's context, like the breadcrumb does
    let anchor = if tree.node(focus).kind == NodeType::ListItem {
        parent
    } else {
        focus
    };
    let parent2_id = heading_parent(tree, anchor)
        .map(|h| tree.node(h).id.clone())
        .unwrap_or_else(|| parent_id.clone());
    (parent_id, parent2_id)
}
