//! Test utilities for strata_core
//!
//! A [`Fixture`] is an in-memory workspace with one open notebook, the two
//! indexes and the write queue already wired, plus small tree builders.

use std::sync::{Arc, Mutex};

use crate::blocktree::BlockTree;
use crate::config::Config;
use crate::events::{EventBus, IndexEvent};
use crate::fs::{FileSystem, InMemoryFileSystem};
use crate::loader::Loader;
use crate::queue::TaskQueue;
use crate::reconcile::ReconcilerService;
use crate::shutdown::Shutdown;
use crate::sql::SqlIndex;
use crate::tree::{Node, NodeKey, NodeType, Tree, TreeStore};

pub const BOX: &str = "20240101000000-boxaaaa";

pub struct Fixture {
    pub fs: InMemoryFileSystem,
    pub config: Config,
    pub store: Arc<TreeStore<InMemoryFileSystem>>,
    pub blocktree: Arc<BlockTree>,
    pub queue: Arc<TaskQueue>,
    pub events: Arc<EventBus>,
    pub shutdown: Shutdown,
}

impl Fixture {
    pub fn new() -> Self {
        let fs = InMemoryFileSystem::new();
        let mut config = Config::new("/ws");
        config.reload_notice_delay_ms = 0;
        let layout = config.layout();
        fs.create_dir_all(&layout.box_dir(BOX)).unwrap();

        let blocktree = Arc::new(BlockTree::new());
        let queue = Arc::new(TaskQueue::new(
            Arc::new(SqlIndex::in_memory().unwrap()),
            Arc::clone(&blocktree),
        ));
        Self {
            store: Arc::new(TreeStore::new(fs.clone(), layout)),
            fs,
            config,
            blocktree,
            queue,
            events: Arc::new(EventBus::new()),
            shutdown: Shutdown::new(),
        }
    }

    /// A fresh reconciler over the fixture's shared state.
    pub fn reconciler(&self) -> ReconcilerService<InMemoryFileSystem> {
        ReconcilerService::new(
            Arc::clone(&self.store),
            Arc::clone(&self.blocktree),
            Arc::clone(&self.queue),
            Arc::clone(&self.events),
            self.config.clone(),
            self.shutdown.clone(),
        )
    }

    pub fn loader(&self) -> Loader<InMemoryFileSystem> {
        Loader::new(
            Arc::clone(&self.store),
            Arc::clone(&self.blocktree),
            Arc::clone(&self.queue),
            self.config.clone(),
        )
    }

    /// Collect every emitted event.
    pub fn record_events(&self) -> Arc<Mutex<Vec<IndexEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        self.events.subscribe(Arc::new(move |e: &IndexEvent| {
            sink.lock().unwrap().push(e.clone());
        }));
        seen
    }

    /// Write a tree straight to disk, bypassing both indexes.
    pub fn write(&self, tree: &mut Tree) {
        self.store.write_tree(tree).unwrap();
    }

    /// Write a tree and index it the way a normal save does.
    pub fn save(&self, tree: &mut Tree) {
        self.write(tree);
        self.blocktree.reindex_tree(tree);
        self.queue.upsert(tree);
        self.queue.wait_drained().unwrap();
    }
}

/// An empty document at the box root.
pub fn doc(id: &str, title: &str) -> Tree {
    let mut tree = Tree::new(id, BOX, &format!("/{id}.sy"));
    let root = tree.root();
    tree.set_attr(root, "title", title);
    tree.set_attr(root, "updated", "20240101120000");
    tree
}

/// Append a paragraph holding `text` under `parent`.
pub fn para(tree: &mut Tree, parent: NodeKey, id: &str, text: &str) -> NodeKey {
    let key = tree.alloc(Node::new(NodeType::Paragraph, id));
    tree.set_attr(key, "updated", "20240101120000");
    tree.append_child(parent, key);
    let mut t = Node::new(NodeType::Text, "");
    t.data = text.to_string();
    let t = tree.alloc(t);
    tree.append_child(key, t);
    key
}

/// Append a heading under `parent`.
pub fn heading(tree: &mut Tree, parent: NodeKey, id: &str, level: u8, text: &str, folded: bool) -> NodeKey {
    let mut h = Node::new(NodeType::Heading, id);
    h.heading_level = level;
    if folded {
        h.ial.insert("fold".to_string(), "1".to_string());
    }
    let key = tree.alloc(h);
    tree.append_child(parent, key);
    let mut t = Node::new(NodeType::Text, "");
    t.data = text.to_string();
    let t = tree.alloc(t);
    tree.append_child(key, t);
    key
}

/// Append a block ref to `target` inside `block`.
pub fn block_ref(tree: &mut Tree, block: NodeKey, target: &str, anchor: &str) -> NodeKey {
    let mut r = Node::new(NodeType::BlockRef, "");
    r.ial.insert("ref-id".to_string(), target.to_string());
    r.data = anchor.to_string();
    let key = tree.alloc(r);
    tree.append_child(block, key);
    key
}

/// Node id `YYYYMMDDHHMMSS-<suffix>` for readable fixtures; `n` fills the suffix.
pub fn nid(n: u32) -> String {
    format!("20240101000001-{n:07}")
}
