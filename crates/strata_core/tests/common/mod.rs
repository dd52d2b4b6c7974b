//! Shared builders for integration tests

#![allow(dead_code)]

use strata_core::Strata;
use strata_core::config::Config;
use strata_core::fs::{FileSystem, InMemoryFileSystem};
use strata_core::sql::SqlIndex;
use strata_core::tree::{Node, NodeKey, NodeType, Tree};

pub const BOX: &str = "20240101000000-boxaaaa";

/// In-memory workspace with one open notebook.
pub fn memory_strata() -> (InMemoryFileSystem, Strata<InMemoryFileSystem>) {
    memory_strata_with(|_| {})
}

pub fn memory_strata_with(tweak: impl FnOnce(&mut Config)) -> (InMemoryFileSystem, Strata<InMemoryFileSystem>) {
    let fs = InMemoryFileSystem::new();
    let mut config = Config::new("/ws");
    config.reload_notice_delay_ms = 0;
    tweak(&mut config);
    fs.create_dir_all(&config.layout().box_dir(BOX)).unwrap();
    let strata = Strata::with_index(fs.clone(), config, SqlIndex::in_memory().unwrap());
    (fs, strata)
}

/// Node id with a readable numeric suffix.
pub fn nid(n: u32) -> String {
    format!("20240101000001-{n:07}")
}

pub fn doc(id: &str, title: &str) -> Tree {
    doc_at(id, &format!("/{id}.sy"), title)
}

pub fn doc_at(id: &str, path: &str, title: &str) -> Tree {
    let mut tree = Tree::new(id, BOX, path);
    let root = tree.root();
    tree.set_attr(root, "title", title);
    tree.set_attr(root, "updated", "20240101120000");
    tree
}

pub fn para(tree: &mut Tree, id: &str, text: &str) -> NodeKey {
    let root = tree.root();
    para_in(tree, root, id, text)
}

pub fn para_in(tree: &mut Tree, parent: NodeKey, id: &str, text: &str) -> NodeKey {
    let key = tree.alloc(Node::new(NodeType::Paragraph, id));
    tree.append_child(parent, key);
    if !text.is_empty() {
        text_in(tree, key, text);
    }
    key
}

pub fn text_in(tree: &mut Tree, parent: NodeKey, text: &str) -> NodeKey {
    let mut t = Node::new(NodeType::Text, "");
    t.data = text.to_string();
    let key = tree.alloc(t);
    tree.append_child(parent, key);
    key
}

pub fn heading(tree: &mut Tree, id: &str, level: u8, text: &str, folded: bool) -> NodeKey {
    let mut h = Node::new(NodeType::Heading, id);
    h.heading_level = level;
    if folded {
        h.ial.insert("fold".to_string(), "1".to_string());
    }
    let key = tree.alloc(h);
    let root = tree.root();
    tree.append_child(root, key);
    text_in(tree, key, text);
    key
}

pub fn block_ref(tree: &mut Tree, block: NodeKey, target: &str, anchor: &str) -> NodeKey {
    let mut r = Node::new(NodeType::BlockRef, "");
    r.ial.insert("ref-id".to_string(), target.to_string());
    r.data = anchor.to_string();
    let key = tree.alloc(r);
    tree.append_child(block, key);
    key
}

/// Persist a tree and index it like an editor save.
pub fn save<FS: FileSystem>(strata: &Strata<FS>, tree: &mut Tree) {
    strata.store().write_tree(tree).unwrap();
    strata.blocktree().reindex_tree(tree);
    strata.queue().upsert(tree);
    strata.queue().wait_drained().unwrap();
}

/// Persist a tree without touching either index.
pub fn write_only<FS: FileSystem>(strata: &Strata<FS>, tree: &mut Tree) {
    strata.store().write_tree(tree).unwrap();
}

/// Every block id found in the notebook's tree files.
pub fn disk_ids<FS: FileSystem>(strata: &Strata<FS>) -> Vec<String> {
    let mut ids = Vec::new();
    for path in strata.store().tree_paths(BOX).unwrap() {
        let tree = strata.store().load_tree(BOX, &path).unwrap();
        for key in tree.walk() {
            let node = tree.node(key);
            if node.kind.is_block() {
                ids.push(node.id.clone());
            }
        }
    }
    ids
}
