//! Deriving `blocks` and `refs` rows from a tree.

use std::collections::HashMap;

use crate::blocktree::BlockTree;
use crate::id;
use crate::tree::{NodeKey, NodeType, Tree, walk};

/// A `blocks` table row.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRow {
    pub id: String,
    pub parent_id: String,
    pub root_id: String,
    pub box_id: String,
    pub path: String,
    pub hpath: String,
    pub name: String,
    pub alias: String,
    pub content: String,
    pub kind: String,
    pub subtype: String,
    pub ial: String,
    pub created: String,
    pub updated: String,
}

/// A `refs` table row.
#[derive(Debug, Clone, PartialEq)]
pub struct RefRow {
    pub id: String,
    pub def_block_id: String,
    pub def_block_root_id: String,
    pub block_id: String,
    pub root_id: String,
    pub box_id: String,
    pub path: String,
    pub content: String,
}

/// Plain text of a subtree, as stored in `blocks.content`.
pub fn text_content(tree: &Tree, key: NodeKey) -> String {
    let mut out = String::new();
    for k in tree.preorder(key) {
        let node = tree.node(k);
        if matches!(
            node.kind,
            NodeType::Text | NodeType::BlockRef | NodeType::TextMark
        ) {
            out.push_str(&node.data);
        }
    }
    out
}

fn ial_string(tree: &Tree, key: NodeKey) -> String {
    let attrs: Vec<String> = tree
        .node(key)
        .ial
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('"', "&quot;")))
        .collect();
    format!("{{: {}}}", attrs.join(" "))
}

pub fn blocks_from_tree(tree: &Tree) -> Vec<BlockRow> {
    let mut rows = Vec::new();
    for key in tree.walk() {
        let node = tree.node(key);
        if node.id.is_empty() || !node.kind.is_block() {
            continue;
        }
        let content = if node.kind == NodeType::Document {
            tree.title().to_string()
        } else {
            text_content(tree, key)
        };
        let subtype = match node.kind {
            NodeType::Heading => format!("h{}", node.heading_level),
            _ => String::new(),
        };
        let created = id::time_from_id(&node.id).unwrap_or_default().to_string();
        let updated = node
            .attr("updated")
            .map(str::to_string)
            .unwrap_or_else(|| created.clone());
        rows.push(BlockRow {
            id: node.id.clone(),
            parent_id: walk::parent_block(tree, key)
                .map(|p| tree.node(p).id.clone())
                .unwrap_or_default(),
            root_id: tree.id.clone(),
            box_id: tree.box_id.clone(),
            path: tree.path.clone(),
            hpath: tree.hpath.clone(),
            name: node.attr("name").unwrap_or_default().to_string(),
            alias: node.attr("alias").unwrap_or_default().to_string(),
            content,
            kind: node.kind.abbr().to_string(),
            subtype,
            ial: ial_string(tree, key),
            created,
            updated,
        });
    }
    rows
}

/// Reference rows for every block ref in the tree.
///
/// The definition root is resolved inside the tree first, then through the
/// identity index; an unknown definition leaves it empty.
pub fn refs_from_tree(tree: &Tree, blocktree: &BlockTree) -> Vec<RefRow> {
    let mut rows = Vec::new();
    let mut ordinals: HashMap<String, usize> = HashMap::new();
    for key in tree.walk() {
        let node = tree.node(key);
        if node.kind != NodeType::BlockRef {
            continue;
        }
        let Some(def_id) = node.attr("ref-id") else {
            continue;
        };
        let Some(owner) = walk::parent_block(tree, key) else {
            continue;
        };
        let block_id = tree.node(owner).id.clone();
        let def_block_root_id = if tree.find_by_id(def_id).is_some() {
            tree.id.clone()
        } else {
            blocktree
                .get(def_id)
                .map(|e| e.root_id)
                .unwrap_or_default()
        };
        let ordinal = ordinals.entry(block_id.clone()).or_insert(0);
        *ordinal += 1;
        rows.push(RefRow {
            id: format!("{}-{}", block_id, ordinal),
            def_block_id: def_id.to_string(),
            def_block_root_id,
            block_id,
            root_id: tree.id.clone(),
            box_id: tree.box_id.clone(),
            path: tree.path.clone(),
            content: node.data.clone(),
        });
    }
    rows
}
