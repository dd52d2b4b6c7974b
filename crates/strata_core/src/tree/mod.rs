//! Document trees.
//!
//! A [`Tree`] owns an arena of [`Node`]s rooted at a Document node. Links
//! between nodes (parent, siblings, children) are arena indices, so trees can
//! be walked in both directions without reference counting. Unlinked nodes stay
//! in the arena but are no longer reachable from the root.

mod json;
pub mod store;
pub mod walk;

pub use json::{parse_tree, render_tree, serialize_tree};
pub use store::TreeStore;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::id;

/// Index of a node inside its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(usize);

/// Node type tag, persisted as `NodeDocument`, `NodeHeading`, ...
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeType {
    Document,
    Heading,
    Paragraph,
    List,
    ListItem,
    CodeBlock,
    Blockquote,
    SuperBlock,
    Table,
    MathBlock,
    ThematicBreak,
    Text,
    BlockRef,
    TextMark,
    /// Any type this crate does not interpret; kept so rewrites are lossless.
    Other(String),
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Document => "NodeDocument",
            NodeType::Heading => "NodeHeading",
            NodeType::Paragraph => "NodeParagraph",
            NodeType::List => "NodeList",
            NodeType::ListItem => "NodeListItem",
            NodeType::CodeBlock => "NodeCodeBlock",
            NodeType::Blockquote => "NodeBlockquote",
            NodeType::SuperBlock => "NodeSuperBlock",
            NodeType::Table => "NodeTable",
            NodeType::MathBlock => "NodeMathBlock",
            NodeType::ThematicBreak => "NodeThematicBreak",
            NodeType::Text => "NodeText",
            NodeType::BlockRef => "NodeBlockRef",
            NodeType::TextMark => "NodeTextMark",
            NodeType::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "NodeDocument" => NodeType::Document,
            "NodeHeading" => NodeType::Heading,
            "NodeParagraph" => NodeType::Paragraph,
            "NodeList" => NodeType::List,
            "NodeListItem" => NodeType::ListItem,
            "NodeCodeBlock" => NodeType::CodeBlock,
            "NodeBlockquote" => NodeType::Blockquote,
            "NodeSuperBlock" => NodeType::SuperBlock,
            "NodeTable" => NodeType::Table,
            "NodeMathBlock" => NodeType::MathBlock,
            "NodeThematicBreak" => NodeType::ThematicBreak,
            "NodeText" => NodeType::Text,
            "NodeBlockRef" => NodeType::BlockRef,
            "NodeTextMark" => NodeType::TextMark,
            other => NodeType::Other(other.to_string()),
        }
    }

    /// Block-level types; everything else is inline content.
    pub fn is_block(&self) -> bool {
        !matches!(
            self,
            NodeType::Text | NodeType::BlockRef | NodeType::TextMark | NodeType::Other(_)
        )
    }

    /// Short type code used in the `blocks.type` column.
    pub fn abbr(&self) -> &'static str {
        match self {
            NodeType::Document => "d",
            NodeType::Heading => "h",
            NodeType::Paragraph => "p",
            NodeType::List => "l",
            NodeType::ListItem => "i",
            NodeType::CodeBlock => "c",
            NodeType::Blockquote => "b",
            NodeType::SuperBlock => "s",
            NodeType::Table => "t",
            NodeType::MathBlock => "m",
            NodeType::ThematicBreak => "tb",
            _ => "",
        }
    }
}

impl Serialize for NodeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NodeType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(NodeType::parse(&s))
    }
}

/// A single node in a tree arena.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub kind: NodeType,
    pub heading_level: u8,
    /// Raw content for leaf and inline nodes.
    pub data: String,
    /// Inline attribute list, including `id`.
    pub ial: IndexMap<String, String>,
    parent: Option<NodeKey>,
    first_child: Option<NodeKey>,
    last_child: Option<NodeKey>,
    prev: Option<NodeKey>,
    next: Option<NodeKey>,
}

impl Node {
    pub fn new(kind: NodeType, id: impl Into<String>) -> Self {
        let id = id.into();
        let mut ial = IndexMap::new();
        if !id.is_empty() {
            ial.insert("id".to_string(), id.clone());
        }
        Self {
            id,
            kind,
            heading_level: 0,
            data: String::new(),
            ial,
            parent: None,
            first_child: None,
            last_child: None,
            prev: None,
            next: None,
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.ial.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Folded block: its children are hidden in the editor.
    pub fn is_folded(&self) -> bool {
        self.attr("fold") == Some("1")
    }

    /// Carries the document-level attribute sentinel.
    pub fn is_doc_ial(&self) -> bool {
        self.attr("type") == Some("doc")
    }
}

/// A parsed document tree.
#[derive(Debug, Clone)]
pub struct Tree {
    /// Root id, equal to the file stem of `path`.
    pub id: String,
    pub box_id: String,
    /// Storage path inside the box, e.g. `/<parent id>/<id>.sy`.
    pub path: String,
    /// Human readable path built from ancestor titles.
    pub hpath: String,
    nodes: Vec<Node>,
    root: NodeKey,
}

impl Tree {
    /// An empty tree whose root document carries `id`.
    pub fn new(id: &str, box_id: &str, path: &str) -> Self {
        let mut tree = Self {
            id: id.to_string(),
            box_id: box_id.to_string(),
            path: path.to_string(),
            hpath: String::new(),
            nodes: Vec::new(),
            root: NodeKey(0),
        };
        tree.root = tree.alloc(Node::new(NodeType::Document, id));
        tree
    }

    pub fn root(&self) -> NodeKey {
        self.root
    }

    pub fn node(&self, key: NodeKey) -> &Node {
        &self.nodes[key.0]
    }

    pub fn node_mut(&mut self, key: NodeKey) -> &mut Node {
        &mut self.nodes[key.0]
    }

    pub fn root_node(&self) -> &Node {
        self.node(self.root)
    }

    pub fn title(&self) -> &str {
        self.root_node().attr("title").unwrap_or_default()
    }

    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.node(key).parent
    }

    pub fn first_child(&self, key: NodeKey) -> Option<NodeKey> {
        self.node(key).first_child
    }

    pub fn last_child(&self, key: NodeKey) -> Option<NodeKey> {
        self.node(key).last_child
    }

    pub fn prev(&self, key: NodeKey) -> Option<NodeKey> {
        self.node(key).prev
    }

    pub fn next(&self, key: NodeKey) -> Option<NodeKey> {
        self.node(key).next
    }

    pub fn children(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut cursor = self.first_child(key);
        while let Some(c) = cursor {
            out.push(c);
            cursor = self.next(c);
        }
        out
    }

    /// Add a detached node to the arena.
    pub fn alloc(&mut self, node: Node) -> NodeKey {
        self.nodes.push(node);
        NodeKey(self.nodes.len() - 1)
    }

    pub fn append_child(&mut self, parent: NodeKey, child: NodeKey) {
        self.unlink(child);
        let last = self.nodes[parent.0].last_child;
        {
            let c = &mut self.nodes[child.0];
            c.parent = Some(parent);
            c.prev = last;
            c.next = None;
        }
        match last {
            Some(l) => self.nodes[l.0].next = Some(child),
            None => self.nodes[parent.0].first_child = Some(child),
        }
        self.nodes[parent.0].last_child = Some(child);
    }

    pub fn insert_before(&mut self, anchor: NodeKey, node: NodeKey) {
        self.unlink(node);
        let parent = self.nodes[anchor.0].parent;
        let prev = self.nodes[anchor.0].prev;
        {
            let n = &mut self.nodes[node.0];
            n.parent = parent;
            n.prev = prev;
            n.next = Some(anchor);
        }
        self.nodes[anchor.0].prev = Some(node);
        match prev {
            Some(p) => self.nodes[p.0].next = Some(node),
            None => {
                if let Some(p) = parent {
                    self.nodes[p.0].first_child = Some(node);
                }
            }
        }
    }

    /// Detach a node (and its subtree) from its parent and siblings.
    pub fn unlink(&mut self, key: NodeKey) {
        let (parent, prev, next) = {
            let n = &self.nodes[key.0];
            (n.parent, n.prev, n.next)
        };
        match prev {
            Some(p) => self.nodes[p.0].next = next,
            None => {
                if let Some(par) = parent {
                    self.nodes[par.0].first_child = next;
                }
            }
        }
        match next {
            Some(n) => self.nodes[n.0].prev = prev,
            None => {
                if let Some(par) = parent {
                    self.nodes[par.0].last_child = prev;
                }
            }
        }
        let n = &mut self.nodes[key.0];
        n.parent = None;
        n.prev = None;
        n.next = None;
    }

    /// Pre-order walk of the subtree at `start`, without recursion.
    pub fn preorder(&self, start: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(key) = stack.pop() {
            out.push(key);
            let mut child = self.last_child(key);
            while let Some(c) = child {
                stack.push(c);
                child = self.prev(c);
            }
        }
        out
    }

    /// All nodes reachable from the root, in document order.
    pub fn walk(&self) -> Vec<NodeKey> {
        self.preorder(self.root)
    }

    pub fn find_by_id(&self, id: &str) -> Option<NodeKey> {
        if id.is_empty() {
            return None;
        }
        self.walk().into_iter().find(|k| self.node(*k).id == id)
    }

    /// Change a node id, keeping the `id` attribute in step.
    pub fn set_id(&mut self, key: NodeKey, new_id: &str) {
        let node = self.node_mut(key);
        node.id = new_id.to_string();
        node.ial.insert("id".to_string(), new_id.to_string());
        if key == self.root {
            self.id = new_id.to_string();
        }
    }

    pub fn set_attr(&mut self, key: NodeKey, name: &str, value: &str) {
        self.node_mut(key)
            .ial
            .insert(name.to_string(), value.to_string());
    }

    /// The ancestor of `key` that is a direct child of the root.
    pub fn doc_child(&self, key: NodeKey) -> NodeKey {
        let mut cursor = key;
        while let Some(p) = self.parent(cursor) {
            if p == self.root {
                return cursor;
            }
            cursor = p;
        }
        cursor
    }

    pub fn is_descendant_of(&self, key: NodeKey, ancestor: NodeKey) -> bool {
        let mut cursor = self.parent(key);
        while let Some(p) = cursor {
            if p == ancestor {
                return true;
            }
            cursor = self.parent(p);
        }
        false
    }

    /// Number of direct children of the root.
    pub fn doc_block_count(&self) -> usize {
        self.children(self.root).len()
    }

    /// Root `updated`, falling back to the id timestamp.
    pub fn updated(&self) -> String {
        match self.root_node().attr("updated") {
            Some(u) => u.to_string(),
            None => id::time_from_id(&self.id).unwrap_or_default().to_string(),
        }
    }

    /// Deep-copy the subtree at `src` of `from` into this arena, returning the
    /// detached copy.
    pub fn copy_subtree(&mut self, from: &Tree, src: NodeKey) -> NodeKey {
        let mut fresh = from.node(src).clone();
        fresh.parent = None;
        fresh.first_child = None;
        fresh.last_child = None;
        fresh.prev = None;
        fresh.next = None;
        let top = self.alloc(fresh);

        let mut pending = vec![(src, top)];
        while let Some((src_key, dst_key)) = pending.pop() {
            for child in from.children(src_key) {
                let mut copy = from.node(child).clone();
                copy.parent = None;
                copy.first_child = None;
                copy.last_child = None;
                copy.prev = None;
                copy.next = None;
                let new_key = self.alloc(copy);
                self.append_child(dst_key, new_key);
                pending.push((child, new_key));
            }
        }
        top
    }
}
