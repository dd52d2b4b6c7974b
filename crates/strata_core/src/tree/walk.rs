//! Structural queries shared by the loader and the reconciler.

use std::collections::HashMap;

use super::{NodeKey, NodeType, Tree};

/// Weighted size of a subtree for window budgets.
///
/// Counts block nodes except List, Blockquote and SuperBlock containers. A
/// folded block counts once and its children are skipped.
pub fn count_block_nodes(tree: &Tree, start: NodeKey) -> usize {
    let mut count = 0;
    let mut stack = vec![start];
    while let Some(key) = stack.pop() {
        let node = tree.node(key);
        let container = matches!(
            node.kind,
            NodeType::List | NodeType::Blockquote | NodeType::SuperBlock
        );
        if node.kind.is_block() && !container {
            count += 1;
            if node.is_folded() {
                continue;
            }
        }
        stack.extend(tree.children(key));
    }
    count
}

/// The heading that opens a super block, looking through nested super blocks.
pub fn super_block_heading(tree: &Tree, sb: NodeKey) -> Option<NodeKey> {
    let mut cursor = tree.first_child(sb)?;
    loop {
        match tree.node(cursor).kind {
            NodeType::Heading => return Some(cursor),
            NodeType::SuperBlock => cursor = tree.first_child(cursor)?,
            _ => return None,
        }
    }
}

/// Level of the heading a sibling starts, if it starts a section.
fn section_level(tree: &Tree, key: NodeKey) -> Option<u8> {
    let node = tree.node(key);
    match node.kind {
        NodeType::Heading => Some(node.heading_level),
        NodeType::SuperBlock => super_block_heading(tree, key).map(|h| tree.node(h).heading_level),
        _ => None,
    }
}

/// Following siblings that belong to a heading's section.
pub fn heading_children(tree: &Tree, heading: NodeKey) -> Vec<NodeKey> {
    let level = tree.node(heading).heading_level;
    let mut out = Vec::new();
    let mut cursor = tree.next(heading);
    while let Some(key) = cursor {
        if section_level(tree, key).is_some_and(|l| l <= level) {
            break;
        }
        out.push(key);
        cursor = tree.next(key);
    }
    out
}

/// Closest preceding sibling heading of a shallower level, else the parent.
pub fn heading_parent(tree: &Tree, key: NodeKey) -> Option<NodeKey> {
    let node = tree.node(key);
    let level = if node.kind == NodeType::Heading {
        node.heading_level
    } else {
        u8::MAX
    };
    let mut cursor = tree.prev(key);
    while let Some(k) = cursor {
        let n = tree.node(k);
        if n.kind == NodeType::Heading && n.heading_level < level {
            return Some(k);
        }
        cursor = tree.prev(k);
    }
    tree.parent(key)
}

/// Nearest ancestor that is an identified block.
pub fn parent_block(tree: &Tree, key: NodeKey) -> Option<NodeKey> {
    let mut cursor = tree.parent(key);
    while let Some(p) = cursor {
        let n = tree.node(p);
        if !n.id.is_empty() && n.kind.is_block() {
            return Some(p);
        }
        cursor = tree.parent(p);
    }
    None
}

/// Which folded heading hides each node, computed once per tree.
///
/// A node is hidden when it sits in the section of a folded heading among its
/// siblings, or carries an explicit `heading-fold` marker. Nested folds map to
/// the outermost folded heading, so two nodes hidden by the same fold share an
/// owner.
#[derive(Debug, Default)]
pub struct FoldMap {
    owners: HashMap<NodeKey, NodeKey>,
}

impl FoldMap {
    pub fn build(tree: &Tree) -> Self {
        let mut owners = HashMap::new();
        for parent in tree.walk() {
            // (level, heading) of the folded section currently open
            let mut open: Option<(u8, NodeKey)> = None;
            let mut last_folded: Option<NodeKey> = None;
            for key in tree.children(parent) {
                if let Some((level, _)) = open
                    && section_level(tree, key).is_some_and(|l| l <= level)
                {
                    open = None;
                }

                let node = tree.node(key);
                if let Some((_, heading)) = open {
                    owners.insert(key, heading);
                } else if node.attr("heading-fold") == Some("1")
                    && let Some(heading) = last_folded
                {
                    owners.insert(key, heading);
                } else if node.kind == NodeType::Heading && node.is_folded() {
                    open = Some((node.heading_level, key));
                }

                if node.kind == NodeType::Heading && node.is_folded() {
                    last_folded = Some(key);
                }
            }
        }
        Self { owners }
    }

    /// The folded heading hiding `key`, if any.
    pub fn hidden_by(&self, key: NodeKey) -> Option<NodeKey> {
        self.owners.get(&key).copied()
    }

    pub fn is_hidden(&self, key: NodeKey) -> bool {
        self.owners.contains_key(&key)
    }

    /// Whether `key` should be skipped when building a window around `focus`.
    pub fn skips(&self, key: NodeKey, focus: NodeKey) -> bool {
        match self.hidden_by(key) {
            Some(owner) => self.hidden_by(focus) != Some(owner),
            None => false,
        }
    }
}
