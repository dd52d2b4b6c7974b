//! Window strategies: which siblings around a focus node make up a window.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::tree::walk::{FoldMap, count_block_nodes, heading_children, super_block_heading};
use crate::tree::{NodeKey, NodeType, Tree};

/// Direction and extent of a window request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Initial open: the focus and what follows it
    #[default]
    Focus,
    /// Scrolling up: siblings before the focus
    Up,
    /// Scrolling down: siblings after the focus
    Down,
    /// Jumping into the middle: both directions around the focus
    Both,
    /// Jumping to the end: the focus and what precedes it
    End,
}

impl LoadMode {
    pub const ALL: [LoadMode; 5] = [
        LoadMode::Focus,
        LoadMode::Up,
        LoadMode::Down,
        LoadMode::Both,
        LoadMode::End,
    ];

    /// Numeric wire code used by editor clients (0 to 4).
    pub fn code(self) -> u8 {
        match self {
            LoadMode::Focus => 0,
            LoadMode::Up => 1,
            LoadMode::Down => 2,
            LoadMode::Both => 3,
            LoadMode::End => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoadMode::Focus => "focus",
            LoadMode::Up => "up",
            LoadMode::Down => "down",
            LoadMode::Both => "both",
            LoadMode::End => "end",
        }
    }

    pub(crate) fn strategy(self) -> &'static dyn WindowStrategy {
        match self {
            LoadMode::Focus => &FocusWindow,
            LoadMode::Up => &UpWindow,
            LoadMode::Down => &DownWindow,
            LoadMode::Both => &BothWindow,
            LoadMode::End => &EndWindow,
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<u8>() {
            return Self::from_code(code).ok_or_else(|| format!("unknown load mode code {code}"));
        }
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown load mode '{s}'"))
    }
}

/// Everything a strategy needs to pick nodes.
pub struct WindowCtx<'a> {
    pub tree: &'a Tree,
    pub folds: &'a FoldMap,
    pub focus: NodeKey,
    pub size: usize,
    /// Index hint from the request, before focus resolution rewrote it
    pub input_index: usize,
    /// The request targeted the document itself
    pub is_doc: bool,
    /// The request targeted a heading
    pub is_heading: bool,
}

/// Selected siblings in document order.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Window {
    pub nodes: Vec<NodeKey>,
    pub eof: bool,
}

pub trait WindowStrategy {
    fn load(&self, ctx: &WindowCtx<'_>) -> Window;
}

/// Weighted node budget. The first node weighs 1, later nodes their block
/// count; the walk stops right after the count exceeds the size.
struct Budget {
    count: usize,
    size: usize,
}

impl Budget {
    fn new(size: usize) -> Self {
        Self { count: 0, size }
    }

    /// Charge a node. Returns true once the budget is spent.
    fn charge(&mut self, tree: &Tree, key: NodeKey) -> bool {
        if self.count < 1 {
            self.count += 1;
        } else {
            self.count += count_block_nodes(tree, key);
        }
        self.is_spent()
    }

    fn is_spent(&self) -> bool {
        self.count > self.size
    }
}

/// Walk siblings from `start` towards the end. Returns the picked nodes and
/// whether the walk ran out of siblings.
fn walk_forward(ctx: &WindowCtx<'_>, start: Option<NodeKey>, budget: &mut Budget) -> (Vec<NodeKey>, bool) {
    let mut nodes = Vec::new();
    let mut cursor = start;
    while let Some(key) = cursor {
        cursor = ctx.tree.next(key);
        if ctx.folds.skips(key, ctx.focus) {
            continue;
        }
        nodes.push(key);
        if budget.charge(ctx.tree, key) {
            return (nodes, cursor.is_none());
        }
    }
    (nodes, true)
}

/// Walk siblings from `start` towards the beginning, returning them in
/// document order. The walk ends once the budget count exceeds `limit`.
fn walk_backward(ctx: &WindowCtx<'_>, start: Option<NodeKey>, budget: &mut Budget, limit: usize) -> (Vec<NodeKey>, bool) {
    let mut nodes = Vec::new();
    let mut cursor = start;
    let mut exhausted = true;
    while let Some(key) = cursor {
        cursor = ctx.tree.prev(key);
        if ctx.folds.skips(key, ctx.focus) {
            continue;
        }
        nodes.push(key);
        budget.charge(ctx.tree, key);
        if budget.count > limit {
            exhausted = cursor.is_none();
            break;
        }
    }
    nodes.reverse();
    (nodes, exhausted)
}

struct FocusWindow;

impl WindowStrategy for FocusWindow {
    fn load(&self, ctx: &WindowCtx<'_>) -> Window {
        let mut nodes = vec![ctx.focus];
        let mut eof = ctx.tree.next(ctx.focus).is_none();
        if ctx.is_doc {
            // The focus is the first node charged
            let mut budget = Budget::new(ctx.size);
            if !budget.charge(ctx.tree, ctx.focus) {
                let (more, exhausted) = walk_forward(ctx, ctx.tree.next(ctx.focus), &mut budget);
                nodes.extend(more);
                eof = exhausted;
            }
        } else if ctx.is_heading {
            let level = ctx.tree.node(ctx.focus).heading_level;
            let mut count = 1;
            let mut cursor = ctx.tree.next(ctx.focus);
            eof = true;
            while let Some(key) = cursor {
                cursor = ctx.tree.next(key);
                if ctx.folds.skips(key, ctx.focus) {
                    continue;
                }
                let node = ctx.tree.node(key);
                let ends_section = match node.kind {
                    NodeType::Heading => node.heading_level <= level,
                    NodeType::SuperBlock => super_block_heading(ctx.tree, key)
                        .is_some_and(|h| ctx.tree.node(h).heading_level <= level),
                    _ => false,
                };
                if ends_section {
                    eof = false;
                    break;
                }
                nodes.push(key);
                count += 1;
                if count > ctx.size {
                    eof = cursor.is_none();
                    break;
                }
            }
        }
        Window { nodes, eof }
    }
}

struct UpWindow;

impl WindowStrategy for UpWindow {
    fn load(&self, ctx: &WindowCtx<'_>) -> Window {
        let (nodes, exhausted) = walk_backward(ctx, ctx.tree.prev(ctx.focus), &mut Budget::new(ctx.size), ctx.size);
        Window { nodes, eof: exhausted }
    }
}

struct DownWindow;

impl DownWindow {
    /// First sibling after the focus, past the hidden section of a folded heading.
    fn next_of(ctx: &WindowCtx<'_>) -> Option<NodeKey> {
        let focus = ctx.tree.node(ctx.focus);
        if focus.kind == NodeType::Heading
            && focus.is_folded()
            && let Some(last) = heading_children(ctx.tree, ctx.focus).last()
        {
            return ctx.tree.next(*last);
        }
        ctx.tree.next(ctx.focus)
    }
}

impl WindowStrategy for DownWindow {
    fn load(&self, ctx: &WindowCtx<'_>) -> Window {
        let next = Self::next_of(ctx);
        let eof = match next {
            None => true,
            Some(n) => ctx.tree.node(ctx.focus).is_doc_ial() || ctx.tree.node(n).is_doc_ial(),
        };
        let (nodes, _) = walk_forward(ctx, next, &mut Budget::new(ctx.size));
        Window { nodes, eof }
    }
}

struct BothWindow;

impl WindowStrategy for BothWindow {
    fn load(&self, ctx: &WindowCtx<'_>) -> Window {
        // One budget for both directions; the backward walk may use the
        // upper half, or two nodes with a position hint.
        let mut budget = Budget::new(ctx.size);
        let limit = if ctx.input_index > 0 {
            1
        } else {
            ctx.size - ctx.size / 2
        };
        let (mut nodes, _) = walk_backward(ctx, Some(ctx.focus), &mut budget, limit);

        if budget.is_spent() {
            let eof = ctx.tree.next(ctx.focus).is_none();
            return Window { nodes, eof };
        }
        let (after, exhausted) = walk_forward(ctx, ctx.tree.next(ctx.focus), &mut budget);
        nodes.extend(after);
        Window { nodes, eof: exhausted }
    }
}

struct EndWindow;

impl WindowStrategy for EndWindow {
    fn load(&self, ctx: &WindowCtx<'_>) -> Window {
        let (nodes, _) = walk_backward(ctx, Some(ctx.focus), &mut Budget::new(ctx.size), ctx.size);
        Window { nodes, eof: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Node;

    fn doc_with(n: usize) -> (Tree, Vec<NodeKey>) {
        let mut tree = Tree::new("20240101000000-aaaaaaa", "box", "/20240101000000-aaaaaaa.sy");
        let root = tree.root();
        let keys = (0..n)
            .map(|i| {
                let k = tree.alloc(Node::new(NodeType::Paragraph, format!("20240101000001-p{i:06}")));
                tree.append_child(root, k);
                k
            })
            .collect();
        (tree, keys)
    }

    fn ctx<'a>(tree: &'a Tree, folds: &'a FoldMap, focus: NodeKey, size: usize) -> WindowCtx<'a> {
        WindowCtx {
            tree,
            folds,
            focus,
            size,
            input_index: 0,
            is_doc: false,
            is_heading: false,
        }
    }

    #[test]
    fn test_mode_codes_and_names() {
        for mode in LoadMode::ALL {
            assert_eq!(LoadMode::from_code(mode.code()), Some(mode));
            assert_eq!(mode.as_str().parse::<LoadMode>(), Ok(mode));
        }
        assert_eq!("3".parse::<LoadMode>(), Ok(LoadMode::Both));
        assert!("sideways".parse::<LoadMode>().is_err());
    }

    #[test]
    fn test_focus_on_document_stops_after_budget() {
        let (tree, keys) = doc_with(10);
        let folds = FoldMap::build(&tree);
        let mut c = ctx(&tree, &folds, keys[0], 3);
        c.is_doc = true;
        let w = LoadMode::Focus.strategy().load(&c);
        // focus 1, then 1 + 1 + 1 > 3
        assert_eq!(w.nodes, keys[..4].to_vec());
        assert!(!w.eof);
    }

    #[test]
    fn test_focus_on_heading_charges_the_heading() {
        let mut tree = Tree::new("20240101000000-aaaaaaa", "box", "/20240101000000-aaaaaaa.sy");
        let root = tree.root();
        let mut h = Node::new(NodeType::Heading, "20240101000001-aaaaaaa");
        h.heading_level = 2;
        let h = tree.alloc(h);
        tree.append_child(root, h);
        let keys: Vec<NodeKey> = (0..10)
            .map(|i| {
                let k = tree.alloc(Node::new(NodeType::Paragraph, format!("20240101000002-p{i:06}")));
                tree.append_child(root, k);
                k
            })
            .collect();
        let folds = FoldMap::build(&tree);
        let mut c = ctx(&tree, &folds, h, 3);
        c.is_heading = true;
        let w = LoadMode::Focus.strategy().load(&c);
        assert_eq!(w.nodes, vec![h, keys[0], keys[1], keys[2]]);
        assert!(!w.eof);
    }

    #[test]
    fn test_every_mode_stays_within_budget() {
        let (tree, keys) = doc_with(40);
        let folds = FoldMap::build(&tree);
        for mode in LoadMode::ALL {
            for size in [1, 2, 5, 8] {
                let mut c = ctx(&tree, &folds, keys[20], size);
                c.is_doc = mode == LoadMode::Focus;
                let w = mode.strategy().load(&c);
                // unit-weight nodes: at most one node past the budget
                assert!(w.nodes.len() <= size + 1, "{mode} size {size}: {}", w.nodes.len());
            }
        }
    }

    #[test]
    fn test_up_returns_all_preceding_siblings_with_eof() {
        let (tree, keys) = doc_with(4);
        let folds = FoldMap::build(&tree);
        let w = LoadMode::Up.strategy().load(&ctx(&tree, &folds, keys[3], 5));
        assert_eq!(w.nodes, keys[..3].to_vec());
        assert!(w.eof);
    }

    #[test]
    fn test_up_stops_when_budget_spent() {
        let (tree, keys) = doc_with(10);
        let folds = FoldMap::build(&tree);
        let w = LoadMode::Up.strategy().load(&ctx(&tree, &folds, keys[9], 2));
        assert_eq!(w.nodes, keys[6..9].to_vec());
        assert!(!w.eof);
    }

    #[test]
    fn test_down_eof_at_last_sibling() {
        let (tree, keys) = doc_with(3);
        let folds = FoldMap::build(&tree);
        let w = LoadMode::Down.strategy().load(&ctx(&tree, &folds, keys[2], 5));
        assert!(w.nodes.is_empty());
        assert!(w.eof);

        let w = LoadMode::Down.strategy().load(&ctx(&tree, &folds, keys[0], 5));
        assert_eq!(w.nodes, keys[1..].to_vec());
        assert!(!w.eof);
    }

    #[test]
    fn test_down_eof_on_doc_sentinel() {
        let (mut tree, keys) = doc_with(3);
        tree.set_attr(keys[1], "type", "doc");
        let folds = FoldMap::build(&tree);
        let w = LoadMode::Down.strategy().load(&ctx(&tree, &folds, keys[0], 5));
        assert!(w.eof);
    }

    #[test]
    fn test_both_splits_budget_around_focus() {
        let (tree, keys) = doc_with(20);
        let folds = FoldMap::build(&tree);
        let w = LoadMode::Both.strategy().load(&ctx(&tree, &folds, keys[10], 4));
        // backward 10, 9, 8 (count 3 > 2), forward 11, 12 (count 5 > 4)
        assert_eq!(w.nodes, keys[8..13].to_vec());
        assert!(!w.eof);
    }

    #[test]
    fn test_both_with_index_hint_keeps_two_before() {
        let (tree, keys) = doc_with(20);
        let folds = FoldMap::build(&tree);
        let mut c = ctx(&tree, &folds, keys[10], 6);
        c.input_index = 11;
        let w = LoadMode::Both.strategy().load(&c);
        assert_eq!(w.nodes, keys[9..16].to_vec());
    }

    #[test]
    fn test_end_is_always_eof() {
        let (tree, keys) = doc_with(5);
        let folds = FoldMap::build(&tree);
        let w = LoadMode::End.strategy().load(&ctx(&tree, &folds, keys[4], 64));
        assert_eq!(w.nodes, keys);
        assert!(w.eof);
    }

    #[test]
    fn test_folded_section_is_skipped_unless_focus_inside() {
        let mut tree = Tree::new("20240101000000-aaaaaaa", "box", "/20240101000000-aaaaaaa.sy");
        let root = tree.root();
        let mut h = Node::new(NodeType::Heading, "20240101000001-aaaaaaa");
        h.heading_level = 2;
        h.ial.insert("fold".into(), "1".into());
        let h = tree.alloc(h);
        tree.append_child(root, h);
        let hidden: Vec<NodeKey> = (0..2)
            .map(|i| {
                let k = tree.alloc(Node::new(NodeType::Paragraph, format!("20240101000002-h{i:06}")));
                tree.append_child(root, k);
                k
            })
            .collect();
        let mut h2 = Node::new(NodeType::Heading, "20240101000003-aaaaaaa");
        h2.heading_level = 2;
        let h2 = tree.alloc(h2);
        tree.append_child(root, h2);
        let folds = FoldMap::build(&tree);

        let mut c = ctx(&tree, &folds, h, 64);
        c.is_doc = true;
        let w = LoadMode::Focus.strategy().load(&c);
        assert_eq!(w.nodes, vec![h, h2]);

        let w = LoadMode::Both.strategy().load(&ctx(&tree, &folds, hidden[1], 64));
        assert_eq!(w.nodes, vec![h, hidden[0], hidden[1], h2]);
    }
}
