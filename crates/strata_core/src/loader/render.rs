//! Window decoration: fold cleanup, ref counts, anchors and inline marks,
//! applied to a detached copy so the source tree is never touched.

use std::collections::HashSet;
use std::ops::Range;

use log::debug;

use crate::config::Config;
use crate::error::Result;
use crate::sql::SqlIndex;
use crate::tree::walk::{FoldMap, parent_block};
use crate::tree::{Node, NodeKey, NodeType, Tree};

pub const SEARCH_MARK: &str = "search-mark";
pub const VIRTUAL_REF_MARK: &str = "virtual-block-ref";

/// Inputs shared by every window a loader builds.
pub(super) struct Decorator<'a> {
    pub sql: &'a SqlIndex,
    pub config: &'a Config,
}

/// Nodes picked from a source tree.
pub(super) struct Selection<'a> {
    pub source: &'a Tree,
    pub folds: &'a FoldMap,
    pub nodes: &'a [NodeKey],
    pub focus: NodeKey,
    /// Node the caller asked for; search marks stay inside its subtree
    pub requested: NodeKey,
}

impl Decorator<'_> {
    /// Copy the selected nodes under a fresh document root and decorate them.
    pub fn render(&self, sel: &Selection<'_>, query: &str) -> Result<Tree> {
        let source = sel.source;
        let mut out = Tree::new(&source.id, &source.box_id, &source.path);
        out.hpath = source.hpath.clone();
        let out_root = out.root();
        for (name, value) in &source.root_node().ial {
            out.set_attr(out_root, name, value);
        }

        let mut pairs: Vec<(NodeKey, NodeKey)> = Vec::new();
        for &n in sel.nodes {
            let copy = out.copy_subtree(source, n);
            out.append_child(out_root, copy);
            pairs.extend(source.preorder(n).into_iter().zip(out.preorder(copy)));
        }

        for &(src, dst) in &pairs {
            if sel.folds.skips(src, sel.focus) {
                out.unlink(dst);
            }
        }
        let live: HashSet<NodeKey> = out.walk().into_iter().collect();
        pairs.retain(|(_, dst)| live.contains(dst));

        let ref_count = self.sql.root_children_ref_count(&source.id)?;
        for &(_, dst) in &pairs {
            let id = out.node(dst).id.clone();
            if let Some(&count) = ref_count.get(&id)
                && count > 0
            {
                out.set_attr(dst, "refcount", &count.to_string());
            }
        }

        for &(_, dst) in &pairs {
            if out.node(dst).kind == NodeType::BlockRef {
                self.fill_anchor(&mut out, dst)?;
            }
        }

        let in_scope: HashSet<NodeKey> = source.preorder(sel.requested).into_iter().collect();
        let terms = search_terms(query);
        let virtual_keywords = self.virtual_keywords(source)?;
        let case_sensitive = self.config.search.case_sensitive;

        for &(src, dst) in &pairs {
            if out.node(dst).kind != NodeType::Text {
                continue;
            }
            let text = out.node(dst).data.clone();

            if !terms.is_empty() && in_scope.contains(&src) {
                let hits = find_matches(&text, &terms, case_sensitive, |_, _| true);
                if !hits.is_empty() {
                    splice(&mut out, dst, &text, &hits, SEARCH_MARK);
                    continue;
                }
            }

            if virtual_keywords.is_empty() {
                continue;
            }
            let Some(block) = parent_block(&out, dst) else {
                continue;
            };
            let block = out.node(block);
            if ref_count.get(&block.id).copied().unwrap_or(0) >= 1 {
                continue;
            }
            let hits = find_matches(&text, &virtual_keywords, true, ascii_spaced);
            if hits.is_empty() {
                continue;
            }
            let own: Vec<&str> = [block.attr("name"), block.attr("alias")]
                .into_iter()
                .flatten()
                .collect();
            if hits.iter().any(|h| own.contains(&&text[h.clone()])) {
                continue;
            }
            splice(&mut out, dst, &text, &hits, VIRTUAL_REF_MARK);
        }
        Ok(out)
    }

    /// Give a block ref without anchor text the indexed content of its target.
    fn fill_anchor(&self, out: &mut Tree, key: NodeKey) -> Result<()> {
        let node = out.node(key);
        if !node.data.is_empty() {
            return Ok(());
        }
        let Some(target) = node.attr("ref-id").map(str::to_string) else {
            return Ok(());
        };
        let Some(content) = self.sql.block_content(&target)? else {
            debug!("Block ref to unknown block {}", target);
            return Ok(());
        };
        let max = self.config.editor.dynamic_anchor_max_len;
        let anchor = if content.chars().count() > max {
            let cut: String = content.chars().take(max).collect();
            format!("{cut}...")
        } else {
            content
        };
        out.node_mut(key).data = anchor;
        if out.node(key).attr("subtype").is_none() {
            out.set_attr(key, "subtype", "d");
        }
        Ok(())
    }

    fn virtual_keywords(&self, source: &Tree) -> Result<Vec<String>> {
        let editor = &self.config.editor;
        if !editor.virtual_block_ref {
            return Ok(Vec::new());
        }
        let mut keywords = self.sql.virtual_ref_keywords(editor.keyword_sources())?;
        let excluded = editor.excluded_keywords();
        let title = source.title();
        keywords.retain(|k| !excluded.contains(k) && k != title);
        Ok(keywords)
    }
}

/// Whitespace-separated query terms, longest first.
fn search_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut terms: Vec<String> = query
        .split_whitespace()
        .filter(|t| seen.insert(*t))
        .map(str::to_string)
        .collect();
    terms.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
    terms
}

/// Byte length of `needle` at the start of `hay`, if it matches.
fn match_len(hay: &str, needle: &str, case_sensitive: bool) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    if case_sensitive {
        return hay.starts_with(needle).then_some(needle.len());
    }
    let mut hay_chars = hay.char_indices();
    for nc in needle.chars() {
        let (_, hc) = hay_chars.next()?;
        if !hc.to_lowercase().eq(nc.to_lowercase()) {
            return None;
        }
    }
    Some(hay_chars.next().map_or(hay.len(), |(i, _)| i))
}

/// Leftmost, non-overlapping keyword hits. Earlier keywords win at a position.
fn find_matches(
    text: &str,
    keywords: &[String],
    case_sensitive: bool,
    accept: impl Fn(&str, &Range<usize>) -> bool,
) -> Vec<Range<usize>> {
    let mut hits = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        let rest = &text[pos..];
        let hit = keywords.iter().find_map(|k| {
            let len = match_len(rest, k, case_sensitive)?;
            let range = pos..pos + len;
            accept(text, &range).then_some(range)
        });
        match hit {
            Some(range) => {
                pos = range.end;
                hits.push(range);
            }
            None => pos += rest.chars().next().map_or(1, char::len_utf8),
        }
    }
    hits
}

/// ASCII keywords need a space on at least one side to count as a mention.
fn ascii_spaced(text: &str, range: &Range<usize>) -> bool {
    if !text[range.clone()].is_ascii() {
        return true;
    }
    text[..range.start].ends_with(' ') || text[range.end..].starts_with(' ')
}

/// Replace a Text node with plain and marked pieces.
fn splice(out: &mut Tree, text_key: NodeKey, text: &str, hits: &[Range<usize>], mark: &str) {
    let mut cursor = 0;
    for hit in hits {
        if hit.start > cursor {
            insert_piece(out, text_key, NodeType::Text, &text[cursor..hit.start], None);
        }
        insert_piece(out, text_key, NodeType::TextMark, &text[hit.clone()], Some(mark));
        cursor = hit.end;
    }
    if cursor < text.len() {
        insert_piece(out, text_key, NodeType::Text, &text[cursor..], None);
    }
    out.unlink(text_key);
}

fn insert_piece(out: &mut Tree, before: NodeKey, kind: NodeType, data: &str, mark: Option<&str>) {
    let mut node = Node::new(kind, "");
    node.data = data.to_string();
    if let Some(mark) = mark {
        node.ial.insert("data-type".to_string(), mark.to_string());
    }
    let key = out.alloc(node);
    out.insert_before(before, key);
}
