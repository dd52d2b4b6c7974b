//! `.sy` serialization: tab-indented JSON, one object per node.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{Node, NodeKey, NodeType, Tree};
use crate::error::{Result, StrataError};
use crate::id;

#[derive(Debug, Serialize, Deserialize)]
struct JsonNode {
    #[serde(rename = "ID", default, skip_serializing_if = "String::is_empty")]
    id: String,
    #[serde(rename = "Type")]
    kind: NodeType,
    #[serde(rename = "HeadingLevel", default, skip_serializing_if = "is_zero")]
    heading_level: u8,
    #[serde(rename = "Data", default, skip_serializing_if = "String::is_empty")]
    data: String,
    #[serde(
        rename = "Properties",
        default,
        skip_serializing_if = "IndexMap::is_empty"
    )]
    properties: IndexMap<String, String>,
    #[serde(rename = "Children", default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<JsonNode>,
}

fn is_zero(v: &u8) -> bool {
    *v == 0
}

fn to_arena_node(json: &JsonNode) -> Node {
    let mut node = Node::new(json.kind.clone(), json.id.clone());
    node.heading_level = json.heading_level;
    node.data = json.data.clone();
    for (k, v) in &json.properties {
        node.ial.insert(k.clone(), v.clone());
    }
    if !json.id.is_empty() {
        node.ial.insert("id".to_string(), json.id.clone());
    }
    node
}

/// Parse `.sy` content into a tree. The root must be a Document node.
pub fn parse_tree(content: &str, box_id: &str, path: &str) -> Result<Tree> {
    let corrupted = |reason: String| StrataError::Corrupted {
        path: Path::new(path).to_path_buf(),
        reason,
    };

    let root: JsonNode =
        serde_json::from_str(content).map_err(|e| corrupted(format!("invalid JSON: {e}")))?;
    if root.kind != NodeType::Document {
        return Err(corrupted(format!(
            "root is {}, not a document",
            root.kind.as_str()
        )));
    }
    if let Some(stem) = id::id_from_tree_path(path)
        && stem != root.id
    {
        return Err(corrupted(format!("root id {} does not match file name", root.id)));
    }

    let mut tree = Tree::new(&root.id, box_id, path);
    let root_key = tree.root();
    *tree.node_mut(root_key) = to_arena_node(&root);

    let mut pending: Vec<(&JsonNode, NodeKey)> = vec![(&root, root_key)];
    while let Some((json, key)) = pending.pop() {
        for child in &json.children {
            let child_key = tree.alloc(to_arena_node(child));
            tree.append_child(key, child_key);
            pending.push((child, child_key));
        }
    }
    Ok(tree)
}

fn to_json_node(tree: &Tree, key: NodeKey) -> JsonNode {
    let node = tree.node(key);
    JsonNode {
        id: node.id.clone(),
        kind: node.kind.clone(),
        heading_level: node.heading_level,
        data: node.data.clone(),
        properties: node.ial.clone(),
        children: tree
            .children(key)
            .into_iter()
            .map(|c| to_json_node(tree, c))
            .collect(),
    }
}

/// Render a tree as tab-indented JSON.
pub fn render_tree(tree: &Tree) -> Result<String> {
    let json = to_json_node(tree, tree.root());
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    json.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Serialize a tree as its nested node structure, for embedding in other
/// serde output.
pub fn serialize_tree<S: serde::Serializer>(tree: &Tree, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    to_json_node(tree, tree.root()).serialize(serializer)
}
