//! CLI handlers for reading blocks and windows

use strata_core::loader::{DocRequest, DocWindow, LoadMode};
use strata_core::sql::text_content;

use super::{CliStrata, print_json};

/// Characters of block text shown per line in text output.
const PREVIEW_CHARS: usize = 72;

/// Handle the load command
#[allow(clippy::too_many_arguments)]
pub fn handle_load(
    strata: &CliStrata,
    id: String,
    mode: LoadMode,
    size: Option<usize>,
    index: usize,
    query: String,
    end: Option<String>,
    json: bool,
) -> bool {
    let req = DocRequest {
        id,
        index,
        query,
        mode,
        size: size.unwrap_or(strata.config().default_window_size),
    };
    match strata.loader().load_doc_window(&req, end.as_deref()) {
        Ok(window) => output_window(&window, json),
        Err(e) => {
            eprintln!("✗ Failed to load {}: {}", req.id, e);
            false
        }
    }
}

/// Handle the range command
pub fn handle_range(strata: &CliStrata, start: &str, end: &str, query: &str, json: bool) -> bool {
    match strata.loader().load_range(start, end, query) {
        Ok(Some(window)) => output_window(&window, json),
        Ok(None) => {
            eprintln!("✗ {} is not reachable from {}", end, start);
            false
        }
        Err(e) => {
            eprintln!("✗ Failed to load range: {}", e);
            false
        }
    }
}

/// Handle the get command
pub fn handle_get(strata: &CliStrata, id: &str, json: bool) -> bool {
    let entry = match strata.get_block(id) {
        Ok(entry) => entry,
        Err(e) => {
            eprintln!("✗ {}", e);
            return false;
        }
    };
    if json {
        return print_json(&entry);
    }
    println!("id:      {}", entry.id);
    println!("type:    {}", entry.kind);
    println!("root:    {}", entry.root_id);
    println!("parent:  {}", entry.parent_id);
    println!("box:     {}", entry.box_id);
    println!("path:    {}", entry.path);
    println!("hpath:   {}", entry.hpath);
    println!("updated: {}", entry.updated);
    true
}

fn output_window(window: &DocWindow, json: bool) -> bool {
    if json {
        return print_json(window);
    }

    let tree = &window.blocks;
    println!(
        "{} ({}) blocks {}.. of {}{}",
        tree.hpath,
        window.root_id,
        window.index_start,
        window.block_count,
        if window.eof { ", end of document" } else { "" }
    );
    for key in tree.children(tree.root()) {
        let node = tree.node(key);
        let mut text = text_content(tree, key).replace('\n', " ");
        if text.chars().count() > PREVIEW_CHARS {
            text = text.chars().take(PREVIEW_CHARS).collect::<String>() + "…";
        }
        let refcount = node
            .attr("refcount")
            .map(|c| format!(" [{} refs]", c))
            .unwrap_or_default();
        println!("  {} {:<2} {}{}", node.id, node.kind.abbr(), text, refcount);
    }
    true
}
