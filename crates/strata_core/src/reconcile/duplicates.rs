//! Duplicate removal: index roots (phase 1), node ids on disk (phase 2) and
//! reference rows (phase 5).

use std::collections::{HashMap, HashSet};

use chrono::NaiveDateTime;
use log::{error, info, warn};

use super::{IdsUnique, ReconcileReport, ReconcilerService, RefsDeduplicated, RootsDeduplicated, SqlIndexFixed};
use crate::error::StrataError;
use crate::fs::FileSystem;
use crate::id;
use crate::sql::IndexTable;
use crate::tree::store::tree_dir;
use crate::tree::{NodeType, Tree};

/// What phase 2 has to do with a tree after scanning its ids.
#[derive(Debug, PartialEq, Eq)]
enum IdScan {
    Clean,
    /// Some ids were replaced in memory; the file must be rewritten.
    Rewrite,
    /// The root id was seen before; the whole tree gets a new identity.
    Recreate,
}

/// Mint an id nobody in this run has used yet.
fn mint_unseen(seen: &mut HashSet<String>) -> String {
    loop {
        let fresh = id::new_node_id();
        if seen.insert(fresh.clone()) {
            return fresh;
        }
    }
}

/// Walk a tree's blocks against the run-wide `seen` set, replacing empty and
/// duplicated ids. Stops at a duplicated root id without touching anything.
fn scan_ids(tree: &mut Tree, seen: &mut HashSet<String>, report: &mut ReconcileReport) -> IdScan {
    let mut outcome = IdScan::Clean;
    for key in tree.walk() {
        let node = tree.node(key);
        if !node.kind.is_block() {
            continue;
        }
        if node.id.is_empty() {
            let fresh = mint_unseen(seen);
            tree.set_id(key, &fresh);
            report.ids_minted += 1;
            outcome = IdScan::Rewrite;
            continue;
        }
        if seen.insert(node.id.clone()) {
            continue;
        }
        if node.kind == NodeType::Document {
            return IdScan::Recreate;
        }
        let fresh = mint_unseen(seen);
        tree.set_id(key, &fresh);
        report.ids_reset += 1;
        outcome = IdScan::Rewrite;
    }
    outcome
}

/// Give a tree a brand new identity: new ids everywhere, refs between its
/// own blocks remapped, title and path following the new root id.
pub(super) fn reset_tree(tree: &mut Tree, seen: &mut HashSet<String>) {
    let mut remap: HashMap<String, String> = HashMap::new();
    for key in tree.walk() {
        let node = tree.node(key);
        if !node.kind.is_block() || node.id.is_empty() {
            continue;
        }
        let old = node.id.clone();
        let fresh = mint_unseen(seen);
        tree.set_id(key, &fresh);
        remap.insert(old, fresh);
    }

    for key in tree.walk() {
        let node = tree.node(key);
        if node.kind != NodeType::BlockRef {
            continue;
        }
        if let Some(target) = node.attr("ref-id").and_then(|r| remap.get(r)).cloned() {
            tree.set_attr(key, "ref-id", &target);
        }
    }

    let suffix = match id::time_from_id(&tree.id).and_then(id::parse_updated) {
        Some(t) => format_suffix(t),
        None => format!("(Duplicated {})", chrono::Local::now().format("%Y-%m-%d %H:%M:%S")),
    };
    let root = tree.root();
    let title = format!("{} {}", tree.title(), suffix);
    tree.set_attr(root, "title", title.trim_start());
    tree.hpath = format!("{} {}", tree.hpath, suffix);

    let dir = tree_dir(&tree.path);
    tree.path = if dir == "/" {
        format!("/{}.sy", tree.id)
    } else {
        format!("{}/{}.sy", dir, tree.id)
    };
}

fn format_suffix(t: NaiveDateTime) -> String {
    format!("({})", t.format("%Y-%m-%d %H:%M:%S"))
}

impl<FS: FileSystem> ReconcilerService<FS> {
    /// Phase 1: drop queryable-index roots that have duplicated rows. Phase 4
    /// re-indexes them from the trees.
    pub(super) fn dedupe_index_roots(&self, report: &mut ReconcileReport) -> RootsDeduplicated {
        let sql = self.queue.sql();
        let mut duplicated = match sql.duplicated_root_ids(IndexTable::Blocks) {
            Ok(ids) => ids,
            Err(e) => {
                error!("Querying duplicated roots failed: {}", e);
                Vec::new()
            }
        };
        if duplicated.is_empty() {
            duplicated = match sql.duplicated_root_ids(IndexTable::Refs) {
                Ok(ids) => ids,
                Err(e) => {
                    error!("Querying duplicated ref roots failed: {}", e);
                    Vec::new()
                }
            };
        }
        if duplicated.is_empty() {
            return RootsDeduplicated(());
        }

        let present: HashSet<String> = match sql.blocks_by_ids(&duplicated) {
            Ok(rows) => rows.into_iter().map(|b| b.id).collect(),
            Err(e) => {
                error!("Looking up {} duplicated roots failed: {}", duplicated.len(), e);
                return RootsDeduplicated(());
            }
        };
        let mut to_remove = Vec::new();
        for root_id in duplicated {
            if self.exiting() {
                break;
            }
            if present.contains(&root_id) && !to_remove.contains(&root_id) {
                to_remove.push(root_id);
            }
        }

        if !to_remove.is_empty() {
            warn!(
                "{} trees have duplicated index rows, re-indexing them",
                to_remove.len()
            );
            report.duplicate_index_roots += to_remove.len();
            self.queue.batch_remove_roots(to_remove);
        }
        RootsDeduplicated(())
    }

    /// Phase 2: make every node id unique across the workspace.
    pub(super) fn reset_duplicate_ids(&self, _: RootsDeduplicated, report: &mut ReconcileReport) -> IdsUnique {
        let notebooks = match self.store.notebooks() {
            Ok(boxes) => boxes,
            Err(e) => {
                error!("Listing notebooks failed: {}", e);
                return IdsUnique(());
            }
        };

        let mut seen: HashSet<String> = HashSet::new();
        for notebook in notebooks.iter().filter(|n| n.is_open()) {
            if self.exiting() {
                break;
            }
            let mut paths = match self.store.tree_paths(&notebook.id) {
                Ok(p) => p,
                Err(e) => {
                    error!("Listing trees of box {} failed: {}", notebook.id, e);
                    continue;
                }
            };

            let mut i = 0;
            while i < paths.len() {
                if self.exiting() {
                    break;
                }
                let path = paths[i].clone();
                i += 1;
                if let Some((old_prefix, new_prefix)) =
                    self.reset_tree_ids(&notebook.id, &path, &mut seen, report)
                {
                    // Children moved with the renamed folder; keep walking them
                    for p in paths[i..].iter_mut() {
                        if let Some(rest) = p.strip_prefix(&old_prefix) {
                            *p = format!("{new_prefix}{rest}");
                        }
                    }
                }
            }
        }
        IdsUnique(())
    }

    /// Check one tree file. Returns `(old, new)` folder prefixes when the
    /// tree was recreated and its child folder renamed.
    fn reset_tree_ids(
        &self,
        box_id: &str,
        path: &str,
        seen: &mut HashSet<String>,
        report: &mut ReconcileReport,
    ) -> Option<(String, String)> {
        if id::id_from_tree_path(path).is_none() {
            warn!("Invalid tree file name {}{}", box_id, path);
            self.quarantine(box_id, path, report);
            return None;
        }

        let mut tree = match self.store.load_tree(box_id, path) {
            Ok(t) => t,
            Err(StrataError::Corrupted { reason, .. }) => {
                warn!("Corrupted tree {}{}: {}", box_id, path, reason);
                self.quarantine(box_id, path, report);
                return None;
            }
            Err(e) => {
                error!("Loading tree {}{} failed: {}", box_id, path, e);
                return None;
            }
        };

        match scan_ids(&mut tree, seen, report) {
            IdScan::Clean => None,
            IdScan::Rewrite => {
                warn!("Duplicate ids in tree {}{}, resetting them", box_id, path);
                let root = tree.root();
                tree.set_attr(root, "updated", &id::now_timestamp());
                match self.store.write_tree(&mut tree) {
                    Ok(()) => {
                        report.trees_rewritten += 1;
                        self.blocktree.reindex_tree(&tree);
                        self.queue.upsert(&tree);
                    }
                    Err(e) => error!("Writing tree {} failed: {}", path, e),
                }
                None
            }
            IdScan::Recreate => {
                warn!("Tree id {} used more than once, recreating {}{}", tree.id, box_id, path);
                self.recreate_tree(tree, seen, report)
            }
        }
    }

    fn recreate_tree(
        &self,
        mut tree: Tree,
        seen: &mut HashSet<String>,
        report: &mut ReconcileReport,
    ) -> Option<(String, String)> {
        let old_id = tree.id.clone();
        let old_path = tree.path.clone();
        reset_tree(&mut tree, seen);
        let root = tree.root();
        tree.set_attr(root, "updated", &id::now_timestamp());

        if let Err(e) = self.store.write_tree(&mut tree) {
            error!("Writing recreated tree {} failed: {}", tree.path, e);
            return None;
        }
        report.trees_recreated += 1;

        let dir = tree_dir(&old_path);
        let base = if dir == "/" { String::new() } else { dir.to_string() };
        let old_prefix = format!("{base}/{old_id}/");
        let new_prefix = format!("{base}/{}/", tree.id);
        let renamed = match self.store.rename_child_dir(&tree.box_id, dir, &old_id, &tree.id) {
            Ok(renamed) => renamed,
            Err(e) => {
                warn!("Renaming child folder of {} failed: {}", old_path, e);
                false
            }
        };
        if let Err(e) = self.store.remove_tree(&tree.box_id, &old_path) {
            warn!("Removing {} failed: {}", old_path, e);
        }

        self.blocktree.remove_by_path(&tree.box_id, &old_path);
        self.queue.remove_path_prefix(&tree.box_id, &old_path);
        if renamed {
            self.blocktree.remove_by_path_prefix(&tree.box_id, &old_prefix);
            self.queue.remove_path_prefix(&tree.box_id, &old_prefix);
        }
        self.blocktree.reindex_tree(&tree);
        self.queue.upsert(&tree);
        info!("Recreated tree {} as {}", old_id, tree.id);

        renamed.then_some((old_prefix, new_prefix))
    }

    fn quarantine(&self, box_id: &str, path: &str, report: &mut ReconcileReport) {
        match self.store.quarantine(box_id, path) {
            Ok(_) => {
                report.quarantined += 1;
                self.blocktree.remove_by_path(box_id, path);
                self.queue.remove_path_prefix(box_id, path);
            }
            Err(e) => error!("Quarantining {}{} failed: {}", box_id, path, e),
        }
    }

    /// Phase 5: re-derive refs rows for roots whose refs are duplicated.
    pub(super) fn dedupe_refs(&self, _: SqlIndexFixed, report: &mut ReconcileReport) -> RefsDeduplicated {
        let duplicated = match self.queue.sql().duplicated_root_ids(IndexTable::Refs) {
            Ok(ids) => ids,
            Err(e) => {
                error!("Querying duplicated refs failed: {}", e);
                return RefsDeduplicated(());
            }
        };
        for root_id in duplicated {
            if self.exiting() {
                break;
            }
            let Some(entry) = self.blocktree.get(&root_id) else {
                self.queue.remove_root(&root_id);
                continue;
            };
            match self.store.load_tree(&entry.box_id, &entry.path) {
                Ok(tree) => {
                    self.queue.refresh_refs(&tree);
                    report.refs_refreshed += 1;
                }
                Err(e) => error!("Loading tree {} failed: {}", entry.path, e),
            }
        }
        RefsDeduplicated(())
    }
}
