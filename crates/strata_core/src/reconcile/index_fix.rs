//! Index repair: identity index from the filesystem (phase 3), queryable
//! index from the identity index (phase 4).

use std::collections::HashSet;

use chrono::Duration;
use log::{debug, error, info, warn};

use super::{BlockTreeFixed, IdsUnique, ReconcileReport, ReconcilerService, SqlIndexFixed};
use crate::fs::FileSystem;
use crate::id;

/// Whether the queryable index copy of a root lags the identity index by more
/// than `tolerance_minutes`. Unparseable values count as stale unless both
/// sides agree.
pub(super) fn is_stale(db_updated: &str, bt_updated: &str, tolerance_minutes: i64) -> bool {
    if bt_updated.is_empty() {
        return true;
    }
    if db_updated == bt_updated {
        return false;
    }
    let Some(db) = id::parse_updated(db_updated) else {
        return true;
    };
    match id::parse_updated(bt_updated) {
        Some(bt) => db < bt - Duration::minutes(tolerance_minutes),
        None => true,
    }
}

impl<FS: FileSystem> ReconcilerService<FS> {
    /// Phase 3: drop identity entries whose file is gone, index files the
    /// identity index does not know, and purge closed or removed boxes.
    pub(super) fn fix_blocktree(&self, _: IdsUnique, report: &mut ReconcileReport) -> BlockTreeFixed {
        let notebooks = match self.store.notebooks() {
            Ok(boxes) => boxes,
            Err(e) => {
                error!("Listing notebooks failed: {}", e);
                return BlockTreeFixed(());
            }
        };

        for notebook in notebooks.iter().filter(|n| n.is_open()) {
            if self.exiting() {
                return BlockTreeFixed(());
            }
            let on_disk = match self.store.tree_paths(&notebook.id) {
                Ok(p) => p,
                Err(e) => {
                    error!("Listing trees of box {} failed: {}", notebook.id, e);
                    continue;
                }
            };

            let stale = self.blocktree.clear_redundant(&notebook.id, &on_disk);
            for path in &stale {
                debug!("Dropping stale identity path {}{}", notebook.id, path);
                self.queue.remove_path_prefix(&notebook.id, path);
            }
            report.stale_paths_removed += stale.len();

            let missing: Vec<String> = self
                .blocktree
                .missing_paths(&notebook.id, &on_disk)
                .into_iter()
                .filter(|p| id::id_from_tree_path(p).is_some())
                .collect();
            if missing.is_empty() {
                continue;
            }
            info!("Indexing {} trees missing from box {}", missing.len(), notebook.id);
            let size = missing.len();
            for (i, path) in missing.iter().enumerate() {
                if self.exiting() {
                    return BlockTreeFixed(());
                }
                match self.store.load_tree(&notebook.id, path) {
                    Ok(mut tree) => {
                        self.reindex(&mut tree, i, size, report);
                        report.missing_paths_indexed += 1;
                    }
                    Err(e) => warn!("Loading tree {}{} failed: {}", notebook.id, path, e),
                }
            }
        }

        let open: HashSet<&str> = notebooks
            .iter()
            .filter(|n| n.is_open())
            .map(|n| n.id.as_str())
            .collect();
        let mut purge: Vec<String> = self
            .blocktree
            .box_ids()
            .into_iter()
            .filter(|b| !open.contains(b.as_str()))
            .collect();
        purge.sort();
        for box_id in purge {
            let removed = self.blocktree.remove_by_box(&box_id);
            self.queue.remove_path_prefix(&box_id, "/");
            info!("Purged {} identity entries of closed box {}", removed, box_id);
            report.boxes_purged += 1;
        }
        BlockTreeFixed(())
    }

    /// Phase 4: re-index trees missing from or stale in the queryable index,
    /// and drop index roots no tree backs.
    pub(super) fn fix_sql_index(&self, _: BlockTreeFixed, report: &mut ReconcileReport) -> SqlIndexFixed {
        let db_updated = match self.queue.sql().root_updated() {
            Ok(map) => map,
            Err(e) => {
                error!("Reading index roots failed: {}", e);
                return SqlIndexFixed(());
            }
        };

        let roots = self.blocktree.root_entries();
        let tolerance = self.config.staleness_tolerance_minutes;
        let stale: Vec<_> = roots
            .iter()
            .filter(|e| {
                db_updated
                    .get(&e.id)
                    .is_none_or(|db| is_stale(db, &e.updated, tolerance))
            })
            .collect();
        if !stale.is_empty() {
            info!("Re-indexing {} stale trees", stale.len());
        }

        let size = stale.len();
        for (i, entry) in stale.into_iter().enumerate() {
            if self.exiting() {
                return SqlIndexFixed(());
            }
            match self.store.load_tree(&entry.box_id, &entry.path) {
                Ok(mut tree) => {
                    self.reindex(&mut tree, i, size, report);
                    report.trees_reindexed += 1;
                }
                Err(e) if e.is_not_found() => {
                    warn!("Identity entry {} points at missing {}", entry.id, entry.path);
                    self.blocktree.remove_by_root(&entry.id);
                    self.queue.remove_root(&entry.id);
                }
                Err(e) => error!("Loading tree {} failed: {}", entry.path, e),
            }
        }

        let known: HashSet<&str> = roots.iter().map(|e| e.id.as_str()).collect();
        let mut orphans: Vec<String> = db_updated
            .into_keys()
            .filter(|root_id| !known.contains(root_id.as_str()))
            .collect();
        if !orphans.is_empty() {
            orphans.sort();
            warn!("Removing {} orphan roots from the queryable index", orphans.len());
            report.orphan_roots_removed += orphans.len();
            self.queue.batch_remove_roots(orphans);
        }
        SqlIndexFixed(())
    }
}
