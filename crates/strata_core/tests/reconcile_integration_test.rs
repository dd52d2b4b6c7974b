//! Integration tests for index reconciliation
//!
//! Each test damages a workspace the way a crash or an external edit would,
//! runs the reconciler once and checks the tree files and both indexes.

mod common;

#[cfg(test)]
mod reconcile_tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    use strata_core::Strata;
    use strata_core::config::Config;
    use strata_core::events::IndexEvent;
    use strata_core::fs::{FileSystem, RealFileSystem};
    use strata_core::id;
    use strata_core::sql::{IndexTable, SqlIndex};

    use crate::common::*;

    fn assert_ids_unique<FS: FileSystem>(strata: &Strata<FS>) {
        let ids = disk_ids(strata);
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len(), "duplicated ids on disk: {ids:?}");
    }

    fn assert_indexes_agree<FS: FileSystem>(strata: &Strata<FS>) {
        let identity: HashMap<String, String> = strata.blocktree().root_updated().into_iter().collect();
        let sql = strata.queue().sql().root_updated().unwrap();
        assert_eq!(identity, sql);
    }

    #[test]
    fn test_duplicate_sibling_paragraph_is_reset() {
        let (_fs, strata) = memory_strata();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        strata.events().subscribe(Arc::new(move |e: &IndexEvent| {
            sink.lock().unwrap().push(e.clone());
        }));

        let mut tree = doc(&nid(1), "Notes");
        para(&mut tree, &nid(2), "first");
        para(&mut tree, &nid(2), "second");
        write_only(&strata, &mut tree);

        let report = strata.reconciler().start().unwrap();
        assert_eq!(report.ids_reset, 1);
        assert_eq!(report.trees_rewritten, 1);
        assert!(report.failed_phases.is_empty());

        let reloaded = strata.store().load_tree(BOX, &tree.path).unwrap();
        let children = reloaded.children(reloaded.root());
        assert_eq!(reloaded.node(children[0]).id, nid(2));
        let fresh = reloaded.node(children[1]).id.clone();
        assert_ne!(fresh, nid(2));
        assert!(id::is_node_id(&fresh));

        // Both paragraphs are findable through both indexes
        assert_eq!(strata.get_block(&fresh).unwrap().root_id, nid(1));
        let rows = strata.queue().sql().blocks_by_root(&nid(1)).unwrap();
        assert_eq!(rows.len(), 3);
        assert_ids_unique(&strata);
        assert_indexes_agree(&strata);

        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, IndexEvent::ReloadUi)));
        assert!(events.iter().any(|e| matches!(e, IndexEvent::Notice { .. })));
    }

    #[test]
    fn test_orphan_sql_root_is_removed() {
        let (_fs, strata) = memory_strata();
        let mut kept = doc(&nid(1), "Kept");
        para(&mut kept, &nid(2), "still here");
        save(&strata, &mut kept);

        let mut ghost = doc(&nid(90), "Ghost");
        para(&mut ghost, &nid(91), "deleted elsewhere");
        strata.queue().upsert(&ghost);
        strata.queue().wait_drained().unwrap();

        let report = strata.reconciler().start().unwrap();
        assert_eq!(report.orphan_roots_removed, 1);
        assert_eq!(report.disk_mutations(), 0);
        assert!(strata.queue().sql().blocks_by_root(&nid(90)).unwrap().is_empty());
        assert_eq!(strata.queue().sql().blocks_by_root(&nid(1)).unwrap().len(), 2);
        assert_indexes_agree(&strata);
    }

    #[test]
    fn test_unindexed_and_deleted_trees_are_picked_up() {
        let (_fs, strata) = memory_strata();
        let mut saved = doc(&nid(1), "Saved");
        para(&mut saved, &nid(2), "indexed");
        save(&strata, &mut saved);

        let mut gone = doc(&nid(3), "Gone");
        para(&mut gone, &nid(4), "removed behind our back");
        save(&strata, &mut gone);
        strata.store().remove_tree(BOX, &gone.path).unwrap();

        let mut copied_in = doc(&nid(5), "Copied in");
        para(&mut copied_in, &nid(6), "never indexed");
        write_only(&strata, &mut copied_in);

        let report = strata.reconciler().start().unwrap();
        assert_eq!(report.stale_paths_removed, 1);
        assert_eq!(report.missing_paths_indexed, 1);

        assert!(strata.get_block(&nid(4)).is_err());
        assert!(strata.queue().sql().blocks_by_root(&nid(3)).unwrap().is_empty());
        assert_eq!(strata.get_block(&nid(6)).unwrap().path, copied_in.path);
        assert_indexes_agree(&strata);
    }

    #[test]
    fn test_duplicated_document_is_recreated_with_its_folder() {
        let (_fs, strata) = memory_strata();
        let (a, p, d) = (nid(1), nid(3), nid(4));

        let mut original = doc(&a, "Alpha");
        para(&mut original, &nid(2), "body");
        write_only(&strata, &mut original);

        let mut parent = doc(&p, "Parent");
        para(&mut parent, &nid(5), "intro");
        write_only(&strata, &mut parent);

        // A copy of Alpha nested under Parent, with a child of its own
        let mut copy = doc_at(&a, &format!("/{p}/{a}.sy"), "Alpha");
        para(&mut copy, &nid(2), "body");
        write_only(&strata, &mut copy);
        let mut child = doc_at(&d, &format!("/{p}/{a}/{d}.sy"), "Child");
        para(&mut child, &nid(6), "nested");
        write_only(&strata, &mut child);

        let report = strata.reconciler().start().unwrap();
        assert_eq!(report.trees_recreated, 1);
        assert!(report.failed_phases.is_empty());

        let paths = strata.store().tree_paths(BOX).unwrap();
        assert_eq!(paths.len(), 4);
        assert!(!paths.contains(&copy.path));
        let recreated = paths
            .iter()
            .find(|path| path.starts_with(&format!("/{p}/")) && path.matches('/').count() == 2)
            .unwrap();
        let new_id = id::id_from_tree_path(recreated).unwrap().to_string();
        assert_ne!(new_id, a);

        let tree = strata.store().load_tree(BOX, recreated).unwrap();
        assert!(tree.title().starts_with("Alpha ("));
        let moved_child = format!("/{p}/{new_id}/{d}.sy");
        assert!(paths.contains(&moved_child));
        assert_eq!(strata.get_block(&d).unwrap().path, moved_child);
        assert_eq!(strata.get_block(&a).unwrap().path, original.path);

        assert_ids_unique(&strata);
        assert_indexes_agree(&strata);
    }

    #[test]
    fn test_unreadable_files_are_quarantined() {
        let (fs, strata) = memory_strata();
        let layout = strata.store().layout();
        fs.write_file(&layout.tree_file(BOX, &format!("/{}.sy", nid(7))), "{ not json")
            .unwrap();
        fs.write_file(&layout.tree_file(BOX, "/notes.sy"), "{}").unwrap();
        // Well-formed, but the root id is not the file name
        let misnamed = format!(r#"{{"ID": "{}", "Type": "NodeDocument"}}"#, nid(9));
        fs.write_file(&layout.tree_file(BOX, &format!("/{}.sy", nid(8))), &misnamed)
            .unwrap();

        let report = strata.reconciler().start().unwrap();
        assert_eq!(report.quarantined, 3);
        assert!(strata.store().tree_paths(BOX).unwrap().is_empty());
        let moved: Vec<_> = fs
            .list_all_files()
            .into_iter()
            .filter(|f| f.starts_with(layout.corrupted_dir()))
            .collect();
        assert_eq!(moved.len(), 3);
        assert!(strata.get_block(&nid(9)).is_err());
    }

    #[test]
    fn test_second_run_is_clean_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path());
        config.reload_notice_delay_ms = 0;
        RealFileSystem
            .create_dir_all(&config.layout().box_dir(BOX))
            .unwrap();

        {
            let strata = Strata::open(RealFileSystem, config.clone()).unwrap();
            let mut dupes = doc(&nid(1), "Dupes");
            para(&mut dupes, &nid(2), "one");
            para(&mut dupes, &nid(2), "two");
            write_only(&strata, &mut dupes);

            let mut gone = doc(&nid(3), "Gone");
            para(&mut gone, &nid(4), "soon deleted");
            save(&strata, &mut gone);
            strata.store().remove_tree(BOX, &gone.path).unwrap();

            let mut fine = doc(&nid(5), "Fine");
            para(&mut fine, &nid(6), "untouched");
            save(&strata, &mut fine);

            let report = strata.reconciler().start().unwrap();
            assert!(!report.is_clean());
            strata.close().unwrap();
        }

        let strata = Strata::open(RealFileSystem, config).unwrap();
        assert!(strata.get_block(&nid(6)).is_ok());
        let report = strata.reconciler().start().unwrap();
        assert!(report.is_clean(), "{report:?}");
        assert_ids_unique(&strata);
        assert_indexes_agree(&strata);
        assert_eq!(
            strata.queue().sql().row_count(IndexTable::Blocks).unwrap(),
            strata.blocktree().len()
        );
    }

    #[test]
    fn test_duplicated_index_roots_are_rebuilt() {
        let (_fs, strata) = memory_strata();
        let mut tree = doc(&nid(1), "Twice");
        para(&mut tree, &nid(2), "indexed twice");
        save(&strata, &mut tree);

        // Rows for the same block under a second root
        let mut stray = doc(&nid(8), "Stray");
        para(&mut stray, &nid(2), "indexed twice");
        strata.queue().upsert(&stray);
        strata.queue().wait_drained().unwrap();

        let report = strata.reconciler().start().unwrap();
        assert!(report.duplicate_index_roots >= 1);
        assert!(strata.queue().sql().blocks_by_root(&nid(8)).unwrap().is_empty());
        assert_eq!(strata.queue().sql().blocks_by_root(&nid(1)).unwrap().len(), 2);
        assert_indexes_agree(&strata);
    }

    #[tokio::test]
    async fn test_spawned_run_with_background_flusher() {
        let (_fs, strata) = memory_strata_with(|c| c.flush_interval_ms = 10);
        let flusher = strata.spawn_flusher();

        let mut tree = doc(&nid(1), "Queued");
        para(&mut tree, &nid(2), "pending write");
        strata.save_tree(&mut tree).unwrap();

        let report = strata.reconciler().spawn().await.unwrap().unwrap();
        assert!(report.failed_phases.is_empty());
        assert!(strata.reconciler().spawn().await.unwrap().is_none());

        strata.shutdown_handle().signal();
        flusher.await.unwrap();
        assert_eq!(strata.queue().pending(), 0);
        assert_indexes_agree(&strata);
    }

    #[test]
    fn test_shutdown_before_start_leaves_workspace_untouched() {
        let (_fs, strata) = memory_strata();
        let mut tree = doc(&nid(1), "Dupes");
        para(&mut tree, &nid(2), "one");
        para(&mut tree, &nid(2), "two");
        write_only(&strata, &mut tree);

        strata.shutdown_handle().signal();
        let report = strata.reconciler().start().unwrap();
        assert!(report.is_clean(), "{report:?}");
        assert!(report.failed_phases.is_empty());
        assert!(strata.blocktree().is_empty());
        assert_eq!(disk_ids(&strata), vec![nid(1), nid(2), nid(2)]);
    }

    #[test]
    fn test_closed_box_is_purged_from_both_indexes() {
        let (fs, strata) = memory_strata();
        let mut tree = doc(&nid(1), "In a closing box");
        para(&mut tree, &nid(2), "soon hidden");
        save(&strata, &mut tree);

        let conf = strata.store().layout().box_conf(BOX);
        fs.write_file(&conf, r#"{"name":"Archive","closed":true}"#).unwrap();

        let report = strata.reconciler().start().unwrap();
        assert_eq!(report.boxes_purged, 1);
        assert_eq!(report.orphan_roots_removed, 0);
        assert!(strata.blocktree().is_empty());
        assert!(strata.queue().sql().blocks_by_root(&nid(1)).unwrap().is_empty());
        // The files themselves stay
        assert!(strata.store().exists(BOX, &tree.path));
    }

    #[test]
    fn test_missing_root_updated_is_derived_from_the_id() {
        let (fs, strata) = memory_strata();
        let path = format!("/{}.sy", nid(1));
        let content = format!(
            r#"{{"ID": "{root}", "Type": "NodeDocument", "Properties": {{"id": "{root}", "title": "Legacy"}},
               "Children": [{{"ID": "{child}", "Type": "NodeParagraph"}}]}}"#,
            root = nid(1),
            child = nid(2)
        );
        fs.write_file(&strata.store().layout().tree_file(BOX, &path), &content)
            .unwrap();

        let report = strata.reconciler().start().unwrap();
        assert_eq!(report.missing_paths_indexed, 1);
        assert_eq!(report.legacy_updated_fixed, 1);

        let binding = nid(1);
        let stamp = id::time_from_id(&binding).unwrap();
        let stored = strata.store().load_tree(BOX, &path).unwrap();
        assert_eq!(stored.root_node().attr("updated"), Some(stamp));
        assert_eq!(strata.queue().sql().root_updated().unwrap()[&nid(1)], stamp);
        assert_indexes_agree(&strata);
    }

    #[test]
    fn test_staleness_tolerance_boundaries() {
        // Identity index says 12:00:00; the queryable copy lags by `lag`
        let reindexed_with_lag = |lag: &str| {
            let (_fs, strata) = memory_strata();
            let mut tree = doc(&nid(1), "Edited");
            para(&mut tree, &nid(2), "body");
            save(&strata, &mut tree);
            strata
                .queue()
                .sql()
                .write(|tx| {
                    tx.execute("UPDATE blocks SET updated = ? WHERE id = ?", [lag, nid(1).as_str()])?;
                    Ok(())
                })
                .unwrap();
            strata.reconciler().start().unwrap().trees_reindexed
        };

        assert_eq!(reindexed_with_lag("20240101115000"), 0, "exactly ten minutes");
        assert_eq!(reindexed_with_lag("20240101115500"), 0, "five minutes");
        assert_eq!(reindexed_with_lag("20240101114959"), 1, "just past ten minutes");
        assert_eq!(reindexed_with_lag("20240101114500"), 1, "fifteen minutes");
    }

    #[test]
    fn test_in_memory_index_starts_empty() {
        let sql = SqlIndex::in_memory().unwrap();
        assert_eq!(sql.row_count(IndexTable::Blocks).unwrap(), 0);
        assert!(sql.root_updated().unwrap().is_empty());
    }
}
