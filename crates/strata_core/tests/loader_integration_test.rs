//! Integration tests for windowed document loading
//!
//! Documents are saved through the public API, then loaded in every mode the
//! way an editor pages through them.

mod common;

#[cfg(test)]
mod loader_tests {
    use strata_core::StrataError;
    use strata_core::loader::{DocRequest, DocWindow, LoadMode, SEARCH_MARK, VIRTUAL_REF_MARK};
    use strata_core::tree::{NodeKey, NodeType, Tree};

    use crate::common::*;

    /// Document `nid(1)` with `n` paragraphs `nid(100)..`.
    fn long_doc(n: u32) -> (Tree, Vec<String>) {
        let mut tree = doc(&nid(1), "Long");
        let ids: Vec<String> = (0..n).map(|i| nid(100 + i)).collect();
        for (i, id) in ids.iter().enumerate() {
            para(&mut tree, id, &format!("paragraph {i}"));
        }
        (tree, ids)
    }

    fn assert_contiguous(window: &DocWindow, all: &[String]) {
        let got = window.block_ids();
        if got.is_empty() {
            return;
        }
        let start = all.iter().position(|id| *id == got[0]).unwrap();
        assert_eq!(got.as_slice(), &all[start..start + got.len()]);
    }

    fn first_block(window: &DocWindow) -> NodeKey {
        window.blocks.first_child(window.blocks.root()).unwrap()
    }

    #[test]
    fn test_doc_window_is_bounded_and_contiguous() {
        let (_fs, strata) = memory_strata();
        let (mut tree, ids) = long_doc(100);
        save(&strata, &mut tree);

        let window = strata
            .loader()
            .load_doc(&DocRequest::new(nid(1)).size(10))
            .unwrap();
        assert_eq!(window.kind, NodeType::Document);
        assert_eq!(window.root_id, nid(1));
        assert_eq!(window.box_id, BOX);
        assert_eq!(window.block_count, 100);
        assert!(!window.eof);
        // one past the budget of ten
        assert_eq!(window.block_ids().len(), 11);
        assert_eq!(window.block_ids()[0], ids[0]);
        assert_contiguous(&window, &ids);
    }

    #[test]
    fn test_paging_down_covers_whole_document() {
        let (_fs, strata) = memory_strata();
        let (mut tree, ids) = long_doc(100);
        save(&strata, &mut tree);
        let loader = strata.loader();

        let mut window = loader.load_doc(&DocRequest::new(nid(1)).size(10)).unwrap();
        let mut seen = window.block_ids();
        while !window.eof {
            let last = seen.last().unwrap().clone();
            window = loader
                .load_doc(&DocRequest::new(last).mode(LoadMode::Down).size(10))
                .unwrap();
            assert!(window.block_ids().len() <= 11);
            assert_contiguous(&window, &ids);
            seen.extend(window.block_ids());
        }
        assert_eq!(seen, ids);
    }

    #[test]
    fn test_up_returns_all_preceding_siblings() {
        let (_fs, strata) = memory_strata();
        let mut tree = doc(&nid(1), "Short");
        for i in 2..=5 {
            para(&mut tree, &nid(i), "text");
        }
        save(&strata, &mut tree);

        let window = strata
            .loader()
            .load_doc(&DocRequest::new(nid(5)).mode(LoadMode::Up).size(5))
            .unwrap();
        assert_eq!(window.block_ids(), vec![nid(2), nid(3), nid(4)]);
        assert!(window.eof);
    }

    #[test]
    fn test_end_and_both_modes() {
        let (_fs, strata) = memory_strata();
        let (mut tree, ids) = long_doc(20);
        save(&strata, &mut tree);
        let loader = strata.loader();

        let end = loader
            .load_doc(&DocRequest::new(nid(1)).mode(LoadMode::End).size(3))
            .unwrap();
        assert!(end.eof);
        assert_eq!(end.block_ids(), ids[16..].to_vec());

        let both = loader
            .load_doc(&DocRequest::new(ids[10].clone()).mode(LoadMode::Both).size(6))
            .unwrap();
        // three before and through the focus, then three after
        assert_eq!(both.block_ids(), ids[7..14].to_vec());
        assert!(!both.eof);
    }

    #[test]
    fn test_folded_section_is_hidden_unless_focused() {
        let (_fs, strata) = memory_strata();
        let mut tree = doc(&nid(1), "Folds");
        heading(&mut tree, &nid(2), 2, "Hidden section", true);
        para(&mut tree, &nid(3), "inside one");
        para(&mut tree, &nid(4), "inside two");
        heading(&mut tree, &nid(5), 2, "Open section", false);
        para(&mut tree, &nid(6), "outside");
        save(&strata, &mut tree);
        let loader = strata.loader();

        let outside = loader.load_doc(&DocRequest::new(nid(1)).size(10)).unwrap();
        assert_eq!(outside.block_ids(), vec![nid(2), nid(5), nid(6)]);
        assert!(outside.eof);

        let inside = loader
            .load_doc(&DocRequest::new(nid(3)).mode(LoadMode::Both).size(10))
            .unwrap();
        assert_eq!(inside.block_ids(), vec![nid(2), nid(3), nid(4), nid(5), nid(6)]);

        let past = loader
            .load_doc(&DocRequest::new(nid(2)).mode(LoadMode::Down).size(10))
            .unwrap();
        assert_eq!(past.block_ids(), vec![nid(5), nid(6)]);
    }

    #[test]
    fn test_unknown_id_errors_depend_on_mode() {
        let (_fs, strata) = memory_strata();
        let loader = strata.loader();

        let err = loader.load_doc(&DocRequest::new(nid(42))).unwrap_err();
        assert!(matches!(err, StrataError::TreeNotFound(_)));
        let err = loader
            .load_doc(&DocRequest::new(nid(42)).mode(LoadMode::Down))
            .unwrap_err();
        assert!(matches!(err, StrataError::BlockNotFound(_)));
    }

    #[test]
    fn test_ref_counts_and_dynamic_anchors() {
        let (_fs, strata) = memory_strata();
        let mut target = doc(&nid(1), "Target doc");
        para(&mut target, &nid(2), "Target text");
        save(&strata, &mut target);

        let mut source = doc(&nid(3), "Source doc");
        let p = para(&mut source, &nid(4), "");
        block_ref(&mut source, p, &nid(2), "");
        save(&strata, &mut source);
        let loader = strata.loader();

        let window = loader.load_doc(&DocRequest::new(nid(1))).unwrap();
        let block = window.blocks.node(first_block(&window));
        assert_eq!(block.id, nid(2));
        assert_eq!(block.attr("refcount"), Some("1"));

        let window = loader.load_doc(&DocRequest::new(nid(3))).unwrap();
        let para_key = first_block(&window);
        let anchor = window.blocks.first_child(para_key).unwrap();
        let anchor = window.blocks.node(anchor);
        assert_eq!(anchor.kind, NodeType::BlockRef);
        assert_eq!(anchor.data, "Target text");
        assert_eq!(anchor.attr("subtype"), Some("d"));

        // The stored tree keeps its empty anchor
        let stored = strata.tree_of_block(&nid(4)).unwrap();
        let stored_ref = stored.first_child(stored.find_by_id(&nid(4)).unwrap()).unwrap();
        assert!(stored.node(stored_ref).data.is_empty());
    }

    #[test]
    fn test_search_marks_stay_inside_requested_subtree() {
        let (_fs, strata) = memory_strata();
        let mut tree = doc(&nid(1), "Haystack");
        para(&mut tree, &nid(2), "find the Needle here");
        para(&mut tree, &nid(3), "another needle");
        save(&strata, &mut tree);
        let loader = strata.loader();

        let window = loader
            .load_doc(&DocRequest::new(nid(1)).query("needle"))
            .unwrap();
        let pieces = window.blocks.children(first_block(&window));
        assert_eq!(pieces.len(), 3);
        let mark = window.blocks.node(pieces[1]);
        assert_eq!(mark.kind, NodeType::TextMark);
        assert_eq!(mark.data, "Needle");
        assert_eq!(mark.attr("data-type"), Some(SEARCH_MARK));

        let below = loader
            .load_doc(&DocRequest::new(nid(2)).mode(LoadMode::Down).query("needle"))
            .unwrap();
        assert_eq!(below.block_ids(), vec![nid(3)]);
        let pieces = below.blocks.children(first_block(&below));
        assert_eq!(pieces.len(), 1);
        assert_eq!(below.blocks.node(pieces[0]).kind, NodeType::Text);
    }

    #[test]
    fn test_virtual_refs_mark_document_titles() {
        let (_fs, strata) = memory_strata_with(|c| c.editor.virtual_block_ref = true);
        let mut named = doc(&nid(10), "Ferris");
        para(&mut named, &nid(11), "the crab");
        save(&strata, &mut named);

        let mut journal = doc(&nid(12), "Journal");
        para(&mut journal, &nid(13), "met Ferris today");
        save(&strata, &mut journal);

        let window = strata.loader().load_doc(&DocRequest::new(nid(12))).unwrap();
        let pieces = window.blocks.children(first_block(&window));
        let marks: Vec<_> = pieces
            .iter()
            .map(|k| window.blocks.node(*k))
            .filter(|n| n.kind == NodeType::TextMark)
            .collect();
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].data, "Ferris");
        assert_eq!(marks[0].attr("data-type"), Some(VIRTUAL_REF_MARK));
    }

    #[test]
    fn test_range_reload_and_fallback() {
        let (_fs, strata) = memory_strata();
        let mut tree = doc(&nid(1), "Range");
        for i in 2..=7 {
            para(&mut tree, &nid(i), "");
        }
        save(&strata, &mut tree);
        let mut other = doc(&nid(20), "Elsewhere");
        para(&mut other, &nid(21), "");
        save(&strata, &mut other);
        let loader = strata.loader();

        let window = loader.load_range(&nid(3), &nid(6), "").unwrap().unwrap();
        assert_eq!(window.block_ids(), vec![nid(3), nid(4), nid(5), nid(6)]);
        assert_eq!(window.index_start, 3);
        assert!(!window.eof);

        assert!(loader.load_range(&nid(6), &nid(3), "").unwrap().is_none());
        assert!(loader.load_range(&nid(3), &nid(21), "").unwrap().is_none());

        let req = DocRequest::new(nid(3)).mode(LoadMode::Down).size(2);
        let fallback = loader.load_doc_window(&req, Some(&nid(21))).unwrap();
        assert_eq!(fallback.block_ids()[0], nid(4));
        let reused = loader.load_doc_window(&req, Some(&nid(7))).unwrap();
        assert_eq!(reused.block_ids().len(), 5);
        assert!(reused.eof);
    }

    #[test]
    fn test_window_serializes_for_editors() {
        let (_fs, strata) = memory_strata();
        let (mut tree, _) = long_doc(3);
        save(&strata, &mut tree);

        let window = strata.loader().load_doc(&DocRequest::new(nid(1))).unwrap();
        let json = serde_json::to_value(&window).unwrap();
        assert_eq!(json["type"], "NodeDocument");
        assert_eq!(json["blocks"]["Type"], "NodeDocument");
        assert_eq!(json["blocks"]["Children"].as_array().unwrap().len(), 3);
        assert_eq!(json["eof"], true);
    }
}
