//! Reloading a window whose boundaries are already known.

use log::debug;

use super::{DocRequest, DocWindow, Loader};
use crate::error::Result;
use crate::fs::FileSystem;
use crate::tree::walk::FoldMap;

impl<FS: FileSystem> Loader<FS> {
    /// The sibling run from `start_id` to `end_id`, both included.
    ///
    /// Returns `None` when `end_id` cannot be reached walking forward from
    /// `start_id`, e.g. because the window the ids came from is stale.
    pub fn load_range(&self, start_id: &str, end_id: &str, query: &str) -> Result<Option<DocWindow>> {
        self.queue.wait_drained()?;
        let tree = self.tree_of(start_id)?;
        let (Some(start), Some(end)) = (tree.find_by_id(start_id), tree.find_by_id(end_id)) else {
            return Ok(None);
        };
        let (start, end) = if tree.parent(start) == tree.parent(end) {
            (start, end)
        } else {
            (tree.doc_child(start), tree.doc_child(end))
        };
        let root = tree.root();
        if start == root || end == root {
            return Ok(None);
        }

        let folds = FoldMap::build(&tree);
        let mut nodes = Vec::new();
        let mut cursor = Some(start);
        loop {
            let Some(key) = cursor else {
                debug!("Range {}..{} is not contiguous", start_id, end_id);
                return Ok(None);
            };
            if key == end || !folds.skips(key, start) {
                nodes.push(key);
            }
            if key == end {
                break;
            }
            cursor = tree.next(key);
        }

        let index = tree
            .walk()
            .iter()
            .position(|k| *k == start)
            .map_or(0, |p| p + 1);
        let eof = tree.next(end).is_none();
        let window = self.assemble(&tree, &folds, nodes, start, start, query, eof, index)?;
        Ok(Some(window))
    }

    /// Load `req`, reusing the known window end when the range still holds.
    pub fn load_doc_window(&self, req: &DocRequest, end_id: Option<&str>) -> Result<DocWindow> {
        if let Some(end_id) = end_id {
            match self.load_range(&req.id, end_id, &req.query) {
                Ok(Some(window)) => return Ok(window),
                Ok(None) => debug!("Falling back to {} load for {}", req.mode, req.id),
                Err(e) if e.is_not_found() => debug!("Range start {} not found: {}", req.id, e),
                Err(e) => return Err(e),
            }
        }
        self.load_doc(req)
    }
}
