//! Ordered write pipeline for the queryable index.
//!
//! Every write to the SQL index goes through [`TaskQueue`]. Pending operations
//! are coalesced (the latest upsert of a root wins, a removal cancels pending
//! upserts of that root) and flushed in one transaction. Readers that need to
//! see their own writes call [`TaskQueue::wait_drained`] first.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, warn};
use tokio::task::JoinHandle;

use crate::blocktree::BlockTree;
use crate::error::Result;
use crate::shutdown::Shutdown;
use crate::sql::{self, SqlIndex};
use crate::tree::Tree;

/// One pending index write.
#[derive(Debug, Clone)]
pub enum QueueOp {
    /// Replace all rows of a tree.
    Upsert(Tree),
    /// Remove all rows of a root.
    RemoveRoot(String),
    /// Remove all rows under a path prefix of a box.
    RemovePathPrefix { box_id: String, prefix: String },
    /// Remove several roots at once.
    BatchRemoveRoots(Vec<String>),
    /// Re-derive the refs rows of a tree.
    RefreshRefs(Tree),
}

impl QueueOp {
    /// Root this op rewrites, for coalescing.
    fn upserted_root(&self) -> Option<&Tree> {
        match self {
            QueueOp::Upsert(t) | QueueOp::RefreshRefs(t) => Some(t),
            _ => None,
        }
    }
}

pub struct TaskQueue {
    sql: Arc<SqlIndex>,
    blocktree: Arc<BlockTree>,
    ops: Mutex<Vec<QueueOp>>,
    flush_lock: Mutex<()>,
}

impl TaskQueue {
    pub fn new(sql: Arc<SqlIndex>, blocktree: Arc<BlockTree>) -> Self {
        Self {
            sql,
            blocktree,
            ops: Mutex::new(Vec::new()),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn sql(&self) -> &SqlIndex {
        &self.sql
    }

    /// Queue an op, dropping pending work it supersedes.
    pub fn push(&self, op: QueueOp) {
        let mut ops = self.ops.lock().unwrap();
        match &op {
            QueueOp::Upsert(tree) => {
                ops.retain(|o| !matches!(o, QueueOp::Upsert(t) if t.id == tree.id));
            }
            QueueOp::RefreshRefs(tree) => {
                ops.retain(|o| !matches!(o, QueueOp::RefreshRefs(t) if t.id == tree.id));
            }
            QueueOp::RemoveRoot(root_id) => {
                ops.retain(|o| o.upserted_root().is_none_or(|t| &t.id != root_id));
            }
            QueueOp::BatchRemoveRoots(root_ids) => {
                ops.retain(|o| o.upserted_root().is_none_or(|t| !root_ids.contains(&t.id)));
            }
            QueueOp::RemovePathPrefix { box_id, prefix } => {
                ops.retain(|o| {
                    o.upserted_root()
                        .is_none_or(|t| !(&t.box_id == box_id && t.path.starts_with(prefix.as_str())))
                });
            }
        }
        ops.push(op);
    }

    pub fn upsert(&self, tree: &Tree) {
        self.push(QueueOp::Upsert(tree.clone()));
    }

    pub fn remove_root(&self, root_id: &str) {
        self.push(QueueOp::RemoveRoot(root_id.to_string()));
    }

    pub fn remove_path_prefix(&self, box_id: &str, prefix: &str) {
        self.push(QueueOp::RemovePathPrefix {
            box_id: box_id.to_string(),
            prefix: prefix.to_string(),
        });
    }

    pub fn batch_remove_roots(&self, root_ids: Vec<String>) {
        if root_ids.is_empty() {
            return;
        }
        self.push(QueueOp::BatchRemoveRoots(root_ids));
    }

    pub fn refresh_refs(&self, tree: &Tree) {
        self.push(QueueOp::RefreshRefs(tree.clone()));
    }

    pub fn pending(&self) -> usize {
        self.ops.lock().unwrap().len()
    }

    /// Apply every pending op in one transaction. Returns the number of ops applied.
    ///
    /// A failing op rolls the whole batch back and puts it in front of
    /// anything queued meanwhile, so nothing is lost and order is kept.
    pub fn flush(&self) -> Result<usize> {
        let _guard = self.flush_lock.lock().unwrap();
        let ops = std::mem::take(&mut *self.ops.lock().unwrap());
        if ops.is_empty() {
            return Ok(0);
        }

        let count = ops.len();
        let written = self.sql.write(|tx| {
            for op in &ops {
                let applied = match op {
                    QueueOp::Upsert(tree) => sql::upsert_tree(tx, tree, &self.blocktree),
                    QueueOp::RemoveRoot(root_id) => sql::delete_by_root(tx, root_id),
                    QueueOp::RemovePathPrefix { box_id, prefix } => {
                        sql::delete_by_path_prefix(tx, box_id, prefix)
                    }
                    QueueOp::BatchRemoveRoots(root_ids) => root_ids
                        .iter()
                        .try_for_each(|root_id| sql::delete_by_root(tx, root_id)),
                    QueueOp::RefreshRefs(tree) => sql::refresh_refs(tx, tree, &self.blocktree),
                };
                if let Err(e) = applied {
                    warn!("Index write {} failed: {}", op_label(op), e);
                    return Err(e);
                }
            }
            Ok(())
        });
        if let Err(e) = written {
            let mut pending = self.ops.lock().unwrap();
            let newer = std::mem::replace(&mut *pending, ops);
            pending.extend(newer);
            return Err(e);
        }
        debug!("Flushed {} index ops", count);
        Ok(count)
    }

    /// Reader barrier: returns once every op queued before the call is in the index.
    pub fn wait_drained(&self) -> Result<()> {
        self.flush().map(|_| ())
    }

    /// Flush periodically on the current tokio runtime until `shutdown` fires.
    /// Pending ops are flushed once more on the way out.
    pub fn spawn_flusher(self: Arc<Self>, interval: Duration, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let exiting = shutdown.is_exiting();
                let queue = Arc::clone(&self);
                match tokio::task::spawn_blocking(move || queue.flush()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("Index flush failed: {}", e),
                    Err(e) => error!("Index flush task panicked: {}", e),
                }
                if exiting {
                    break;
                }
            }
            debug!("Index flusher stopped");
        })
    }
}

fn op_label(op: &QueueOp) -> String {
    match op {
        QueueOp::Upsert(t) => format!("upsert {}", t.id),
        QueueOp::RemoveRoot(id) => format!("remove {}", id),
        QueueOp::RemovePathPrefix { box_id, prefix } => format!("remove {}{}*", box_id, prefix),
        QueueOp::BatchRemoveRoots(ids) => format!("remove {} roots", ids.len()),
        QueueOp::RefreshRefs(t) => format!("refresh refs {}", t.id),
    }
}
