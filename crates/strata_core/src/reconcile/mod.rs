//! Consistency reconciler.
//!
//! Brings the identity index and the queryable index back in line with the
//! tree files after crashes, partial writes or files edited behind our back.
//! The filesystem always wins.
//!
//! A run has five phases, executed in order. Each phase returns a token that
//! the next phase takes by value, so the order is fixed at compile time:
//!
//! 1. drop queryable-index roots that have duplicated rows
//! 2. make node ids unique on disk
//! 3. fix the identity index from the filesystem
//! 4. fix the queryable index from the identity index
//! 5. re-derive duplicated reference rows
//!
//! Every phase is idempotent. A panic inside a phase is logged and the run
//! continues with the next phase.

mod duplicates;
mod index_fix;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::blocktree::BlockTree;
use crate::config::Config;
use crate::events::{EventBus, IndexEvent};
use crate::fs::FileSystem;
use crate::id;
use crate::queue::TaskQueue;
use crate::shutdown::Shutdown;
use crate::tree::{Tree, TreeStore};

const PHASES: u8 = 5;

/// Phase 1 is done: no root has duplicated rows in the queryable index.
pub struct RootsDeduplicated(());
/// Phase 2 is done: node ids are unique on disk.
pub struct IdsUnique(());
/// Phase 3 is done: the identity index matches the filesystem.
pub struct BlockTreeFixed(());
/// Phase 4 is done: the queryable index matches the identity index.
pub struct SqlIndexFixed(());
/// Phase 5 is done: reference rows are unique.
pub struct RefsDeduplicated(());

/// What a run found and repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Roots dropped from the queryable index for duplicated rows
    pub duplicate_index_roots: usize,
    /// Blocks without an id that got one
    pub ids_minted: usize,
    /// Blocks whose duplicated id was replaced
    pub ids_reset: usize,
    /// Trees whose root id collided and were recreated under a new id
    pub trees_recreated: usize,
    /// Trees rewritten in place after id fixes
    pub trees_rewritten: usize,
    /// Files moved to the corrupted folder
    pub quarantined: usize,
    /// Identity entries dropped because their file is gone
    pub stale_paths_removed: usize,
    /// On-disk trees added to the identity index
    pub missing_paths_indexed: usize,
    /// Boxes purged from the identity index (closed or removed)
    pub boxes_purged: usize,
    /// Trees re-indexed into the queryable index (absent or stale)
    pub trees_reindexed: usize,
    /// Trees whose missing root `updated` was derived from the id
    pub legacy_updated_fixed: usize,
    /// Roots dropped from the queryable index because no tree backs them
    pub orphan_roots_removed: usize,
    /// Roots whose refs rows were re-derived
    pub refs_refreshed: usize,
    /// Phases that panicked
    pub failed_phases: Vec<u8>,
}

impl ReconcileReport {
    /// Nothing was mutated.
    pub fn is_clean(&self) -> bool {
        self.disk_mutations() == 0
            && self.duplicate_index_roots == 0
            && self.stale_paths_removed == 0
            && self.missing_paths_indexed == 0
            && self.boxes_purged == 0
            && self.trees_reindexed == 0
            && self.legacy_updated_fixed == 0
            && self.orphan_roots_removed == 0
            && self.refs_refreshed == 0
    }

    /// Changes phase 2 made to tree files.
    pub fn disk_mutations(&self) -> usize {
        self.ids_minted + self.ids_reset + self.trees_recreated + self.quarantined
    }
}

/// Runs the reconciliation pipeline at most once.
pub struct ReconcilerService<FS: FileSystem> {
    store: Arc<TreeStore<FS>>,
    blocktree: Arc<BlockTree>,
    queue: Arc<TaskQueue>,
    events: Arc<EventBus>,
    config: Config,
    shutdown: Shutdown,
    started: AtomicBool,
    phase_lock: Mutex<()>,
}

impl<FS: FileSystem> ReconcilerService<FS> {
    pub fn new(
        store: Arc<TreeStore<FS>>,
        blocktree: Arc<BlockTree>,
        queue: Arc<TaskQueue>,
        events: Arc<EventBus>,
        config: Config,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            store,
            blocktree,
            queue,
            events,
            config,
            shutdown,
            started: AtomicBool::new(false),
            phase_lock: Mutex::new(()),
        }
    }

    /// Whether `start` has been called.
    pub fn has_run(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Run the pipeline. Later calls return `None` without doing anything.
    pub fn start(&self) -> Option<ReconcileReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(self.run())
    }

    fn run(&self) -> ReconcileReport {
        info!("Reconciling indexes");
        let mut report = ReconcileReport::default();

        let token = self.guarded(1, "Removing duplicate index roots", &mut report, RootsDeduplicated(()), |s, r| {
            s.dedupe_index_roots(r)
        });
        self.drain();

        let token = self.guarded(2, "Resetting duplicate block ids", &mut report, IdsUnique(()), |s, r| {
            s.reset_duplicate_ids(token, r)
        });
        if report.disk_mutations() > 0 {
            self.notify_reload(&report);
        }

        let token = self.guarded(3, "Fixing identity index", &mut report, BlockTreeFixed(()), |s, r| {
            s.fix_blocktree(token, r)
        });
        self.drain();

        let token = self.guarded(4, "Fixing queryable index", &mut report, SqlIndexFixed(()), |s, r| {
            s.fix_sql_index(token, r)
        });
        self.drain();

        let RefsDeduplicated(()) = self.guarded(5, "Removing duplicate references", &mut report, RefsDeduplicated(()), |s, r| {
            s.dedupe_refs(token, r)
        });
        self.drain();

        let layout = self.store.layout();
        if let Err(e) = self.blocktree.save(self.store.fs(), &layout.blocktree_file()) {
            error!("Saving identity index failed: {}", e);
        }

        self.events.emit(&IndexEvent::status("Index check finished"));
        if report.is_clean() {
            info!("Indexes are consistent");
        } else {
            warn!("Reconciliation repaired indexes: {:?}", report);
        }
        report
    }

    /// Run one phase under the phase lock, converting a panic into a logged
    /// failure and the fallback token.
    fn guarded<T>(
        &self,
        phase: u8,
        label: &str,
        report: &mut ReconcileReport,
        fallback: T,
        f: impl FnOnce(&Self, &mut ReconcileReport) -> T,
    ) -> T {
        self.events.emit(&IndexEvent::Progress {
            phase,
            total: PHASES,
            label: label.to_string(),
        });
        let _lock = self.phase_lock.lock().unwrap_or_else(|p| p.into_inner());
        match catch_unwind(AssertUnwindSafe(|| f(self, report))) {
            Ok(token) => token,
            Err(_) => {
                error!("Reconcile phase {} ({}) panicked", phase, label);
                report.failed_phases.push(phase);
                fallback
            }
        }
    }

    fn drain(&self) {
        if let Err(e) = self.queue.wait_drained() {
            error!("Draining index queue failed: {}", e);
        }
    }

    fn exiting(&self) -> bool {
        self.shutdown.is_exiting()
    }

    /// Tell open editors to reload, then show a notice after a short delay.
    fn notify_reload(&self, report: &ReconcileReport) {
        self.events.emit(&IndexEvent::ReloadUi);
        let notice = IndexEvent::Notice {
            message: format!(
                "Fixed duplicate block ids on disk ({} ids, {} documents)",
                report.ids_minted + report.ids_reset,
                report.trees_recreated + report.trees_rewritten
            ),
            timeout_ms: 7000,
        };
        let delay = self.config.reload_notice_delay_ms;
        if delay == 0 {
            self.events.emit(&notice);
            return;
        }
        let events = Arc::clone(&self.events);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(delay));
            events.emit(&notice);
        });
    }

    /// Put a tree into both indexes, deriving a missing root `updated` from
    /// the id (and persisting it) first.
    fn reindex(&self, tree: &mut Tree, i: usize, size: usize, report: &mut ReconcileReport) {
        if tree.root_node().attr("updated").is_none() {
            let updated = id::time_from_id(&tree.id)
                .map(str::to_string)
                .unwrap_or_else(id::now_timestamp);
            let root = tree.root();
            tree.set_attr(root, "updated", &updated);
            match self.store.write_tree(tree) {
                Ok(()) => report.legacy_updated_fixed += 1,
                Err(e) => error!("Writing tree {} failed: {}", tree.path, e),
            }
        }
        self.blocktree.reindex_tree(tree);
        self.queue.upsert(tree);

        if i % 64 == 0 {
            let name = tree.hpath.rsplit('/').next().unwrap_or_default();
            self.events.emit(&IndexEvent::status(format!(
                "Indexing [{}/{}] {}",
                i, size, name
            )));
        }
    }
}

impl<FS: FileSystem + 'static> ReconcilerService<FS> {
    /// Run `start` on tokio's blocking pool.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<Option<ReconcileReport>> {
        tokio::task::spawn_blocking(move || self.start())
    }
}
