//! Unified strata API.
//!
//! [`Strata`] wires the tree store, both indexes, the write queue and the
//! event bus for one workspace, and hands out the reconciler and the loader.
//!
//! # Example
//!
//! ```no_run
//! use strata_core::config::Config;
//! use strata_core::fs::RealFileSystem;
//! use strata_core::loader::DocRequest;
//! use strata_core::Strata;
//!
//! let strata = Strata::open(RealFileSystem, Config::new("/path/to/workspace"))?;
//! let report = strata.reconciler().start();
//! let window = strata.loader().load_doc(&DocRequest::new("20240101093000-abc1234"))?;
//! println!("{:?} {}", report, window.block_count);
//! strata.close()?;
//! # Ok::<(), strata_core::StrataError>(())
//! ```

use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::task::JoinHandle;

use crate::blocktree::{BlockTree, BlockTreeEntry};
use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::events::EventBus;
use crate::fs::FileSystem;
use crate::loader::Loader;
use crate::queue::TaskQueue;
use crate::reconcile::ReconcilerService;
use crate::shutdown::Shutdown;
use crate::sql::SqlIndex;
use crate::tree::{Tree, TreeStore};

/// One open workspace.
pub struct Strata<FS: FileSystem> {
    store: Arc<TreeStore<FS>>,
    blocktree: Arc<BlockTree>,
    queue: Arc<TaskQueue>,
    events: Arc<EventBus>,
    config: Config,
    shutdown: Shutdown,
    reconciler: Arc<ReconcilerService<FS>>,
    loader: Loader<FS>,
}

impl<FS: FileSystem> Strata<FS> {
    /// Open a workspace with its queryable index at `temp/index.db`.
    pub fn open(fs: FS, config: Config) -> Result<Self> {
        let layout = config.layout();
        fs.create_dir_all(&layout.temp_dir())?;
        let sql = SqlIndex::open(layout.index_db())?;
        Ok(Self::with_index(fs, config, sql))
    }

    /// Open a workspace on an already opened queryable index.
    pub fn with_index(fs: FS, config: Config, sql: SqlIndex) -> Self {
        let layout = config.layout();
        let blocktree = Arc::new(BlockTree::open(&fs, &layout.blocktree_file()));
        info!(
            "Opened workspace {} ({} identity entries)",
            layout.root().display(),
            blocktree.len()
        );
        let store = Arc::new(TreeStore::new(fs, layout));
        let queue = Arc::new(TaskQueue::new(Arc::new(sql), Arc::clone(&blocktree)));
        let events = Arc::new(EventBus::new());
        let shutdown = Shutdown::new();
        let reconciler = Arc::new(ReconcilerService::new(
            Arc::clone(&store),
            Arc::clone(&blocktree),
            Arc::clone(&queue),
            Arc::clone(&events),
            config.clone(),
            shutdown.clone(),
        ));
        let loader = Loader::new(
            Arc::clone(&store),
            Arc::clone(&blocktree),
            Arc::clone(&queue),
            config.clone(),
        );
        Self {
            store,
            blocktree,
            queue,
            events,
            config,
            shutdown,
            reconciler,
            loader,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &TreeStore<FS> {
        &self.store
    }

    pub fn blocktree(&self) -> &BlockTree {
        &self.blocktree
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn reconciler(&self) -> Arc<ReconcilerService<FS>> {
        Arc::clone(&self.reconciler)
    }

    pub fn loader(&self) -> &Loader<FS> {
        &self.loader
    }

    /// Identity entry of a block.
    pub fn get_block(&self, id: &str) -> Result<BlockTreeEntry> {
        self.blocktree
            .get(id)
            .ok_or_else(|| StrataError::BlockNotFound(id.to_string()))
    }

    /// Full tree containing a block.
    pub fn tree_of_block(&self, id: &str) -> Result<Tree> {
        let entry = self.get_block(id)?;
        self.store.load_tree(&entry.box_id, &entry.path)
    }

    /// Persist an edited tree and queue it for indexing.
    pub fn save_tree(&self, tree: &mut Tree) -> Result<()> {
        let root = tree.root();
        tree.set_attr(root, "updated", &crate::id::now_timestamp());
        self.store.write_tree(tree)?;
        self.blocktree.reindex_tree(tree);
        self.queue.upsert(tree);
        Ok(())
    }

    /// Signal shutdown, flush pending index writes and snapshot the identity index.
    pub fn close(&self) -> Result<()> {
        self.shutdown.signal();
        self.queue.flush()?;
        self.blocktree
            .save(self.store.fs(), &self.store.layout().blocktree_file())?;
        info!("Closed workspace {}", self.store.layout().root().display());
        Ok(())
    }
}

impl<FS: FileSystem + 'static> Strata<FS> {
    /// Start the periodic queue flusher on the current tokio runtime.
    pub fn spawn_flusher(&self) -> JoinHandle<()> {
        Arc::clone(&self.queue).spawn_flusher(
            Duration::from_millis(self.config.flush_interval_ms),
            self.shutdown.clone(),
        )
    }
}
