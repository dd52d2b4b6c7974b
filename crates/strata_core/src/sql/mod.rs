//! Queryable index backed by SQLite.
//!
//! Reads go straight to the connection. Writes are expected to come from the
//! [`TaskQueue`](crate::queue::TaskQueue), which batches them into one
//! transaction per flush.

mod rows;

pub use rows::{BlockRow, RefRow, blocks_from_tree, refs_from_tree, text_content};

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use log::debug;
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};

use crate::blocktree::BlockTree;
use crate::error::Result;
use crate::tree::Tree;

/// Upper bound on rows read by keyword queries.
const KEYWORD_LIMIT: i64 = 10240;

/// Table to check for duplicated roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTable {
    Blocks,
    Refs,
}

impl IndexTable {
    fn name(self) -> &'static str {
        match self {
            IndexTable::Blocks => "blocks",
            IndexTable::Refs => "refs",
        }
    }
}

/// Which sources feed virtual reference keywords.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordSources {
    pub name: bool,
    pub alias: bool,
    pub anchor: bool,
    pub doc: bool,
}

pub struct SqlIndex {
    conn: Mutex<Connection>,
}

impl SqlIndex {
    /// Open or create the index database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let index = Self {
            conn: Mutex::new(conn),
        };
        index.init_schema()?;
        Ok(index)
    }

    /// Create an in-memory index for testing.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let index = Self {
            conn: Mutex::new(conn),
        };
        index.init_schema()?;
        Ok(index)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        // `id` is deliberately not a primary key: duplicated rows are a
        // condition the reconciler detects and repairs.
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS blocks (
                id TEXT NOT NULL,
                parent_id TEXT NOT NULL DEFAULT '',
                root_id TEXT NOT NULL,
                box TEXT NOT NULL,
                path TEXT NOT NULL,
                hpath TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL DEFAULT '',
                alias TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                type TEXT NOT NULL,
                subtype TEXT NOT NULL DEFAULT '',
                ial TEXT NOT NULL DEFAULT '',
                created TEXT NOT NULL DEFAULT '',
                updated TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_blocks_id ON blocks(id);
            CREATE INDEX IF NOT EXISTS idx_blocks_root_id ON blocks(root_id);

            CREATE TABLE IF NOT EXISTS refs (
                id TEXT NOT NULL,
                def_block_id TEXT NOT NULL,
                def_block_root_id TEXT NOT NULL DEFAULT '',
                block_id TEXT NOT NULL,
                root_id TEXT NOT NULL,
                box TEXT NOT NULL,
                path TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_refs_root_id ON refs(root_id);
            CREATE INDEX IF NOT EXISTS idx_refs_def_root ON refs(def_block_root_id);
            "#,
        )?;
        Ok(())
    }

    /// Run `f` inside one transaction, committing if it succeeds.
    pub fn write<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Transaction<'_>) -> Result<()>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        f(&tx)?;
        tx.commit()?;
        Ok(())
    }

    /// Roots that own a row whose id occurs more than once.
    pub fn duplicated_root_ids(&self, table: IndexTable) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT DISTINCT root_id FROM {t} WHERE id IN \
             (SELECT id FROM {t} GROUP BY id HAVING COUNT(*) > 1) ORDER BY root_id",
            t = table.name()
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn blocks_by_ids(&self, ids: &[String]) -> Result<Vec<BlockRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("{BLOCK_COLUMNS} WHERE id IN ({placeholders}) ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), read_block_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn blocks_by_root(&self, root_id: &str) -> Result<Vec<BlockRow>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("{BLOCK_COLUMNS} WHERE root_id = ? ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![root_id], read_block_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `updated` of every document row, keyed by root id.
    pub fn root_updated(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT root_id, updated FROM blocks WHERE type = 'd'")?;
        let map = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(map)
    }

    /// Reference counts for blocks defined in `def_root_id`.
    pub fn root_children_ref_count(&self, def_root_id: &str) -> Result<HashMap<String, usize>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT def_block_id, COUNT(*) FROM refs WHERE def_block_root_id = ? GROUP BY def_block_id",
        )?;
        let map = stmt
            .query_map(params![def_root_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(map)
    }

    /// Refs rows owned by a root, ordered by id.
    pub fn refs_by_root(&self, root_id: &str) -> Result<Vec<RefRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, def_block_id, def_block_root_id, block_id, root_id, box, path, content \
             FROM refs WHERE root_id = ? ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![root_id], |row| {
                Ok(RefRow {
                    id: row.get(0)?,
                    def_block_id: row.get(1)?,
                    def_block_root_id: row.get(2)?,
                    block_id: row.get(3)?,
                    root_id: row.get(4)?,
                    box_id: row.get(5)?,
                    path: row.get(6)?,
                    content: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Indexed text of one block.
    pub fn block_content(&self, id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let content = conn
            .query_row(
                "SELECT content FROM blocks WHERE id = ? LIMIT 1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(content)
    }

    /// Keywords eligible for virtual references, longest first.
    pub fn virtual_ref_keywords(&self, sources: KeywordSources) -> Result<Vec<String>> {
        let mut keywords = Vec::new();
        if sources.name {
            keywords.extend(self.split_column("SELECT name FROM blocks WHERE name != '' LIMIT ?")?);
        }
        if sources.alias {
            keywords.extend(self.split_column("SELECT alias FROM blocks WHERE alias != '' LIMIT ?")?);
        }
        if sources.anchor {
            keywords.extend(self.split_column("SELECT DISTINCT content FROM refs WHERE content != '' LIMIT ?")?);
        }
        if sources.doc {
            keywords.extend(self.split_column("SELECT content FROM blocks WHERE type = 'd' LIMIT ?")?);
        }

        let mut seen = HashSet::new();
        keywords.retain(|k| seen.insert(k.clone()));
        keywords.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
        Ok(keywords)
    }

    /// Comma-separated column values, split and trimmed of empties.
    fn split_column(&self, sql: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let values = stmt
            .query_map(params![KEYWORD_LIMIT], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(values
            .iter()
            .flat_map(|v| v.split(','))
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Number of rows in a table, for diagnostics and tests.
    pub fn row_count(&self, table: IndexTable) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table.name()),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

const BLOCK_COLUMNS: &str = "SELECT id, parent_id, root_id, box, path, hpath, name, alias, content, \
                             type, subtype, ial, created, updated FROM blocks";

fn read_block_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlockRow> {
    Ok(BlockRow {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        root_id: row.get(2)?,
        box_id: row.get(3)?,
        path: row.get(4)?,
        hpath: row.get(5)?,
        name: row.get(6)?,
        alias: row.get(7)?,
        content: row.get(8)?,
        kind: row.get(9)?,
        subtype: row.get(10)?,
        ial: row.get(11)?,
        created: row.get(12)?,
        updated: row.get(13)?,
    })
}

// Write helpers, run inside a queue flush transaction.

pub fn insert_blocks(tx: &Transaction<'_>, rows: &[BlockRow]) -> Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO blocks (id, parent_id, root_id, box, path, hpath, name, alias, content, \
         type, subtype, ial, created, updated) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for r in rows {
        stmt.execute(params![
            r.id, r.parent_id, r.root_id, r.box_id, r.path, r.hpath, r.name, r.alias, r.content,
            r.kind, r.subtype, r.ial, r.created, r.updated
        ])?;
    }
    Ok(())
}

pub fn insert_refs(tx: &Transaction<'_>, rows: &[RefRow]) -> Result<()> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO refs (id, def_block_id, def_block_root_id, block_id, root_id, box, path, content) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for r in rows {
        stmt.execute(params![
            r.id,
            r.def_block_id,
            r.def_block_root_id,
            r.block_id,
            r.root_id,
            r.box_id,
            r.path,
            r.content
        ])?;
    }
    Ok(())
}

/// Replace all rows of a tree.
pub fn upsert_tree(tx: &Transaction<'_>, tree: &Tree, blocktree: &BlockTree) -> Result<()> {
    delete_by_root(tx, &tree.id)?;
    insert_blocks(tx, &blocks_from_tree(tree))?;
    insert_refs(tx, &refs_from_tree(tree, blocktree))?;
    debug!("Indexed tree {}", tree.id);
    Ok(())
}

pub fn delete_by_root(tx: &Transaction<'_>, root_id: &str) -> Result<()> {
    tx.execute("DELETE FROM blocks WHERE root_id = ?", params![root_id])?;
    tx.execute("DELETE FROM refs WHERE root_id = ?", params![root_id])?;
    Ok(())
}

pub fn delete_by_path_prefix(tx: &Transaction<'_>, box_id: &str, prefix: &str) -> Result<()> {
    let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
    tx.execute(
        "DELETE FROM blocks WHERE box = ? AND path LIKE ? ESCAPE '\\'",
        params![box_id, pattern],
    )?;
    tx.execute(
        "DELETE FROM refs WHERE box = ? AND path LIKE ? ESCAPE '\\'",
        params![box_id, pattern],
    )?;
    Ok(())
}

/// Delete and re-derive the refs rows of a tree.
pub fn refresh_refs(tx: &Transaction<'_>, tree: &Tree, blocktree: &BlockTree) -> Result<()> {
    tx.execute("DELETE FROM refs WHERE root_id = ?", params![tree.id])?;
    insert_refs(tx, &refs_from_tree(tree, blocktree))
}
