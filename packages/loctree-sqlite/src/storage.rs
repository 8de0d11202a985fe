use chrono::{DateTime, Utc};
use loctree_core::{
    error::Error, NodeId, Node, NodeLink, NodeRecord, NodeStore, NodeUpdate, Result,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

const NODE_COLUMNS: &str = "id, name, code, area, parent_id, level, path, created_at, updated_at";

/// SQLite-backed [`NodeStore`] keeping one row per location in a `locations` table.
pub struct SqliteNodeStore {
    conn: Connection,
    in_tx: bool,
}

/// Open `BEGIN IMMEDIATE` transaction; rolled back on drop unless committed.
struct SqliteTx<'a> {
    store: &'a mut SqliteNodeStore,
    open: bool,
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if self.open && !self.store.conn.is_autocommit() {
            let _ = self.store.conn.execute_batch("ROLLBACK");
        }
        self.store.in_tx = false;
    }
}

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

impl SqliteNodeStore {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::from_connection(conn)
    }

    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        let mut store = Self { conn, in_tx: false };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS locations (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    code TEXT NOT NULL,
                    area REAL NOT NULL,
                    parent_id TEXT,
                    level INTEGER NOT NULL DEFAULT 0,
                    path TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_locations_parent ON locations(parent_id);
                CREATE INDEX IF NOT EXISTS idx_locations_path ON locations(path);",
            )
            .map_err(storage_err)?;
        Ok(())
    }
}

impl NodeStore for SqliteNodeStore {
    fn get_by_id(&self, id: NodeId) -> Result<Option<Node>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT {NODE_COLUMNS} FROM locations WHERE id = ?1"))
            .map_err(storage_err)?;
        stmt.query_row([id.to_string()], row_to_node)
            .optional()
            .map_err(storage_err)
    }

    fn get_link(&self, id: NodeId) -> Result<Option<NodeLink>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, parent_id FROM locations WHERE id = ?1")
            .map_err(storage_err)?;
        stmt.query_row([id.to_string()], |row| {
            Ok(NodeLink {
                id: text_to_node(row, 0)?,
                parent_id: opt_text_to_node(row, 1)?,
            })
        })
        .optional()
        .map_err(storage_err)
    }

    fn get_by_parent(&self, parent: Option<NodeId>) -> Result<Vec<Node>> {
        let sql = match parent {
            Some(_) => format!("SELECT {NODE_COLUMNS} FROM locations WHERE parent_id = ?1 ORDER BY rowid"),
            None => format!("SELECT {NODE_COLUMNS} FROM locations WHERE parent_id IS NULL ORDER BY rowid"),
        };
        let mut stmt = self.conn.prepare_cached(&sql).map_err(storage_err)?;
        let rows = match parent {
            Some(pid) => stmt.query_map([pid.to_string()], row_to_node),
            None => stmt.query_map([], row_to_node),
        }
        .map_err(storage_err)?;

        let mut nodes = Vec::new();
        for node in rows {
            nodes.push(node.map_err(storage_err)?);
        }
        Ok(nodes)
    }

    fn insert(&mut self, record: NodeRecord) -> Result<Node> {
        let now = Utc::now();
        let millis = now.timestamp_millis();
        let created_at = from_millis(millis).map_err(storage_err)?;
        // Random ids; retry on the (vanishingly rare) primary key collision.
        loop {
            let id = NodeId::generate();
            let inserted = self
                .conn
                .execute(
                    "INSERT OR IGNORE INTO locations
                        (id, name, code, area, parent_id, level, path, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                    params![
                        id.to_string(),
                        record.name,
                        record.code,
                        record.area,
                        record.parent_id.map(|p| p.to_string()),
                        i64::from(record.level),
                        record.path,
                        millis,
                    ],
                )
                .map_err(storage_err)?;
            if inserted == 1 {
                return Ok(Node {
                    id,
                    name: record.name,
                    code: record.code,
                    area: record.area,
                    parent_id: record.parent_id,
                    level: record.level,
                    path: record.path,
                    created_at,
                    updated_at: created_at,
                });
            }
        }
    }

    fn update_fields(&mut self, id: NodeId, update: &NodeUpdate) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE locations SET
                    name = COALESCE(?2, name),
                    code = COALESCE(?3, code),
                    area = COALESCE(?4, area),
                    parent_id = CASE WHEN ?5 THEN ?6 ELSE parent_id END,
                    level = COALESCE(?7, level),
                    path = COALESCE(?8, path),
                    updated_at = ?9
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    update.name,
                    update.code,
                    update.area,
                    update.parent_id.is_some(),
                    update.parent_id.flatten().map(|p| p.to_string()),
                    update.level.map(i64::from),
                    update.path,
                    Utc::now().timestamp_millis(),
                ],
            )
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(Error::Storage(format!("update of missing row {id}")));
        }
        Ok(())
    }

    fn bulk_update_by_path_prefix(
        &mut self,
        old_prefix: &str,
        new_prefix: &str,
        level_diff: i64,
    ) -> Result<u64> {
        let touched = self
            .conn
            .execute(
                "UPDATE locations SET
                    level = MAX(level + ?3, 0),
                    path = ?2 || substr(path, length(?1) + 1),
                    updated_at = ?4
                 WHERE path = ?1 OR substr(path, 1, length(?1) + 1) = ?1 || '.'",
                params![old_prefix, new_prefix, level_diff, Utc::now().timestamp_millis()],
            )
            .map_err(storage_err)?;
        debug!(old_prefix, new_prefix, level_diff, touched, "rewrote subtree");
        Ok(touched as u64)
    }

    fn delete(&mut self, id: NodeId) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM locations WHERE id = ?1", [id.to_string()])
            .map_err(storage_err)?;
        Ok(removed > 0)
    }

    fn list_all(&self) -> Result<Vec<Node>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT {NODE_COLUMNS} FROM locations ORDER BY path ASC"))
            .map_err(storage_err)?;
        let rows = stmt.query_map([], row_to_node).map_err(storage_err)?;
        let mut nodes = Vec::new();
        for node in rows {
            nodes.push(node.map_err(storage_err)?);
        }
        Ok(nodes)
    }

    fn atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        if self.in_tx {
            return f(self);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE").map_err(storage_err)?;
        self.in_tx = true;
        let mut tx = SqliteTx {
            store: self,
            open: true,
        };
        let v = f(&mut *tx.store)?;
        // A failed COMMIT (e.g. SQLITE_BUSY) leaves the transaction open; the guard rolls it back.
        tx.store.conn.execute_batch("COMMIT").map_err(storage_err)?;
        tx.open = false;
        Ok(v)
    }
}

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<Node> {
    let level: i64 = row.get(5)?;
    Ok(Node {
        id: text_to_node(row, 0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        area: row.get(3)?,
        parent_id: opt_text_to_node(row, 4)?,
        level: u32::try_from(level).map_err(|_| {
            rusqlite::Error::IntegralValueOutOfRange(5, level)
        })?,
        path: row.get(6)?,
        created_at: from_millis(row.get(7)?)?,
        updated_at: from_millis(row.get(8)?)?,
    })
}

fn text_to_node(row: &Row<'_>, idx: usize) -> rusqlite::Result<NodeId> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn opt_text_to_node(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NodeId>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse().map_err(|e: Error| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn from_millis(millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(0, millis))
}
