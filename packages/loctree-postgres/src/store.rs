use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use postgres::{Client, Row};
use tracing::debug;

use loctree_core::{Error, Node, NodeId, NodeLink, NodeRecord, NodeStore, NodeUpdate, Result};

const NODE_COLUMNS: &str = "id, name, code, area, parent_id, level, path, created_at, updated_at";

/// Open transaction on a [`PgNodeStore`]; rolls back on drop unless committed.
struct PgTx<'a> {
    store: &'a mut PgNodeStore,
    open: bool,
}

impl Drop for PgTx<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Ok(mut c) = self.store.client.try_borrow_mut() {
                let _ = c.batch_execute("ROLLBACK");
            }
        }
        self.store.in_tx = false;
    }
}

fn storage_debug<E: std::fmt::Debug>(e: E) -> Error {
    Error::Storage(format!("{e:?}"))
}

fn text_to_node(raw: &str) -> Result<NodeId> {
    raw.parse()
        .map_err(|e: Error| Error::Storage(format!("bad id column {raw:?}: {e}")))
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| Error::Storage(format!("timestamp out of range: {millis}")))
}

fn row_to_node(row: &Row) -> Result<Node> {
    let id: String = row.get(0);
    let parent: Option<String> = row.get(4);
    let level: i32 = row.get(5);
    Ok(Node {
        id: text_to_node(&id)?,
        name: row.get(1),
        code: row.get(2),
        area: row.get(3),
        parent_id: parent.as_deref().map(text_to_node).transpose()?,
        level: u32::try_from(level)
            .map_err(|_| Error::Storage(format!("negative level {level}")))?,
        path: row.get(6),
        created_at: from_millis(row.get(7))?,
        updated_at: from_millis(row.get(8))?,
    })
}

/// [`NodeStore`] over a shared postgres connection, scoped to one `tree_id`.
///
/// [`NodeStore::atomically`] takes a transaction-scoped advisory lock keyed by `tree_id`, so
/// writers to the same tree run one at a time and every ancestry walk sees the moves
/// committed before it. Point reads inside the transaction also take `FOR UPDATE` row locks
/// against writers that bypass `atomically`.
pub struct PgNodeStore {
    tree_id: String,
    client: Rc<RefCell<Client>>,
    in_tx: bool,
}

impl PgNodeStore {
    pub fn new(client: Rc<RefCell<Client>>, tree_id: &str) -> Self {
        Self {
            tree_id: tree_id.to_string(),
            client,
            in_tx: false,
        }
    }

    pub fn tree_id(&self) -> &str {
        &self.tree_id
    }

    fn lock_tree(&self) -> Result<()> {
        let mut c = self.client.borrow_mut();
        c.execute(
            "SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))",
            &[&self.tree_id],
        )
        .map_err(storage_debug)?;
        Ok(())
    }

    fn query_nodes(&self, sql: &str, params: &[&(dyn postgres::types::ToSql + Sync)]) -> Result<Vec<Node>> {
        let mut c = self.client.borrow_mut();
        let rows = c.query(sql, params).map_err(storage_debug)?;
        rows.iter().map(row_to_node).collect()
    }
}

impl NodeStore for PgNodeStore {
    fn get_by_id(&self, id: NodeId) -> Result<Option<Node>> {
        let lock = if self.in_tx { " FOR UPDATE" } else { "" };
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM loctree_locations WHERE tree_id = $1 AND id = $2 LIMIT 1{lock}"
        );
        let id = id.to_string();
        Ok(self.query_nodes(&sql, &[&self.tree_id, &id])?.into_iter().next())
    }

    fn get_link(&self, id: NodeId) -> Result<Option<NodeLink>> {
        let mut c = self.client.borrow_mut();
        let rows = c
            .query(
                "SELECT id, parent_id FROM loctree_locations WHERE tree_id = $1 AND id = $2 LIMIT 1",
                &[&self.tree_id, &id.to_string()],
            )
            .map_err(storage_debug)?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let raw_id: String = row.get(0);
        let parent: Option<String> = row.get(1);
        Ok(Some(NodeLink {
            id: text_to_node(&raw_id)?,
            parent_id: parent.as_deref().map(text_to_node).transpose()?,
        }))
    }

    fn get_by_parent(&self, parent: Option<NodeId>) -> Result<Vec<Node>> {
        match parent {
            Some(pid) => self.query_nodes(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM loctree_locations \
                     WHERE tree_id = $1 AND parent_id = $2 ORDER BY created_at, id"
                ),
                &[&self.tree_id, &pid.to_string()],
            ),
            None => self.query_nodes(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM loctree_locations \
                     WHERE tree_id = $1 AND parent_id IS NULL ORDER BY created_at, id"
                ),
                &[&self.tree_id],
            ),
        }
    }

    fn insert(&mut self, record: NodeRecord) -> Result<Node> {
        let millis = Utc::now().timestamp_millis();
        let created_at = from_millis(millis)?;
        let level = i32::try_from(record.level)
            .map_err(|_| Error::Storage(format!("level overflow: {}", record.level)))?;
        let parent = record.parent_id.map(|p| p.to_string());
        let mut c = self.client.borrow_mut();
        // Random ids; retry on the (vanishingly rare) primary key collision.
        loop {
            let id = NodeId::generate();
            let inserted = c
                .execute(
                    "INSERT INTO loctree_locations \
                       (tree_id, id, name, code, area, parent_id, level, path, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
                     ON CONFLICT (tree_id, id) DO NOTHING",
                    &[
                        &self.tree_id,
                        &id.to_string(),
                        &record.name,
                        &record.code,
                        &record.area,
                        &parent,
                        &level,
                        &record.path,
                        &millis,
                    ],
                )
                .map_err(storage_debug)?;
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
        let level = update
            .level
            .map(i32::try_from)
            .transpose()
            .map_err(|_| Error::Storage("level overflow".into()))?;
        let set_parent = update.parent_id.is_some();
        let parent = update.parent_id.flatten().map(|p| p.to_string());
        let now = Utc::now().timestamp_millis();
        let mut c = self.client.borrow_mut();
        let changed = c
            .execute(
                "UPDATE loctree_locations SET \
                   name = COALESCE($3::text, name), \
                   code = COALESCE($4::text, code), \
                   area = COALESCE($5::double precision, area), \
                   parent_id = CASE WHEN $6::boolean THEN $7::text ELSE parent_id END, \
                   level = COALESCE($8::integer, level), \
                   path = COALESCE($9::text, path), \
                   updated_at = $10 \
                 WHERE tree_id = $1 AND id = $2",
                &[
                    &self.tree_id,
                    &id.to_string(),
                    &update.name,
                    &update.code,
                    &update.area,
                    &set_parent,
                    &parent,
                    &level,
                    &update.path,
                    &now,
                ],
            )
            .map_err(storage_debug)?;
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
        let diff = i32::try_from(level_diff)
            .map_err(|_| Error::Storage(format!("level diff overflow: {level_diff}")))?;
        let mut c = self.client.borrow_mut();
        let touched = c
            .execute(
                "UPDATE loctree_locations SET \
                   level = GREATEST(level + $4::integer, 0), \
                   path = $3::text || substr(path, length($2::text) + 1), \
                   updated_at = $5 \
                 WHERE tree_id = $1 \
                   AND (path = $2::text OR left(path, length($2::text) + 1) = $2::text || '.')",
                &[
                    &self.tree_id,
                    &old_prefix,
                    &new_prefix,
                    &diff,
                    &Utc::now().timestamp_millis(),
                ],
            )
            .map_err(storage_debug)?;
        debug!(old_prefix, new_prefix, level_diff, touched, "rewrote subtree");
        Ok(touched)
    }

    fn delete(&mut self, id: NodeId) -> Result<bool> {
        let mut c = self.client.borrow_mut();
        let removed = c
            .execute(
                "DELETE FROM loctree_locations WHERE tree_id = $1 AND id = $2",
                &[&self.tree_id, &id.to_string()],
            )
            .map_err(storage_debug)?;
        Ok(removed > 0)
    }

    fn list_all(&self) -> Result<Vec<Node>> {
        // COLLATE "C" keeps byte order so the listing is a pre-order regardless of locale.
        self.query_nodes(
            &format!(
                "SELECT {NODE_COLUMNS} FROM loctree_locations \
                 WHERE tree_id = $1 ORDER BY path COLLATE \"C\" ASC"
            ),
            &[&self.tree_id],
        )
    }

    fn atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        if self.in_tx {
            return f(self);
        }
        self.client
            .borrow_mut()
            .batch_execute("BEGIN")
            .map_err(storage_debug)?;
        self.in_tx = true;
        let mut tx = PgTx {
            store: self,
            open: true,
        };
        tx.store.lock_tree()?;
        let v = f(&mut *tx.store)?;
        tx.store
            .client
            .borrow_mut()
            .batch_execute("COMMIT")
            .map_err(storage_debug)?;
        tx.open = false;
        Ok(v)
    }
}
