use std::collections::HashMap;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::ids::NodeId;
use crate::node::{Node, NodeLink, NodeRecord, NodeUpdate};
use crate::path::{rebase_path, shift_level};

/// Keyed location store the tree manager sits on.
///
/// Implementations own persistence and transactions; every tree invariant is maintained by
/// [`crate::TreeManager`] on top of these primitives.
pub trait NodeStore {
    fn get_by_id(&self, id: NodeId) -> Result<Option<Node>>;

    /// Narrow projection used by ancestry walks. Stores can override this with a cheaper
    /// `id, parent_id` read.
    fn get_link(&self, id: NodeId) -> Result<Option<NodeLink>> {
        Ok(self.get_by_id(id)?.map(|n| n.link()))
    }

    /// Children of `parent`, or the roots when `parent` is `None`. Order is unspecified.
    fn get_by_parent(&self, parent: Option<NodeId>) -> Result<Vec<Node>>;

    /// Persist a new node; the store assigns `id` and timestamps.
    fn insert(&mut self, record: NodeRecord) -> Result<Node>;

    /// Apply `update` to the row `id` and refresh `updated_at`. Missing rows are a storage error.
    fn update_fields(&mut self, id: NodeId, update: &NodeUpdate) -> Result<()>;

    /// Set-based subtree rewrite: every row whose path equals `old_prefix` or starts with
    /// `old_prefix + "."` gets its leading `old_prefix` replaced by `new_prefix` and
    /// `level_diff` added to its level. Returns the number of rows touched.
    fn bulk_update_by_path_prefix(
        &mut self,
        old_prefix: &str,
        new_prefix: &str,
        level_diff: i64,
    ) -> Result<u64>;

    /// Remove the row; returns whether it existed.
    fn delete(&mut self, id: NodeId) -> Result<bool>;

    /// Every node ordered by `path` ascending.
    fn list_all(&self) -> Result<Vec<Node>>;

    /// Run `f` in one store transaction. An `Err` rolls back everything `f` wrote;
    /// a nested call joins the transaction already open.
    fn atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T>;
}

/// Inverse of one write made inside a transaction.
#[derive(Clone, Debug)]
enum Undo {
    Inserted(NodeId),
    Replaced(Node),
    Deleted { node: Node, position: usize },
}

/// In-memory store for tests and embedding.
///
/// Transactions record an undo entry per touched row and replay them in reverse on failure,
/// so a commit costs only what the transaction wrote.
#[derive(Clone, Debug, Default)]
pub struct MemoryNodeStore {
    nodes: HashMap<NodeId, Node>,
    order: Vec<NodeId>,
    in_tx: bool,
    undo: Vec<Undo>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Write a row verbatim, bypassing id assignment. Lets tests stage corrupt states.
    pub fn put_raw(&mut self, node: Node) {
        if !self.nodes.contains_key(&node.id) {
            self.order.push(node.id);
        }
        self.nodes.insert(node.id, node);
    }

    fn record(&mut self, entry: Undo) {
        if self.in_tx {
            self.undo.push(entry);
        }
    }

    fn rollback(&mut self) {
        while let Some(entry) = self.undo.pop() {
            match entry {
                Undo::Inserted(id) => {
                    self.nodes.remove(&id);
                    // later writes were undone first, so the insert is still last
                    if self.order.last() == Some(&id) {
                        self.order.pop();
                    } else {
                        self.order.retain(|n| *n != id);
                    }
                }
                Undo::Replaced(node) => {
                    self.nodes.insert(node.id, node);
                }
                Undo::Deleted { node, position } => {
                    self.order.insert(position.min(self.order.len()), node.id);
                    self.nodes.insert(node.id, node);
                }
            }
        }
    }
}

/// Ends a memory transaction when dropped: keeps the writes once `committed`, otherwise
/// (error or unwinding panic) replays the undo log.
struct MemoryTx<'a> {
    store: &'a mut MemoryNodeStore,
    committed: bool,
}

impl Drop for MemoryTx<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.store.rollback();
        }
        self.store.undo.clear();
        self.store.in_tx = false;
    }
}

impl NodeStore for MemoryNodeStore {
    fn get_by_id(&self, id: NodeId) -> Result<Option<Node>> {
        Ok(self.nodes.get(&id).cloned())
    }

    fn get_link(&self, id: NodeId) -> Result<Option<NodeLink>> {
        Ok(self.nodes.get(&id).map(Node::link))
    }

    fn get_by_parent(&self, parent: Option<NodeId>) -> Result<Vec<Node>> {
        Ok(self
            .order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|n| n.parent_id == parent)
            .cloned()
            .collect())
    }

    fn insert(&mut self, record: NodeRecord) -> Result<Node> {
        let mut id = NodeId::generate();
        while self.nodes.contains_key(&id) {
            id = NodeId::generate();
        }
        let now = Utc::now();
        let node = Node {
            id,
            name: record.name,
            code: record.code,
            area: record.area,
            parent_id: record.parent_id,
            level: record.level,
            path: record.path,
            created_at: now,
            updated_at: now,
        };
        self.order.push(id);
        self.nodes.insert(id, node.clone());
        self.record(Undo::Inserted(id));
        Ok(node)
    }

    fn update_fields(&mut self, id: NodeId, update: &NodeUpdate) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| Error::Storage(format!("update of missing row {id}")))?;
        let prior = self.in_tx.then(|| node.clone());
        node.apply(update);
        node.updated_at = Utc::now();
        if let Some(prior) = prior {
            self.undo.push(Undo::Replaced(prior));
        }
        Ok(())
    }

    fn bulk_update_by_path_prefix(
        &mut self,
        old_prefix: &str,
        new_prefix: &str,
        level_diff: i64,
    ) -> Result<u64> {
        let now = Utc::now();
        let mut touched = 0u64;
        for node in self.nodes.values_mut() {
            if let Some(rebased) = rebase_path(&node.path, old_prefix, new_prefix) {
                if self.in_tx {
                    self.undo.push(Undo::Replaced(node.clone()));
                }
                node.path = rebased;
                node.level = shift_level(node.level, level_diff);
                node.updated_at = now;
                touched += 1;
            }
        }
        Ok(touched)
    }

    fn delete(&mut self, id: NodeId) -> Result<bool> {
        let Some(node) = self.nodes.remove(&id) else {
            return Ok(false);
        };
        if let Some(position) = self.order.iter().position(|n| *n == id) {
            self.order.remove(position);
            self.record(Undo::Deleted { node, position });
        }
        Ok(true)
    }

    fn list_all(&self) -> Result<Vec<Node>> {
        let mut all: Vec<Node> = self.nodes.values().cloned().collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(all)
    }

    fn atomically<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        if self.in_tx {
            return f(self);
        }
        self.in_tx = true;
        let mut tx = MemoryTx {
            store: self,
            committed: false,
        };
        let res = f(&mut *tx.store);
        tx.committed = res.is_ok();
        res
    }
}
