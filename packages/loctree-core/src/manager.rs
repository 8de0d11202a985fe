use std::collections::HashMap;

use tracing::{debug, info, instrument};

use crate::config::TreeConfig;
use crate::cycle::would_create_cycle;
use crate::error::{Error, Result};
use crate::ids::NodeId;
use crate::node::{validate_area, NewNode, Node, NodePatch, NodeRecord, NodeUpdate, TreeNode};
use crate::path::{level_diff, placement_under, root_placement, shift_level, PATH_DELIMITER};
use crate::store::NodeStore;
use crate::tree;

/// Owns every hierarchy invariant on top of a [`NodeStore`].
///
/// The manager holds no locks of its own. Each mutating operation runs inside a single
/// [`NodeStore::atomically`] call, so checks and writes commit together or not at all.
pub struct TreeManager<S: NodeStore> {
    store: S,
    config: TreeConfig,
}

impl<S: NodeStore> TreeManager<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, TreeConfig::default())
    }

    pub fn with_config(store: S, config: TreeConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Create a node under `input.parent_id`, or as a root.
    ///
    /// The store assigns the id on first persist and the path embeds it, so the path is
    /// written in a second step within the same transaction.
    #[instrument(skip(self, input), fields(parent = ?input.parent_id))]
    pub fn create(&mut self, input: NewNode) -> Result<Node> {
        validate_area(input.area)?;
        self.store.atomically(|store| {
            let parent = match input.parent_id {
                Some(pid) => Some(
                    store
                        .get_by_id(pid)?
                        .ok_or_else(|| Error::parent_not_found(pid))?,
                ),
                None => None,
            };
            let level = parent.as_ref().map(|p| p.level + 1).unwrap_or(0);

            let mut node = store.insert(NodeRecord {
                name: input.name,
                code: input.code,
                area: input.area,
                parent_id: input.parent_id,
                level,
                path: String::new(),
            })?;
            debug!(id = %node.id, level, "inserted");

            let placement = placement_under(parent.as_ref(), node.id);
            let update = NodeUpdate {
                path: Some(placement.path),
                ..NodeUpdate::default()
            };
            store.update_fields(node.id, &update)?;
            node.apply(&update);
            debug!(id = %node.id, path = %node.path, "path written");
            Ok(node)
        })
    }

    pub fn get(&self, id: NodeId) -> Result<Node> {
        self.store
            .get_by_id(id)?
            .ok_or_else(|| Error::node_not_found(id))
    }

    /// Every node, ordered by path (a pre-order of the whole forest).
    pub fn list(&self) -> Result<Vec<Node>> {
        self.store.list_all()
    }

    /// Direct children of `id`; empty when `id` has none or does not exist.
    pub fn get_children(&self, id: NodeId) -> Result<Vec<Node>> {
        self.store.get_by_parent(Some(id))
    }

    pub fn get_parent_path(&self, parent_id: NodeId) -> Result<String> {
        Ok(self.get(parent_id)?.path)
    }

    /// All roots with their subtrees attached.
    ///
    /// Not wrapped in a transaction: one store read per node, and concurrent writes may
    /// or may not be reflected.
    pub fn get_tree(&self) -> Result<Vec<TreeNode>> {
        let roots = self.store.get_by_parent(None)?;
        tree::assemble(&self.store, roots)
    }

    /// Apply `patch` to `id`, re-parenting and cascading level/path when `parent_id` changes.
    #[instrument(skip(self, patch))]
    pub fn update(&mut self, id: NodeId, patch: NodePatch) -> Result<Node> {
        if let Some(area) = patch.area {
            validate_area(area)?;
        }
        let config = self.config.clone();
        self.store.atomically(|store| {
            let mut node = store
                .get_by_id(id)?
                .ok_or_else(|| Error::node_not_found(id))?;

            let mut update = NodeUpdate {
                name: patch.name,
                code: patch.code,
                area: patch.area,
                ..NodeUpdate::default()
            };

            if let Some(new_parent) = patch.parent_id {
                if new_parent != node.parent_id {
                    let (level, path) = reparent(store, &node, new_parent, &config)?;
                    node.level = level;
                    node.path = path;
                    update.parent_id = Some(new_parent);
                    update.level = Some(level);
                    update.path = Some(node.path.clone());
                }
            }

            if !update.is_empty() {
                store.update_fields(id, &update)?;
            }
            store
                .get_by_id(id)?
                .ok_or_else(|| Error::node_not_found(id))
        })
    }

    /// Delete a childless node.
    #[instrument(skip(self))]
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        self.store.atomically(|store| {
            if store.get_by_id(id)?.is_none() {
                return Err(Error::node_not_found(id));
            }
            let children = store.get_by_parent(Some(id))?;
            if !children.is_empty() {
                return Err(Error::InvalidOperation(format!(
                    "has children: location {id} still has {} child location(s)",
                    children.len()
                )));
            }
            store.delete(id)?;
            debug!(%id, "deleted");
            Ok(())
        })
    }

    /// Check parent existence, acyclicity, and level/path consistency over the whole store.
    /// Intended for tests and debugging.
    pub fn validate_invariants(&self) -> Result<()> {
        let all = self.store.list_all()?;
        let by_id: HashMap<NodeId, &Node> = all.iter().map(|n| (n.id, n)).collect();
        let inconsistent = |msg: String| Err(Error::InconsistentState(msg));

        for window in all.windows(2) {
            if window[0].path > window[1].path {
                return inconsistent("list_all is not ordered by path".into());
            }
        }

        for node in &all {
            let Some(pid) = node.parent_id else {
                let expected = root_placement(node.id);
                if node.level != expected.level || node.path != expected.path {
                    return inconsistent(format!(
                        "root {} has level {} path {:?}",
                        node.id, node.level, node.path
                    ));
                }
                continue;
            };
            let Some(parent) = by_id.get(&pid) else {
                return inconsistent(format!("{} references missing parent {pid}", node.id));
            };
            let expected = placement_under(Some(parent), node.id);
            if node.level != expected.level {
                return inconsistent(format!(
                    "{} has level {}, expected {}",
                    node.id, node.level, expected.level
                ));
            }
            if node.path != expected.path {
                return inconsistent(format!(
                    "{} has path {:?}, expected {:?}",
                    node.id, node.path, expected.path
                ));
            }

            // Levels strictly increase towards the leaves, so a walk longer than the level
            // can only mean a loop.
            let mut hops = 0u32;
            let mut current = node.parent_id;
            while let Some(ancestor) = current {
                if ancestor == node.id || hops > node.level {
                    return inconsistent(format!("cycle through {}", node.id));
                }
                hops += 1;
                current = by_id.get(&ancestor).and_then(|a| a.parent_id);
            }
        }
        Ok(())
    }
}

/// Validate a move of `node` under `new_parent` and cascade it through the subtree.
/// Returns the node's new level and path.
fn reparent<S: NodeStore>(
    store: &mut S,
    node: &Node,
    new_parent: Option<NodeId>,
    config: &TreeConfig,
) -> Result<(u32, String)> {
    let parent = match new_parent {
        Some(pid) => {
            if would_create_cycle(store, node.id, pid, config)? {
                return Err(Error::InvalidOperation(format!(
                    "would create cycle: {pid} is {} or one of its descendants",
                    node.id
                )));
            }
            Some(
                store
                    .get_by_id(pid)?
                    .ok_or_else(|| Error::parent_not_found(pid))?,
            )
        }
        None => None,
    };

    let diff = level_diff(parent.as_ref().map(|p| p.level), node.level);
    let new_path = match &parent {
        Some(p) => format!("{}{PATH_DELIMITER}{}", p.path, node.id),
        None => node.id.to_string(),
    };

    let touched = store.bulk_update_by_path_prefix(&node.path, &new_path, diff)?;
    info!(
        id = %node.id,
        from = ?node.parent_id,
        to = ?new_parent,
        level_diff = diff,
        rows = touched,
        "re-parented subtree"
    );
    Ok((shift_level(node.level, diff), new_path))
}
