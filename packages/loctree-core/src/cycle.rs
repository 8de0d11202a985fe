use std::collections::HashSet;

use tracing::warn;

use crate::config::{BrokenChainPolicy, TreeConfig};
use crate::error::{Error, Result};
use crate::ids::NodeId;
use crate::store::NodeStore;

/// Returns true if making `candidate_parent` the parent of `node` would create a cycle.
///
/// Walks upward from `candidate_parent` one `id`/`parent_id` read at a time and never loads
/// whole subtrees. Any depth is accepted; an ancestor seen twice means the store already
/// holds a parent loop, reported as [`Error::InconsistentState`].
pub fn would_create_cycle<S: NodeStore>(
    store: &S,
    node: NodeId,
    candidate_parent: NodeId,
    config: &TreeConfig,
) -> Result<bool> {
    if node == candidate_parent {
        return Ok(true);
    }

    let mut seen = HashSet::new();
    let mut current = Some(candidate_parent);
    while let Some(id) = current {
        if !seen.insert(id) {
            return Err(Error::InconsistentState(format!(
                "ancestry of {candidate_parent} loops back through {id}"
            )));
        }

        let Some(link) = store.get_link(id)? else {
            if id == candidate_parent {
                // unknown candidate: the caller's parent lookup reports it
                return Ok(false);
            }
            return match config.broken_chain {
                BrokenChainPolicy::Lenient => {
                    warn!(%node, %candidate_parent, missing = %id, "ancestry chain is broken");
                    Ok(false)
                }
                BrokenChainPolicy::Strict => Err(Error::InconsistentState(format!(
                    "ancestor {id} of {candidate_parent} does not exist"
                ))),
            };
        };
        if link.id == node {
            return Ok(true);
        }
        current = link.parent_id;
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::store::MemoryNodeStore;
    use chrono::Utc;

    fn raw(id: u128, parent: Option<u128>) -> Node {
        let now = Utc::now();
        Node {
            id: NodeId(id),
            name: String::new(),
            code: String::new(),
            area: 0.0,
            parent_id: parent.map(NodeId),
            level: 0,
            path: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn chain() -> MemoryNodeStore {
        // 1 -> 2 -> 3, plus an unrelated root 4
        let mut store = MemoryNodeStore::new();
        store.put_raw(raw(1, None));
        store.put_raw(raw(2, Some(1)));
        store.put_raw(raw(3, Some(2)));
        store.put_raw(raw(4, None));
        store
    }

    #[test]
    fn self_parenting_is_a_cycle() {
        let store = chain();
        assert!(would_create_cycle(&store, NodeId(2), NodeId(2), &TreeConfig::default()).unwrap());
    }

    #[test]
    fn moving_under_a_descendant_is_a_cycle() {
        let store = chain();
        let cfg = TreeConfig::default();
        assert!(would_create_cycle(&store, NodeId(1), NodeId(3), &cfg).unwrap());
        assert!(would_create_cycle(&store, NodeId(2), NodeId(3), &cfg).unwrap());
    }

    #[test]
    fn moving_elsewhere_is_not_a_cycle() {
        let store = chain();
        let cfg = TreeConfig::default();
        assert!(!would_create_cycle(&store, NodeId(3), NodeId(4), &cfg).unwrap());
        assert!(!would_create_cycle(&store, NodeId(4), NodeId(3), &cfg).unwrap());
        assert!(!would_create_cycle(&store, NodeId(3), NodeId(1), &cfg).unwrap());
    }

    #[test]
    fn broken_chain_follows_policy() {
        let mut store = chain();
        store.put_raw(raw(5, Some(99)));

        assert!(!would_create_cycle(&store, NodeId(1), NodeId(5), &TreeConfig::default()).unwrap());

        let err = would_create_cycle(&store, NodeId(1), NodeId(5), &TreeConfig::strict()).unwrap_err();
        assert!(matches!(err, Error::InconsistentState(_)));
    }

    #[test]
    fn unknown_candidate_is_not_a_broken_chain() {
        let store = chain();
        assert!(!would_create_cycle(&store, NodeId(1), NodeId(42), &TreeConfig::strict()).unwrap());
    }

    #[test]
    fn pre_existing_loop_terminates() {
        let mut store = MemoryNodeStore::new();
        store.put_raw(raw(1, Some(2)));
        store.put_raw(raw(2, Some(1)));
        let err = would_create_cycle(&store, NodeId(7), NodeId(1), &TreeConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InconsistentState(_)));
    }

    #[test]
    fn deep_acyclic_chain_is_walked_to_the_root() {
        let mut store = MemoryNodeStore::new();
        store.put_raw(raw(1, None));
        for id in 2..=10_000u128 {
            store.put_raw(raw(id, Some(id - 1)));
        }
        store.put_raw(raw(20_000, None));
        let cfg = TreeConfig::default();
        assert!(!would_create_cycle(&store, NodeId(20_000), NodeId(10_000), &cfg).unwrap());
        assert!(would_create_cycle(&store, NodeId(1), NodeId(10_000), &cfg).unwrap());
    }
}
