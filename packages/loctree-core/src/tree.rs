use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::error::Result;
use crate::ids::NodeId;
use crate::node::{Node, TreeNode};
use crate::store::NodeStore;

struct Slot {
    node: Node,
    children: Vec<usize>,
}

/// Fetch the subtrees below `roots` one `get_by_parent` read per node and assemble them.
///
/// Uses an explicit work list instead of recursion. Siblings are ordered by path so a
/// pre-order flatten matches [`NodeStore::list_all`]. No snapshot is taken: rows added or
/// removed while the walk runs may or may not show up.
pub fn assemble<S: NodeStore>(store: &S, mut roots: Vec<Node>) -> Result<Vec<TreeNode>> {
    roots.sort_by(|a, b| a.path.cmp(&b.path));

    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut slots: Vec<Slot> = Vec::with_capacity(roots.len());
    let mut root_slots = Vec::with_capacity(roots.len());
    let mut pending = Vec::new();

    for root in roots {
        if !seen.insert(root.id) {
            warn!(id = %root.id, "duplicate root during tree assembly");
            continue;
        }
        root_slots.push(slots.len());
        pending.push(slots.len());
        slots.push(Slot {
            node: root,
            children: Vec::new(),
        });
    }

    while let Some(idx) = pending.pop() {
        let mut children = store.get_by_parent(Some(slots[idx].node.id))?;
        children.sort_by(|a, b| a.path.cmp(&b.path));
        for child in children {
            if !seen.insert(child.id) {
                warn!(id = %child.id, parent = %slots[idx].node.id, "node reached twice during tree assembly");
                continue;
            }
            let child_idx = slots.len();
            slots[idx].children.push(child_idx);
            pending.push(child_idx);
            slots.push(Slot {
                node: child,
                children: Vec::new(),
            });
        }
    }

    Ok(link_slots(slots, &root_slots))
}

// Children always sit at a higher index than their parent, so a reverse sweep builds every
// subtree before it is needed.
fn link_slots(slots: Vec<Slot>, root_slots: &[usize]) -> Vec<TreeNode> {
    let mut child_lists: Vec<Vec<usize>> = Vec::with_capacity(slots.len());
    let mut built: Vec<Option<TreeNode>> = Vec::with_capacity(slots.len());
    for slot in slots {
        child_lists.push(slot.children);
        built.push(Some(TreeNode::leaf(slot.node)));
    }
    for idx in (0..built.len()).rev() {
        let children: Vec<TreeNode> = child_lists[idx]
            .iter()
            .filter_map(|&c| built[c].take())
            .collect();
        if let Some(tree) = built[idx].as_mut() {
            tree.children = children;
        }
    }
    root_slots.iter().filter_map(|&r| built[r].take()).collect()
}

/// Rebuild a forest from a flat node list without touching a store.
///
/// Input order is not required, but siblings come out ordered by path. Nodes whose parent
/// is not in the list become roots.
pub fn build_forest(mut nodes: Vec<Node>) -> Vec<TreeNode> {
    nodes.sort_by(|a, b| a.path.cmp(&b.path));
    let index: HashMap<NodeId, usize> = nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();

    let mut parent_of: Vec<Option<usize>> = Vec::with_capacity(nodes.len());
    for node in &nodes {
        parent_of.push(node.parent_id.and_then(|p| index.get(&p).copied()));
    }

    let mut slots: Vec<Slot> = nodes
        .into_iter()
        .map(|node| Slot {
            node,
            children: Vec::new(),
        })
        .collect();
    let mut roots = Vec::new();
    for (idx, parent) in parent_of.iter().enumerate() {
        match parent {
            // a parent sorts before its children, so it always has a lower index
            Some(p) if *p < idx => slots[*p].children.push(idx),
            _ => roots.push(idx),
        }
    }
    link_slots(slots, &roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{child_placement, root_placement};
    use crate::store::MemoryNodeStore;
    use chrono::Utc;

    fn placed(id: u128, parent: Option<&Node>) -> Node {
        let now = Utc::now();
        let placement = match parent {
            Some(p) => child_placement(p.level, &p.path, NodeId(id)),
            None => root_placement(NodeId(id)),
        };
        Node {
            id: NodeId(id),
            name: format!("n{id}"),
            code: String::new(),
            area: 0.0,
            parent_id: parent.map(|p| p.id),
            level: placement.level,
            path: placement.path,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample() -> Vec<Node> {
        let r1 = placed(1, None);
        let a = placed(3, Some(&r1));
        let b = placed(2, Some(&r1));
        let a1 = placed(4, Some(&a));
        let r2 = placed(5, None);
        vec![a1, r2, b, a, r1]
    }

    #[test]
    fn assemble_matches_path_order() {
        let mut store = MemoryNodeStore::new();
        for node in sample() {
            store.put_raw(node);
        }
        let roots = store.get_by_parent(None).unwrap();
        let forest = assemble(&store, roots).unwrap();
        let flat: Vec<NodeId> = forest
            .iter()
            .flat_map(|t| t.flatten_preorder())
            .map(|n| n.id)
            .collect();
        let listed: Vec<NodeId> = store.list_all().unwrap().iter().map(|n| n.id).collect();
        assert_eq!(flat, listed);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].size(), 4);
    }

    #[test]
    fn build_forest_promotes_orphans() {
        let mut nodes = sample();
        // drop r1 so its children lose their parent
        nodes.retain(|n| n.id != NodeId(1));
        let forest = build_forest(nodes);
        let mut root_ids: Vec<u128> = forest.iter().map(|t| t.node.id.0).collect();
        root_ids.sort();
        assert_eq!(root_ids, vec![2, 3, 5]);
        let a = forest.iter().find(|t| t.node.id == NodeId(3)).unwrap();
        assert_eq!(a.children.len(), 1);
    }

    #[test]
    fn assemble_skips_nodes_reached_twice() {
        let mut store = MemoryNodeStore::new();
        let mut r = placed(1, None);
        let c = placed(2, Some(&r));
        // corrupt: root claims the child as its parent
        r.parent_id = Some(NodeId(2));
        store.put_raw(r.clone());
        store.put_raw(c);
        let forest = assemble(&store, vec![r]).unwrap();
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].size(), 2);
    }
}
