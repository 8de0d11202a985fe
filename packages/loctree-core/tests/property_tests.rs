use proptest::prelude::*;

use loctree_core::{MemoryNodeStore, Node, NodeId, NodePatch, TreeManager};
use loctree_test_support::new_node;

#[derive(Clone, Debug)]
enum Step {
    Create { parent: Option<usize> },
    Move { node: usize, parent: Option<usize> },
    Remove { node: usize },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => proptest::option::of(0usize..32).prop_map(|parent| Step::Create { parent }),
        4 => (0usize..32, proptest::option::of(0usize..32))
            .prop_map(|(node, parent)| Step::Move { node, parent }),
        1 => (0usize..32).prop_map(|node| Step::Remove { node }),
    ]
}

fn pick(ids: &[NodeId], idx: usize) -> Option<NodeId> {
    if ids.is_empty() {
        None
    } else {
        Some(ids[idx % ids.len()])
    }
}

fn is_self_or_descendant(all: &[Node], candidate: NodeId, node: NodeId) -> bool {
    let mut current = Some(candidate);
    while let Some(id) = current {
        if id == node {
            return true;
        }
        current = all.iter().find(|n| n.id == id).and_then(|n| n.parent_id);
    }
    false
}

proptest! {
    #[test]
    fn random_edits_preserve_invariants(steps in prop::collection::vec(step(), 1..40)) {
        let mut tree = TreeManager::new(MemoryNodeStore::new());
        let mut ids: Vec<NodeId> = Vec::new();

        for step in steps {
            match step {
                Step::Create { parent } => {
                    let parent = parent.and_then(|p| pick(&ids, p));
                    let node = tree.create(new_node("n", parent)).unwrap();
                    ids.push(node.id);
                }
                Step::Move { node, parent } => {
                    let Some(node) = pick(&ids, node) else { continue };
                    let parent = parent.and_then(|p| pick(&ids, p));
                    let before = tree.list().unwrap();
                    let cyclic = parent.is_some_and(|p| is_self_or_descendant(&before, p, node));
                    let res = tree.update(node, NodePatch::default().parent(parent));
                    if cyclic {
                        prop_assert!(res.unwrap_err().is_invalid_operation());
                        let after = tree.list().unwrap();
                        prop_assert_eq!(before, after);
                    } else {
                        let moved = res.unwrap();
                        prop_assert_eq!(moved.parent_id, parent);
                        let prefix = format!("{}.", moved.path);
                        let old = before.iter().find(|n| n.id == node).unwrap();
                        let diff = i64::from(moved.level) - i64::from(old.level);
                        for prior in before.iter().filter(|n| n.path.starts_with(&format!("{}.", old.path))) {
                            let now = tree.get(prior.id).unwrap();
                            prop_assert!(now.path.starts_with(&prefix));
                            prop_assert_eq!(i64::from(now.level), i64::from(prior.level) + diff);
                        }
                    }
                }
                Step::Remove { node } => {
                    let Some(node) = pick(&ids, node) else { continue };
                    let has_children = !tree.get_children(node).unwrap().is_empty();
                    let res = tree.remove(node);
                    if has_children {
                        prop_assert!(res.unwrap_err().is_invalid_operation());
                    } else {
                        res.unwrap();
                        ids.retain(|id| *id != node);
                        prop_assert!(tree.get(node).unwrap_err().is_not_found());
                    }
                }
            }
            tree.validate_invariants().unwrap();
        }

        let flattened: Vec<NodeId> = tree
            .get_tree()
            .unwrap()
            .iter()
            .flat_map(|t| t.flatten_preorder())
            .map(|n| n.id)
            .collect();
        let listed: Vec<NodeId> = tree.list().unwrap().iter().map(|n| n.id).collect();
        prop_assert_eq!(flattened, listed);
    }
}
