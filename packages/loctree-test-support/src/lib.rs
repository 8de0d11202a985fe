//! Backend conformance scenarios for [`loctree_core::NodeStore`] implementations.
//!
//! Every scenario takes a fresh, empty store and panics on the first violated expectation.
//! Backends call [`run_conformance`] (or single scenarios) from their own test suites.

use std::sync::Once;

use loctree_core::{Error, NewNode, Node, NodeId, NodePatch, NodeStore, TreeManager};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static LOGGING: Once = Once::new();

/// Install a test-captured `tracing` subscriber once per test binary. `RUST_LOG` overrides the
/// default `debug` filter.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_test_writer()
                .with_target(true)
                .with_filter(env_filter),
        );
        if tracing::dispatcher::has_been_set() {
            return;
        }
        if let Err(e) = subscriber.try_init() {
            eprintln!("Error: Failed to set up logging: {e}");
        }
    });
}

pub fn new_node(name: &str, parent: Option<NodeId>) -> NewNode {
    NewNode {
        name: name.to_string(),
        code: format!("LOC-{name}"),
        area: 100.5,
        parent_id: parent,
    }
}

/// Run every scenario, each against a store produced by `make`.
pub fn run_conformance<S, F>(mut make: F)
where
    S: NodeStore,
    F: FnMut() -> S,
{
    init_test_logging();
    create_root_and_child(make());
    create_under_missing_parent(make());
    find_one_and_list_order(make());
    children_of_unknown_node_is_empty(make());
    reject_self_and_descendant_parenting(make());
    move_subtree_cascades(make());
    move_to_root(make());
    field_update_keeps_placement(make());
    update_missing_node_or_parent(make());
    remove_requires_no_children(make());
    tree_matches_listing(make());
    scenario_walkthrough(make());
}

fn ids(nodes: &[Node]) -> Vec<NodeId> {
    nodes.iter().map(|n| n.id).collect()
}

pub fn create_root_and_child<S: NodeStore>(store: S) {
    let mut tree = TreeManager::new(store);
    let root = tree.create(new_node("root", None)).unwrap();
    assert_eq!(root.level, 0);
    assert_eq!(root.path, root.id.to_string());
    assert!(root.parent_id.is_none());

    let child = tree.create(new_node("child", Some(root.id))).unwrap();
    assert_eq!(child.level, 1);
    assert_eq!(child.path, format!("{}.{}", root.id, child.id));
    assert_eq!(child.parent_id, Some(root.id));
    assert_eq!(child.name, "child");
    assert_eq!(child.code, "LOC-child");
    assert_eq!(child.area, 100.5);

    let stored = tree.get(child.id).unwrap();
    assert_eq!(stored.path, child.path);
    assert_eq!(stored.level, 1);
    tree.validate_invariants().unwrap();
}

pub fn create_under_missing_parent<S: NodeStore>(store: S) {
    let mut tree = TreeManager::new(store);
    let ghost = NodeId::generate();
    let err = tree.create(new_node("orphan", Some(ghost))).unwrap_err();
    assert!(
        matches!(err, Error::NotFound { entity: loctree_core::Entity::Parent, id } if id == ghost),
        "unexpected error: {err:?}"
    );
    assert!(tree.list().unwrap().is_empty());
}

pub fn find_one_and_list_order<S: NodeStore>(store: S) {
    let mut tree = TreeManager::new(store);
    let r1 = tree.create(new_node("r1", None)).unwrap();
    let r2 = tree.create(new_node("r2", None)).unwrap();
    let a = tree.create(new_node("a", Some(r1.id))).unwrap();
    let b = tree.create(new_node("b", Some(a.id))).unwrap();
    let c = tree.create(new_node("c", Some(r2.id))).unwrap();

    let listed = tree.list().unwrap();
    assert_eq!(listed.len(), 5);
    for pair in listed.windows(2) {
        assert!(pair[0].path < pair[1].path);
    }
    // every node appears after its parent
    for (i, node) in listed.iter().enumerate() {
        if let Some(pid) = node.parent_id {
            let parent_pos = listed.iter().position(|n| n.id == pid).unwrap();
            assert!(parent_pos < i);
        }
    }
    for id in [r1.id, r2.id, a.id, b.id, c.id] {
        assert_eq!(tree.get(id).unwrap().id, id);
    }

    let missing = NodeId::generate();
    assert!(matches!(
        tree.get(missing),
        Err(Error::NotFound { entity: loctree_core::Entity::Node, .. })
    ));
}

pub fn children_of_unknown_node_is_empty<S: NodeStore>(store: S) {
    let mut tree = TreeManager::new(store);
    let root = tree.create(new_node("root", None)).unwrap();
    let a = tree.create(new_node("a", Some(root.id))).unwrap();
    let b = tree.create(new_node("b", Some(root.id))).unwrap();

    let mut children = ids(&tree.get_children(root.id).unwrap());
    children.sort();
    let mut expected = vec![a.id, b.id];
    expected.sort();
    assert_eq!(children, expected);
    assert!(tree.get_children(a.id).unwrap().is_empty());
    assert!(tree.get_children(NodeId::generate()).unwrap().is_empty());
}

pub fn reject_self_and_descendant_parenting<S: NodeStore>(store: S) {
    let mut tree = TreeManager::new(store);
    let root = tree.create(new_node("root", None)).unwrap();
    let mid = tree.create(new_node("mid", Some(root.id))).unwrap();
    let leaf = tree.create(new_node("leaf", Some(mid.id))).unwrap();
    let before = tree.list().unwrap();

    for (node, parent) in [(mid.id, mid.id), (root.id, leaf.id), (root.id, mid.id), (mid.id, leaf.id)] {
        let err = tree
            .update(node, NodePatch::default().parent(Some(parent)).name("renamed"))
            .unwrap_err();
        assert!(err.is_invalid_operation(), "expected InvalidOperation, got {err:?}");
    }

    // nothing was written, not even the name change
    let after = tree.list().unwrap();
    assert_eq!(ids(&before), ids(&after));
    for (b, a) in before.iter().zip(&after) {
        assert_eq!(b.name, a.name);
        assert_eq!(b.parent_id, a.parent_id);
        assert_eq!(b.path, a.path);
        assert_eq!(b.level, a.level);
    }
    tree.validate_invariants().unwrap();
}

pub fn move_subtree_cascades<S: NodeStore>(store: S) {
    let mut tree = TreeManager::new(store);
    let r1 = tree.create(new_node("r1", None)).unwrap();
    let r2 = tree.create(new_node("r2", None)).unwrap();
    let deep = tree.create(new_node("deep", Some(r2.id))).unwrap();
    let a = tree.create(new_node("a", Some(r1.id))).unwrap();
    let b = tree.create(new_node("b", Some(a.id))).unwrap();
    let c = tree.create(new_node("c", Some(b.id))).unwrap();
    let bystander = tree.create(new_node("bystander", Some(r1.id))).unwrap();

    // a (level 1) moves under deep (level 1): levelDiff = +1
    let moved = tree.update(a.id, NodePatch::default().parent(Some(deep.id))).unwrap();
    assert_eq!(moved.parent_id, Some(deep.id));
    assert_eq!(moved.level, 2);
    assert_eq!(moved.path, format!("{}.{}", deep.path, a.id));

    let b_after = tree.get(b.id).unwrap();
    let c_after = tree.get(c.id).unwrap();
    assert_eq!(b_after.level, b.level + 1);
    assert_eq!(c_after.level, c.level + 1);
    assert_eq!(b_after.path, format!("{}.{}", moved.path, b.id));
    assert_eq!(c_after.path, format!("{}.{}", b_after.path, c.id));
    assert!(c_after.path.starts_with(&moved.path));

    let bystander_after = tree.get(bystander.id).unwrap();
    assert_eq!(bystander_after.path, bystander.path);
    assert_eq!(bystander_after.level, bystander.level);

    // and back up one level: levelDiff = -1
    let back = tree.update(a.id, NodePatch::default().parent(Some(r1.id))).unwrap();
    assert_eq!(back.level, 1);
    assert_eq!(tree.get(c.id).unwrap().path, c.path);
    assert_eq!(tree.get(c.id).unwrap().level, c.level);
    tree.validate_invariants().unwrap();
}

pub fn move_to_root<S: NodeStore>(store: S) {
    let mut tree = TreeManager::new(store);
    let root = tree.create(new_node("root", None)).unwrap();
    let a = tree.create(new_node("a", Some(root.id))).unwrap();
    let b = tree.create(new_node("b", Some(a.id))).unwrap();

    let detached = tree.update(a.id, NodePatch::default().parent(None)).unwrap();
    assert!(detached.parent_id.is_none());
    assert_eq!(detached.level, 0);
    assert_eq!(detached.path, a.id.to_string());

    let b_after = tree.get(b.id).unwrap();
    assert_eq!(b_after.level, 1);
    assert_eq!(b_after.path, format!("{}.{}", a.id, b.id));
    assert!(tree.get_children(root.id).unwrap().is_empty());
    tree.validate_invariants().unwrap();
}

pub fn field_update_keeps_placement<S: NodeStore>(store: S) {
    let mut tree = TreeManager::new(store);
    let root = tree.create(new_node("root", None)).unwrap();
    let a = tree.create(new_node("a", Some(root.id))).unwrap();

    let updated = tree
        .update(
            a.id,
            NodePatch::default()
                .name("Warehouse A")
                .code("LOC-001")
                .area(1500.75)
                .parent(Some(root.id)),
        )
        .unwrap();
    assert_eq!(updated.name, "Warehouse A");
    assert_eq!(updated.code, "LOC-001");
    assert_eq!(updated.area, 1500.75);
    assert_eq!(updated.parent_id, Some(root.id));
    assert_eq!(updated.level, a.level);
    assert_eq!(updated.path, a.path);
    assert_eq!(updated.created_at, tree.get(a.id).unwrap().created_at);

    let err = tree.update(a.id, NodePatch::default().area(-1.0)).unwrap_err();
    assert!(err.is_invalid_operation());
    assert_eq!(tree.get(a.id).unwrap().area, 1500.75);
    tree.validate_invariants().unwrap();
}

pub fn update_missing_node_or_parent<S: NodeStore>(store: S) {
    let mut tree = TreeManager::new(store);
    let root = tree.create(new_node("root", None)).unwrap();
    let a = tree.create(new_node("a", Some(root.id))).unwrap();

    let ghost = NodeId::generate();
    assert!(matches!(
        tree.update(ghost, NodePatch::default().name("x")),
        Err(Error::NotFound { entity: loctree_core::Entity::Node, id }) if id == ghost
    ));
    assert!(matches!(
        tree.update(a.id, NodePatch::default().parent(Some(ghost)).name("x")),
        Err(Error::NotFound { entity: loctree_core::Entity::Parent, id }) if id == ghost
    ));
    let unchanged = tree.get(a.id).unwrap();
    assert_eq!(unchanged.name, "a");
    assert_eq!(unchanged.parent_id, Some(root.id));
}

pub fn remove_requires_no_children<S: NodeStore>(store: S) {
    let mut tree = TreeManager::new(store);
    let root = tree.create(new_node("root", None)).unwrap();
    let leaf = tree.create(new_node("leaf", Some(root.id))).unwrap();

    let err = tree.remove(root.id).unwrap_err();
    assert!(err.is_invalid_operation(), "expected InvalidOperation, got {err:?}");
    assert!(tree.get(root.id).is_ok());

    tree.remove(leaf.id).unwrap();
    assert!(tree.get(leaf.id).unwrap_err().is_not_found());
    tree.remove(root.id).unwrap();
    assert!(tree.get(root.id).unwrap_err().is_not_found());
    assert!(tree.remove(root.id).unwrap_err().is_not_found());
    assert!(tree.list().unwrap().is_empty());
}

pub fn tree_matches_listing<S: NodeStore>(store: S) {
    let mut tree = TreeManager::new(store);
    let r1 = tree.create(new_node("r1", None)).unwrap();
    let r2 = tree.create(new_node("r2", None)).unwrap();
    let a = tree.create(new_node("a", Some(r1.id))).unwrap();
    tree.create(new_node("b", Some(r1.id))).unwrap();
    tree.create(new_node("a1", Some(a.id))).unwrap();
    tree.create(new_node("c", Some(r2.id))).unwrap();

    let forest = tree.get_tree().unwrap();
    assert_eq!(forest.len(), 2);
    let flattened: Vec<NodeId> = forest
        .iter()
        .flat_map(|t| t.flatten_preorder())
        .map(|n| n.id)
        .collect();
    assert_eq!(flattened, ids(&tree.list().unwrap()));

    for root in &forest {
        assert!(root.node.parent_id.is_none());
        for child in &root.children {
            assert_eq!(child.node.parent_id, Some(root.node.id));
        }
    }
    let rebuilt = loctree_core::build_forest(tree.list().unwrap());
    assert_eq!(rebuilt, forest);
}

/// Create R, C under R, reject C→C and R→C, move C under R2, then delete R.
pub fn scenario_walkthrough<S: NodeStore>(store: S) {
    let mut tree = TreeManager::new(store);
    let r = tree.create(new_node("R", None)).unwrap();
    assert_eq!((r.level, r.path.clone()), (0, r.id.to_string()));

    let c = tree.create(new_node("C", Some(r.id))).unwrap();
    assert_eq!(c.level, 1);
    assert_eq!(c.path, format!("{}.{}", r.id, c.id));

    assert!(tree
        .update(c.id, NodePatch::default().parent(Some(c.id)))
        .unwrap_err()
        .is_invalid_operation());
    assert!(tree
        .update(r.id, NodePatch::default().parent(Some(c.id)))
        .unwrap_err()
        .is_invalid_operation());

    let r2 = tree.create(new_node("R2", None)).unwrap();
    let moved = tree.update(c.id, NodePatch::default().parent(Some(r2.id))).unwrap();
    assert_eq!(moved.level, r2.level + 1);
    assert_eq!(moved.path, format!("{}.{}", r2.id, c.id));

    tree.remove(r.id).unwrap();
    assert!(tree.get(r.id).unwrap_err().is_not_found());
    tree.validate_invariants().unwrap();
}
