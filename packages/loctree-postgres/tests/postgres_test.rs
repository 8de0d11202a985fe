use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Barrier, OnceLock};
use std::thread;

use postgres::{Client, NoTls};
use uuid::Uuid;

use loctree_core::{NodeId, NodePatch, NodeStore, TreeManager};
use loctree_postgres::{ensure_schema, reset_tree_for_tests, PgNodeStore};
use loctree_test_support::{new_node, run_conformance};

fn connect() -> Option<Rc<RefCell<Client>>> {
    let url = std::env::var("LOCTREE_POSTGRES_URL").ok()?;
    let client = Client::connect(&url, NoTls).ok()?;
    Some(Rc::new(RefCell::new(client)))
}

fn ensure_schema_once(client: &Rc<RefCell<Client>>) {
    static ONCE: OnceLock<()> = OnceLock::new();
    ONCE.get_or_init(|| {
        let mut c = client.borrow_mut();
        ensure_schema(&mut c).unwrap();
    });
}

fn fresh_store(client: &Rc<RefCell<Client>>, label: &str) -> PgNodeStore {
    let tree_id = format!("test-{label}-{}", Uuid::new_v4());
    {
        let mut c = client.borrow_mut();
        reset_tree_for_tests(&mut c, &tree_id).unwrap();
    }
    PgNodeStore::new(client.clone(), &tree_id)
}

#[test]
fn postgres_backend_passes_conformance_suite() {
    let Some(client) = connect() else {
        return;
    };
    ensure_schema_once(&client);
    run_conformance(|| fresh_store(&client, "conformance"));
}

#[test]
fn postgres_backend_tree_isolation() {
    let Some(client) = connect() else {
        return;
    };
    ensure_schema_once(&client);

    let mut tree_a = TreeManager::new(fresh_store(&client, "a"));
    let mut tree_b = TreeManager::new(fresh_store(&client, "b"));

    let root_a = tree_a.create(new_node("root-a", None)).unwrap();
    tree_a.create(new_node("child-a", Some(root_a.id))).unwrap();
    tree_b.create(new_node("root-b", None)).unwrap();

    assert_eq!(tree_a.list().unwrap().len(), 2);
    assert_eq!(tree_b.list().unwrap().len(), 1);
    assert!(tree_b.get(root_a.id).unwrap_err().is_not_found());

    // a parent from another tree does not resolve
    let root_b = tree_b.list().unwrap().remove(0);
    assert!(tree_a
        .update(root_a.id, NodePatch::default().parent(Some(root_b.id)))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn postgres_backend_rolls_back_failed_move() {
    let Some(client) = connect() else {
        return;
    };
    ensure_schema_once(&client);

    let mut tree = TreeManager::new(fresh_store(&client, "rollback"));
    let root = tree.create(new_node("root", None)).unwrap();
    let child = tree.create(new_node("child", Some(root.id))).unwrap();

    let res: loctree_core::Result<()> = tree.store_mut().atomically(|store| {
        store.bulk_update_by_path_prefix(&child.path, &child.id.to_string(), -1)?;
        Err(loctree_core::Error::InvalidOperation("abort".into()))
    });
    assert!(res.is_err());
    let after = tree.get(child.id).unwrap();
    assert_eq!(after.path, child.path);
    assert_eq!(after.level, 1);
    tree.validate_invariants().unwrap();
}

// Two connections race opposite moves that would close a loop together (x under y while
// y's ancestor w goes under x). Exactly one may win; the tree must stay acyclic.
#[test]
fn postgres_backend_serializes_conflicting_moves() {
    let Some(client) = connect() else {
        return;
    };
    ensure_schema_once(&client);
    let url = std::env::var("LOCTREE_POSTGRES_URL").unwrap();

    for round in 0..10 {
        let store = fresh_store(&client, &format!("race-{round}"));
        let tree_id = store.tree_id().to_string();
        let mut tree = TreeManager::new(store);
        let root = tree.create(new_node("root", None)).unwrap();
        let w = tree.create(new_node("w", Some(root.id))).unwrap();
        let y = tree.create(new_node("y", Some(w.id))).unwrap();
        let x = tree.create(new_node("x", Some(root.id))).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let spawn_move = |node: NodeId, parent: NodeId| {
            let barrier = Arc::clone(&barrier);
            let url = url.clone();
            let tree_id = tree_id.clone();
            thread::spawn(move || {
                let client = Client::connect(&url, NoTls).unwrap();
                let mut tree =
                    TreeManager::new(PgNodeStore::new(Rc::new(RefCell::new(client)), &tree_id));
                barrier.wait();
                tree.update(node, NodePatch::default().parent(Some(parent)))
                    .map(|_| ())
            })
        };
        let first = spawn_move(x.id, y.id);
        let second = spawn_move(w.id, x.id);
        let results = [first.join().unwrap(), second.join().unwrap()];

        let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(failures.len(), 1, "round {round}: {results:?}");
        assert!(failures[0].is_invalid_operation());
        tree.validate_invariants().unwrap();
    }
}
