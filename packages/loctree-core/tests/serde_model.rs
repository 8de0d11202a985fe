#![cfg(feature = "serde")]

use loctree_core::{BrokenChainPolicy, MemoryNodeStore, NodeId, NodePatch, TreeConfig, TreeManager};
use loctree_test_support::new_node;

#[test]
fn node_serializes_with_camel_case_and_string_ids() {
    let mut tree = TreeManager::new(MemoryNodeStore::new());
    let root = tree.create(new_node("root", None)).unwrap();
    let child = tree.create(new_node("child", Some(root.id))).unwrap();

    let json = serde_json::to_value(&child).unwrap();
    assert_eq!(json["parentId"], serde_json::json!(root.id.to_string()));
    assert_eq!(json["path"], serde_json::json!(child.path));
    assert_eq!(json["level"], serde_json::json!(1));
    assert!(json.get("createdAt").is_some());

    let forest = serde_json::to_value(tree.get_tree().unwrap()).unwrap();
    assert_eq!(forest[0]["id"], serde_json::json!(root.id.to_string()));
    assert_eq!(forest[0]["children"][0]["id"], serde_json::json!(child.id.to_string()));
}

#[test]
fn patch_distinguishes_null_parent_from_absent() {
    let detach: NodePatch = serde_json::from_str(r#"{"parentId": null}"#).unwrap();
    assert_eq!(detach.parent_id, Some(None));

    let rename: NodePatch = serde_json::from_str(r#"{"name": "B"}"#).unwrap();
    assert_eq!(rename.parent_id, None);
    assert_eq!(rename.name.as_deref(), Some("B"));

    let id = NodeId::generate();
    let moved: NodePatch = serde_json::from_str(&format!(r#"{{"parentId": "{id}"}}"#)).unwrap();
    assert_eq!(moved.parent_id, Some(Some(id)));
}

#[test]
fn tree_config_deserializes_with_defaults() {
    let empty: TreeConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(empty, TreeConfig::default());

    let strict: TreeConfig = serde_json::from_str(r#"{"broken_chain": "strict"}"#).unwrap();
    assert_eq!(strict.broken_chain, BrokenChainPolicy::Strict);

    assert!(serde_json::from_str::<TreeConfig>(r#"{"broken_chain": "sometimes"}"#).is_err());
    assert!(serde_json::from_str::<TreeConfig>(r#"{"max_depth": 3}"#).is_err());
}
