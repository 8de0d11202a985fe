#![forbid(unsafe_code)]
//! Core primitives for a materialized-path location tree with pluggable node storage.
//! This crate stays independent of concrete storage engines so it can sit on SQLite,
//! Postgres, or any host that can satisfy the [`NodeStore`] trait defined here.

pub mod config;
pub mod cycle;
pub mod error;
pub mod ids;
pub mod manager;
pub mod node;
pub mod path;
pub mod store;
pub mod tree;

pub use crate::config::{BrokenChainPolicy, TreeConfig};
pub use cycle::would_create_cycle;
pub use error::{Entity, Error, Result};
pub use ids::NodeId;
pub use manager::TreeManager;
pub use node::{NewNode, Node, NodeLink, NodePatch, NodeRecord, NodeUpdate, TreeNode};
pub use path::{Placement, PATH_DELIMITER};
pub use store::{MemoryNodeStore, NodeStore};
pub use tree::build_forest;
