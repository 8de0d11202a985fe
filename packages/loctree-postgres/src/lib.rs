#![forbid(unsafe_code)]
//! Postgres-backed persistence for `loctree-core`.
//!
//! Goal: keep all tree semantics in `loctree-core` (cycle checks, cascades, delete guards),
//! while storing rows in vanilla PostgreSQL. Many trees share one table, keyed by `tree_id`.

mod schema;
mod store;

pub use schema::{ensure_schema, reset_tree_for_tests};
pub use store::PgNodeStore;
