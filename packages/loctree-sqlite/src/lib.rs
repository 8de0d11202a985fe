#![forbid(unsafe_code)]
//! SQLite storage for `loctree-core`.
//! All tree semantics stay in the core crate; this adapter only persists rows and runs the
//! set-based subtree rewrite as a single `UPDATE`.

mod storage;

pub use storage::SqliteNodeStore;
