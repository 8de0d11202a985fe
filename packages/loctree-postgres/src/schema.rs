use postgres::Client;
use loctree_core::{Error, Result};

const SCHEMA_LOCK_KEY: i64 = 0x6c6f637472656501; // "loctree"

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS loctree_locations (
  tree_id TEXT NOT NULL,
  id TEXT NOT NULL,
  name TEXT NOT NULL,
  code TEXT NOT NULL,
  area DOUBLE PRECISION NOT NULL,
  parent_id TEXT,
  level INTEGER NOT NULL DEFAULT 0,
  path TEXT NOT NULL,
  created_at BIGINT NOT NULL,
  updated_at BIGINT NOT NULL,
  PRIMARY KEY (tree_id, id)
);

CREATE INDEX IF NOT EXISTS idx_loctree_locations_parent
  ON loctree_locations (tree_id, parent_id);

CREATE INDEX IF NOT EXISTS idx_loctree_locations_path
  ON loctree_locations (tree_id, path text_pattern_ops);
"#;

fn schema_err(e: postgres::Error) -> Error {
    Error::Storage(format!("schema setup failed: {e:?}"))
}

/// Create the locations table and indexes if missing.
///
/// Concurrent `CREATE ... IF NOT EXISTS` can still collide in the catalog, so setup runs in
/// one transaction holding an advisory lock that is released at commit.
pub fn ensure_schema(client: &mut Client) -> Result<()> {
    let mut tx = client.transaction().map_err(schema_err)?;
    tx.execute("SELECT pg_advisory_xact_lock($1)", &[&SCHEMA_LOCK_KEY])
        .map_err(schema_err)?;
    tx.batch_execute(SCHEMA_SQL).map_err(schema_err)?;
    tx.commit().map_err(schema_err)
}

pub fn reset_tree_for_tests(client: &mut Client, tree_id: &str) -> Result<()> {
    client
        .execute("DELETE FROM loctree_locations WHERE tree_id = $1", &[&tree_id])
        .map_err(|e| Error::Storage(format!("{e:?}")))?;
    Ok(())
}
