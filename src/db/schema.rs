//! SQL DDL for the base (v1) schema.
//!
//! Defines `notes`, `global_configs`, and `schema_meta`. Every row carries a
//! `namespace` column; the same file can hold any number of namespaces without
//! their rows ever meeting. All DDL uses `IF NOT EXISTS` for idempotent
//! initialization. Later tables are added by [`super::migrations`].

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Notes. Embeddings are raw little-endian f32 blobs.
CREATE TABLE IF NOT EXISTS notes (
    id TEXT NOT NULL,
    namespace TEXT NOT NULL,
    project_id TEXT NOT NULL,
    group_id TEXT NOT NULL,
    title TEXT,
    text TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    source TEXT,
    created_at TEXT,
    metadata TEXT,
    embedding BLOB,
    PRIMARY KEY (namespace, id)
);

CREATE INDEX IF NOT EXISTS idx_notes_project ON notes(namespace, project_id);
CREATE INDEX IF NOT EXISTS idx_notes_group ON notes(namespace, group_id);
CREATE INDEX IF NOT EXISTS idx_notes_created_at ON notes(namespace, created_at);

-- Project-scoped key/value settings
CREATE TABLE IF NOT EXISTS global_configs (
    id TEXT NOT NULL,
    namespace TEXT NOT NULL,
    project_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT,
    UNIQUE(namespace, project_id, key)
);

CREATE INDEX IF NOT EXISTS idx_global_configs_id ON global_configs(namespace, id);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize the base tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
