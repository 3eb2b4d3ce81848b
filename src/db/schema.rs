//! SQL DDL for all knowledge-service tables.
//!
//! Defines `rules`, `project_docs`, `refs`, `access_tiers`, `audit_log` and
//! `schema_meta`. Embeddings are stored as little-endian f32 BLOBs in the
//! document rows and scored with sqlite-vec's `vec_distance_cosine`, so tier
//! and tag predicates run in the same query as the distance ordering. All DDL
//! uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Global rules and standards
CREATE TABLE IF NOT EXISTS rules (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    tags_csv TEXT NOT NULL DEFAULT '',
    tier INTEGER NOT NULL DEFAULT 0 CHECK(tier >= 0),
    fingerprint TEXT NOT NULL UNIQUE,
    embedding BLOB NOT NULL CHECK(length(embedding) > 0),
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rules_tier ON rules(tier);

-- Per-project documentation
CREATE TABLE IF NOT EXISTS project_docs (
    id TEXT PRIMARY KEY,
    project TEXT NOT NULL,
    path TEXT NOT NULL,
    kind TEXT NOT NULL CHECK(kind IN ('readme','doc','code','api','todo','comment')),
    body TEXT NOT NULL,
    tags_csv TEXT NOT NULL DEFAULT '',
    fingerprint TEXT NOT NULL UNIQUE,
    embedding BLOB NOT NULL CHECK(length(embedding) > 0),
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_project_docs_project ON project_docs(project);
CREATE INDEX IF NOT EXISTS idx_project_docs_kind ON project_docs(project, kind);

-- Curated references (no embedding)
CREATE TABLE IF NOT EXISTS refs (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    note TEXT,
    tags_csv TEXT NOT NULL DEFAULT '',
    tier INTEGER NOT NULL DEFAULT 0 CHECK(tier >= 0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_refs_updated ON refs(updated_at);

-- Caller privilege levels
CREATE TABLE IF NOT EXISTS access_tiers (
    login TEXT PRIMARY KEY,
    tier INTEGER NOT NULL DEFAULT 0 CHECK(tier >= 0),
    channels_csv TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Append-only audit trail
CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    login TEXT NOT NULL,
    operation TEXT NOT NULL,
    args_fingerprint TEXT NOT NULL,
    match_count INTEGER NOT NULL DEFAULT 0,
    elapsed_ms INTEGER,
    channel TEXT NOT NULL,
    outcome TEXT NOT NULL DEFAULT 'ok'
);

CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_operation ON audit_log(operation);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
