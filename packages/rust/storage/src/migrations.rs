//! SQL migration definitions for the item database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: items, stage_jobs, ingest_runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per ingested post
CREATE TABLE IF NOT EXISTS items (
    id               TEXT PRIMARY KEY,
    source           TEXT NOT NULL,
    source_url       TEXT NOT NULL,
    title            TEXT NOT NULL,
    tag_list         TEXT NOT NULL DEFAULT '[]',
    published_at     TEXT,
    updated_at       TEXT,
    author_display   TEXT,
    body_text        TEXT,
    ai_summary       TEXT,
    content_label    TEXT,
    label_confidence REAL,
    last_ingested_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_source ON items(source);

-- Durable stage queue
CREATE TABLE IF NOT EXISTS stage_jobs (
    id            TEXT PRIMARY KEY,
    stage         TEXT NOT NULL,
    item_ids_json TEXT NOT NULL,
    dedup_key     TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'pending',
    attempts      INTEGER NOT NULL DEFAULT 0,
    available_at  INTEGER NOT NULL,
    claimed_at    INTEGER,
    last_error    TEXT,
    created_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stage_jobs_due ON stage_jobs(status, available_at);

-- At most one pending job per (stage, id batch)
CREATE UNIQUE INDEX IF NOT EXISTS idx_stage_jobs_pending_dedup
    ON stage_jobs(dedup_key) WHERE status = 'pending';

-- Ingestion pass history
CREATE TABLE IF NOT EXISTS ingest_runs (
    id          TEXT PRIMARY KEY,
    source      TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    stats_json  TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
