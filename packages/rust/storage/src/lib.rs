//! Turso Embedded / libSQL storage layer.
//!
//! [`Storage`] wraps a local libSQL database holding the item table, the
//! durable stage queue and the ingest-run history. It implements
//! [`ItemStore`] and [`JobQueue`]; [`MemoryStore`] and [`MemoryQueue`] are
//! the in-process equivalents.
//!
//! Field-level "set if absent" is expressed as `col = COALESCE(col, ?)` inside
//! the single `UPDATE` statement of a write, so it is atomic per item.

mod memory;
mod migrations;
mod store;
mod write;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use euchub_shared::{EucHubError, Item, ItemId, Result, SourceKind, Stage};
use libsql::{Connection, Database, params, params_from_iter};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::{JobSnapshot, MemoryQueue, MemoryStore};
pub use store::{ItemStore, JobQueue, JobStatus, QueueCount, StageJob};
pub use write::{FieldValue, FieldWrite, ItemField, ItemWrite, WriteGuard, WriteOutcome};

const ITEM_COLUMNS: &str = "id, source, source_url, title, tag_list, published_at, updated_at, \
     author_display, body_text, ai_summary, content_label, label_confidence, last_ingested_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EucHubError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| EucHubError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| EucHubError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        EucHubError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    async fn item_exists(&self, id: &ItemId) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM items WHERE id = ?1", params![id.as_str()])
            .await
            .map_err(|e| EucHubError::Storage(e.to_string()))?;
        Ok(matches!(rows.next().await, Ok(Some(_))))
    }

    // -----------------------------------------------------------------------
    // Item statistics
    // -----------------------------------------------------------------------

    /// Per-source item totals and how many carry each derived field.
    pub async fn item_stats(&self) -> Result<Vec<SourceStats>> {
        let mut rows = self
            .conn
            .query(
                "SELECT source, COUNT(*), COUNT(ai_summary), COUNT(content_label)
                 FROM items GROUP BY source ORDER BY source",
                params![],
            )
            .await
            .map_err(|e| EucHubError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let source: String = row
                .get(0)
                .map_err(|e| EucHubError::Storage(e.to_string()))?;
            results.push(SourceStats {
                source: source.parse()?,
                items: row.get::<i64>(1).unwrap_or(0) as u64,
                summarized: row.get::<i64>(2).unwrap_or(0) as u64,
                labeled: row.get::<i64>(3).unwrap_or(0) as u64,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Ingest runs
    // -----------------------------------------------------------------------

    /// Persist the summary of one ingestion pass.
    pub async fn record_ingest_run(&self, run: &IngestRunRecord) -> Result<()> {
        let stats = serde_json::to_string(&run.stats)
            .map_err(|e| EucHubError::Storage(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO ingest_runs (id, source, started_at, finished_at, stats_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    run.id.as_str(),
                    run.source.as_str(),
                    run.started_at.to_rfc3339(),
                    run.finished_at.to_rfc3339(),
                    stats
                ],
            )
            .await
            .map_err(|e| EucHubError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Most recent ingestion passes, newest first.
    pub async fn recent_ingest_runs(&self, limit: u32) -> Result<Vec<IngestRunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source, started_at, finished_at, stats_json
                 FROM ingest_runs ORDER BY started_at DESC LIMIT ?1",
                params![i64::from(limit)],
            )
            .await
            .map_err(|e| EucHubError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let stats: String = row
                .get(4)
                .map_err(|e| EucHubError::Storage(e.to_string()))?;
            results.push(IngestRunRecord {
                id: row
                    .get::<String>(0)
                    .map_err(|e| EucHubError::Storage(e.to_string()))?,
                source: row
                    .get::<String>(1)
                    .map_err(|e| EucHubError::Storage(e.to_string()))?
                    .parse()?,
                started_at: parse_timestamp(&row, 2)?,
                finished_at: parse_timestamp(&row, 3)?,
                stats: serde_json::from_str(&stats)
                    .map_err(|e| EucHubError::Storage(format!("invalid stats_json: {e}")))?,
            });
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// ItemStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ItemStore for Storage {
    async fn get(&self, id: &ItemId) -> Result<Option<Item>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                params![id.as_str()],
            )
            .await
            .map_err(|e| EucHubError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_item(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(EucHubError::Storage(e.to_string())),
        }
    }

    async fn update(
        &self,
        id: &ItemId,
        write: &ItemWrite,
        guard: WriteGuard,
    ) -> Result<WriteOutcome> {
        let mut values = vec![libsql::Value::Text(id.0.clone())];

        if guard == WriteGuard::Absent {
            let mut columns = vec!["id"];
            for (field, field_write) in write.fields() {
                columns.push(field.column());
                values.push(match field_write {
                    FieldWrite::Overwrite(v) | FieldWrite::SetIfAbsent(v) => v.to_sql()?,
                    FieldWrite::Clear => libsql::Value::Null,
                });
            }
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "INSERT INTO items ({}) VALUES ({}) ON CONFLICT(id) DO NOTHING",
                columns.join(", "),
                placeholders.join(", ")
            );
            let inserted = self
                .conn
                .execute(&sql, params_from_iter(values))
                .await
                .map_err(|e| EucHubError::Storage(e.to_string()))?;
            return Ok(if inserted == 0 {
                WriteOutcome::Conflict
            } else {
                WriteOutcome::Applied
            });
        }

        let mut sets = Vec::new();
        for (field, field_write) in write.fields() {
            let col = field.column();
            match field_write {
                FieldWrite::Overwrite(v) => {
                    values.push(v.to_sql()?);
                    sets.push(format!("{col} = ?{}", values.len()));
                }
                FieldWrite::SetIfAbsent(v) => {
                    values.push(v.to_sql()?);
                    sets.push(format!("{col} = COALESCE({col}, ?{})", values.len()));
                }
                FieldWrite::Clear => sets.push(format!("{col} = NULL")),
            }
        }
        if sets.is_empty() {
            sets.push("id = id".into());
        }

        let mut sql = format!("UPDATE items SET {} WHERE id = ?1", sets.join(", "));
        if let WriteGuard::UpdatedAt(expected) = &guard {
            values.push(match expected {
                Some(v) => libsql::Value::Text(v.clone()),
                None => libsql::Value::Null,
            });
            sql.push_str(&format!(" AND updated_at IS ?{}", values.len()));
        }

        let updated = self
            .conn
            .execute(&sql, params_from_iter(values))
            .await
            .map_err(|e| EucHubError::Storage(e.to_string()))?;

        // Not atomic with the UPDATE above; see `WriteOutcome`.
        if updated > 0 {
            Ok(WriteOutcome::Applied)
        } else if self.item_exists(id).await? {
            Ok(WriteOutcome::Conflict)
        } else {
            Ok(WriteOutcome::Missing)
        }
    }
}

// ---------------------------------------------------------------------------
// JobQueue
// ---------------------------------------------------------------------------

#[async_trait]
impl JobQueue for Storage {
    async fn enqueue(
        &self,
        stage: Stage,
        item_ids: &[ItemId],
        delay: Duration,
    ) -> Result<Option<String>> {
        let id = Uuid::now_v7().to_string();
        let ids_json =
            serde_json::to_string(item_ids).map_err(|e| EucHubError::Queue(e.to_string()))?;
        let available_at = now_millis() + duration_millis(delay);

        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO stage_jobs
                   (id, stage, item_ids_json, dedup_key, status, attempts, available_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6)",
                params![
                    id.as_str(),
                    stage.as_str(),
                    ids_json,
                    store::dedup_key(stage, item_ids),
                    available_at,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| EucHubError::Queue(e.to_string()))?;

        Ok((inserted > 0).then_some(id))
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<StageJob>> {
        let now = now_millis();
        let mut rows = self
            .conn
            .query(
                "UPDATE stage_jobs
                 SET status = 'running', attempts = attempts + 1, claimed_at = ?1
                 WHERE id IN (
                   SELECT id FROM stage_jobs
                   WHERE status = 'pending' AND available_at <= ?1
                   ORDER BY available_at LIMIT ?2
                 )
                 RETURNING id, stage, item_ids_json, attempts",
                params![now, limit as i64],
            )
            .await
            .map_err(|e| EucHubError::Queue(e.to_string()))?;

        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let stage: String = row.get(1).map_err(|e| EucHubError::Queue(e.to_string()))?;
            let ids_json: String = row.get(2).map_err(|e| EucHubError::Queue(e.to_string()))?;
            jobs.push(StageJob {
                id: row
                    .get::<String>(0)
                    .map_err(|e| EucHubError::Queue(e.to_string()))?,
                stage: stage.parse()?,
                item_ids: serde_json::from_str(&ids_json)
                    .map_err(|e| EucHubError::Queue(format!("invalid item_ids_json: {e}")))?,
                attempts: row.get::<u32>(3).unwrap_or(1),
            });
        }
        Ok(jobs)
    }

    async fn next_due_in(&self) -> Result<Option<Duration>> {
        let mut rows = self
            .conn
            .query(
                "SELECT MIN(available_at) FROM stage_jobs WHERE status = 'pending'",
                params![],
            )
            .await
            .map_err(|e| EucHubError::Queue(e.to_string()))?;

        let earliest = match rows.next().await {
            Ok(Some(row)) => row.get::<i64>(0).ok(),
            Ok(None) => None,
            Err(e) => return Err(EucHubError::Queue(e.to_string())),
        };
        Ok(earliest.map(|at| Duration::from_millis((at - now_millis()).max(0) as u64)))
    }

    async fn complete(&self, job_id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE stage_jobs SET status = 'done' WHERE id = ?1",
                params![job_id],
            )
            .await
            .map_err(|e| EucHubError::Queue(e.to_string()))?;
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str, retry_in: Option<Duration>) -> Result<()> {
        let result = match retry_in {
            // OR REPLACE folds this job into an identical one enqueued meanwhile.
            Some(delay) => {
                self.conn
                    .execute(
                        "UPDATE OR REPLACE stage_jobs
                         SET status = 'pending', available_at = ?2, last_error = ?3
                         WHERE id = ?1",
                        params![job_id, now_millis() + duration_millis(delay), error],
                    )
                    .await
            }
            None => {
                self.conn
                    .execute(
                        "UPDATE stage_jobs SET status = 'failed', last_error = ?2 WHERE id = ?1",
                        params![job_id, error],
                    )
                    .await
            }
        };
        result.map_err(|e| EucHubError::Queue(e.to_string()))?;
        Ok(())
    }

    async fn release_stale(&self, older_than: Duration) -> Result<u64> {
        let now = now_millis();
        self.conn
            .execute(
                "UPDATE OR REPLACE stage_jobs
                 SET status = 'pending', available_at = ?1
                 WHERE status = 'running' AND claimed_at <= ?2",
                params![now, now - duration_millis(older_than)],
            )
            .await
            .map_err(|e| EucHubError::Queue(e.to_string()))
    }

    async fn counts(&self) -> Result<Vec<QueueCount>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stage, status, COUNT(*) FROM stage_jobs
                 GROUP BY stage, status ORDER BY stage, status",
                params![],
            )
            .await
            .map_err(|e| EucHubError::Queue(e.to_string()))?;

        let mut counts = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let stage: String = row.get(0).map_err(|e| EucHubError::Queue(e.to_string()))?;
            let status: String = row.get(1).map_err(|e| EucHubError::Queue(e.to_string()))?;
            counts.push(QueueCount {
                stage: stage.parse()?,
                status: status.parse()?,
                count: row.get::<i64>(2).unwrap_or(0) as u64,
            });
        }
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Item totals for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStats {
    pub source: SourceKind,
    pub items: u64,
    pub summarized: u64,
    pub labeled: u64,
}

/// History row for one ingestion pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRunRecord {
    pub id: String,
    pub source: SourceKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Pass counters (new/changed/unchanged/failed/enrolled).
    pub stats: serde_json::Value,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn parse_timestamp(row: &libsql::Row, idx: i32) -> Result<DateTime<Utc>> {
    let s: String = row
        .get(idx)
        .map_err(|e| EucHubError::Storage(e.to_string()))?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EucHubError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row (in [`ITEM_COLUMNS`] order) to an [`Item`].
fn row_to_item(row: &libsql::Row) -> Result<Item> {
    let tags: String = row
        .get(4)
        .map_err(|e| EucHubError::Storage(e.to_string()))?;
    let label = row
        .get::<String>(10)
        .ok()
        .map(|s| {
            euchub_shared::ContentLabel::parse(&s)
                .ok_or_else(|| EucHubError::Storage(format!("unknown content label '{s}'")))
        })
        .transpose()?;

    Ok(Item {
        id: ItemId(
            row.get::<String>(0)
                .map_err(|e| EucHubError::Storage(e.to_string()))?,
        ),
        source: row
            .get::<String>(1)
            .map_err(|e| EucHubError::Storage(e.to_string()))?
            .parse()?,
        source_url: row
            .get::<String>(2)
            .map_err(|e| EucHubError::Storage(e.to_string()))?,
        title: row
            .get::<String>(3)
            .map_err(|e| EucHubError::Storage(e.to_string()))?,
        tag_list: serde_json::from_str(&tags)
            .map_err(|e| EucHubError::Storage(format!("invalid tag_list: {e}")))?,
        published_at: row.get::<String>(5).ok(),
        updated_at: row.get::<String>(6).ok(),
        author_display: row.get::<String>(7).ok(),
        body_text: row.get::<String>(8).ok(),
        ai_summary: row.get::<String>(9).ok(),
        content_label: label,
        label_confidence: row.get::<f64>(11).ok().map(|v| v as f32),
        last_ingested_at: parse_timestamp(row, 12)?,
    })
}
