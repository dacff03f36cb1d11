//! Store and queue abstractions consumed by the pipeline.
//!
//! [`crate::Storage`] implements both against libSQL; [`crate::MemoryStore`]
//! and [`crate::MemoryQueue`] are drop-in in-process doubles.

use std::time::Duration;

use async_trait::async_trait;
use euchub_shared::{EucHubError, Item, ItemId, Result, Stage};
use sha2::{Digest, Sha256};

use crate::write::{ItemWrite, WriteGuard, WriteOutcome};

/// Keyed item storage with guarded field-level writes.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Fetch an item by id.
    async fn get(&self, id: &ItemId) -> Result<Option<Item>>;

    /// Apply `write` to item `id` if `guard` holds. The whole write is atomic.
    async fn update(&self, id: &ItemId, write: &ItemWrite, guard: WriteGuard)
    -> Result<WriteOutcome>;
}

// ---------------------------------------------------------------------------
// Stage queue
// ---------------------------------------------------------------------------

/// Lifecycle of a queued stage job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = EucHubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(EucHubError::Queue(format!("unknown job status '{other}'"))),
        }
    }
}

/// A claimed unit of work: one stage over an explicit id batch.
#[derive(Debug, Clone, PartialEq)]
pub struct StageJob {
    pub id: String,
    pub stage: Stage,
    pub item_ids: Vec<ItemId>,
    /// Number of times this job has been claimed, including the current one.
    pub attempts: u32,
}

/// Count of jobs per stage and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueCount {
    pub stage: Stage,
    pub status: JobStatus,
    pub count: u64,
}

/// Durable at-least-once queue of stage jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Make a job available after `delay`. Returns `None` when an identical
    /// job is already pending.
    async fn enqueue(&self, stage: Stage, item_ids: &[ItemId], delay: Duration)
    -> Result<Option<String>>;

    /// Claim up to `limit` due jobs, marking them running.
    async fn claim_due(&self, limit: usize) -> Result<Vec<StageJob>>;

    /// Time until the earliest pending job becomes due, if any are pending.
    async fn next_due_in(&self) -> Result<Option<Duration>>;

    async fn complete(&self, job_id: &str) -> Result<()>;

    /// Record a failure. With `retry_in` the job returns to pending after
    /// that delay; without it the job is parked as failed.
    async fn fail(&self, job_id: &str, error: &str, retry_in: Option<Duration>) -> Result<()>;

    /// Return jobs stuck in `running` for longer than `older_than` to pending.
    async fn release_stale(&self, older_than: Duration) -> Result<u64>;

    async fn counts(&self) -> Result<Vec<QueueCount>>;
}

/// Dedup key for a pending job: SHA-256 over the stage and ordered ids.
pub(crate) fn dedup_key(stage: Stage, item_ids: &[ItemId]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stage.as_str().as_bytes());
    for id in item_ids {
        hasher.update(b"\0");
        hasher.update(id.as_str().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
