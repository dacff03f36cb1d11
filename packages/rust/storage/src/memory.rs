//! In-memory [`ItemStore`] and [`JobQueue`] implementations.
//!
//! Both use `HashMap`/`Vec` behind `std::sync::Mutex`, so every operation is
//! atomic with respect to the others, matching the single-statement
//! guarantees of the libSQL backend.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use euchub_shared::{EucHubError, Item, ItemId, Result, Stage};
use tokio::time::Instant;
use uuid::Uuid;

use crate::store::{ItemStore, JobQueue, JobStatus, QueueCount, StageJob, dedup_key};
use crate::write::{ItemWrite, WriteGuard, WriteOutcome};

fn poisoned<T>(_: T) -> EucHubError {
    EucHubError::Storage("memory store lock poisoned".into())
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory item store.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<ItemId, Item>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or replace an item directly, bypassing guards.
    pub fn insert(&self, item: Item) -> Result<()> {
        self.items
            .lock()
            .map_err(poisoned)?
            .insert(item.id.clone(), item);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn get(&self, id: &ItemId) -> Result<Option<Item>> {
        Ok(self.items.lock().map_err(poisoned)?.get(id).cloned())
    }

    async fn update(
        &self,
        id: &ItemId,
        write: &ItemWrite,
        guard: WriteGuard,
    ) -> Result<WriteOutcome> {
        let mut items = self.items.lock().map_err(poisoned)?;

        if guard == WriteGuard::Absent {
            if items.contains_key(id) {
                return Ok(WriteOutcome::Conflict);
            }
            let item = write.build_item(id)?;
            items.insert(id.clone(), item);
            return Ok(WriteOutcome::Applied);
        }

        let Some(stored) = items.get_mut(id) else {
            return Ok(WriteOutcome::Missing);
        };
        if let WriteGuard::UpdatedAt(expected) = &guard {
            if stored.updated_at != *expected {
                return Ok(WriteOutcome::Conflict);
            }
        }

        // Apply to a copy so a rejected value leaves the stored item intact.
        let mut updated = stored.clone();
        write.apply_to(&mut updated)?;
        *stored = updated;
        Ok(WriteOutcome::Applied)
    }
}

// ---------------------------------------------------------------------------
// MemoryQueue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemoryJob {
    id: String,
    stage: Stage,
    item_ids: Vec<ItemId>,
    dedup_key: String,
    status: JobStatus,
    attempts: u32,
    available_at: Instant,
    claimed_at: Option<Instant>,
    last_error: Option<String>,
}

/// A job as seen by tests inspecting the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub stage: Stage,
    pub item_ids: Vec<ItemId>,
    pub status: JobStatus,
    pub attempts: u32,
    /// Delay relative to the moment of the snapshot; zero when already due.
    pub due_in: Duration,
    pub last_error: Option<String>,
}

/// In-memory stage queue.
#[derive(Default)]
pub struct MemoryQueue {
    jobs: Mutex<Vec<MemoryJob>>,
    failing_enqueues: AtomicU32,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` enqueue calls fail.
    pub fn fail_next_enqueues(&self, n: u32) {
        self.failing_enqueues.store(n, Ordering::SeqCst);
    }

    /// Jobs in enqueue order.
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        let now = Instant::now();
        self.jobs
            .lock()
            .map(|jobs| {
                jobs.iter()
                    .map(|job| JobSnapshot {
                        stage: job.stage,
                        item_ids: job.item_ids.clone(),
                        status: job.status,
                        attempts: job.attempts,
                        due_in: job.available_at.saturating_duration_since(now),
                        last_error: job.last_error.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(
        &self,
        stage: Stage,
        item_ids: &[ItemId],
        delay: Duration,
    ) -> Result<Option<String>> {
        let failing = self.failing_enqueues.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_enqueues.store(failing - 1, Ordering::SeqCst);
            return Err(EucHubError::Queue("injected enqueue failure".into()));
        }

        let key = dedup_key(stage, item_ids);
        let mut jobs = self.jobs.lock().map_err(poisoned)?;
        if jobs
            .iter()
            .any(|j| j.status == JobStatus::Pending && j.dedup_key == key)
        {
            return Ok(None);
        }

        let id = Uuid::now_v7().to_string();
        jobs.push(MemoryJob {
            id: id.clone(),
            stage,
            item_ids: item_ids.to_vec(),
            dedup_key: key,
            status: JobStatus::Pending,
            attempts: 0,
            available_at: Instant::now() + delay,
            claimed_at: None,
            last_error: None,
        });
        Ok(Some(id))
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<StageJob>> {
        let now = Instant::now();
        let mut jobs = self.jobs.lock().map_err(poisoned)?;

        let mut due: Vec<&mut MemoryJob> = jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending && j.available_at <= now)
            .collect();
        due.sort_by_key(|j| j.available_at);

        Ok(due
            .into_iter()
            .take(limit)
            .map(|job| {
                job.status = JobStatus::Running;
                job.attempts += 1;
                job.claimed_at = Some(now);
                StageJob {
                    id: job.id.clone(),
                    stage: job.stage,
                    item_ids: job.item_ids.clone(),
                    attempts: job.attempts,
                }
            })
            .collect())
    }

    async fn next_due_in(&self) -> Result<Option<Duration>> {
        let now = Instant::now();
        let jobs = self.jobs.lock().map_err(poisoned)?;
        Ok(jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .map(|j| j.available_at.saturating_duration_since(now))
            .min())
    }

    async fn complete(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().map_err(poisoned)?;
        let job = find_job(&mut jobs, job_id)?;
        job.status = JobStatus::Done;
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str, retry_in: Option<Duration>) -> Result<()> {
        let mut jobs = self.jobs.lock().map_err(poisoned)?;
        let job = find_job(&mut jobs, job_id)?;
        job.last_error = Some(error.to_string());
        match retry_in {
            Some(delay) => {
                job.status = JobStatus::Pending;
                job.available_at = Instant::now() + delay;
            }
            None => job.status = JobStatus::Failed,
        }
        Ok(())
    }

    async fn release_stale(&self, older_than: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut jobs = self.jobs.lock().map_err(poisoned)?;
        let mut released = 0;
        for job in jobs.iter_mut().filter(|j| j.status == JobStatus::Running) {
            if job
                .claimed_at
                .is_some_and(|at| now.saturating_duration_since(at) >= older_than)
            {
                job.status = JobStatus::Pending;
                job.available_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn counts(&self) -> Result<Vec<QueueCount>> {
        let jobs = self.jobs.lock().map_err(poisoned)?;
        let mut counts: HashMap<(Stage, JobStatus), u64> = HashMap::new();
        for job in jobs.iter() {
            *counts.entry((job.stage, job.status)).or_default() += 1;
        }
        let mut out: Vec<QueueCount> = counts
            .into_iter()
            .map(|((stage, status), count)| QueueCount {
                stage,
                status,
                count,
            })
            .collect();
        out.sort_by_key(|c| (c.stage.as_str(), c.status.as_str()));
        Ok(out)
    }
}

fn find_job<'a>(jobs: &'a mut [MemoryJob], job_id: &str) -> Result<&'a mut MemoryJob> {
    jobs.iter_mut()
        .find(|j| j.id == job_id)
        .ok_or_else(|| EucHubError::Queue(format!("job {job_id} not found")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::ItemField;
    use chrono::Utc;
    use euchub_shared::SourceKind;

    fn insert_write(updated_at: &str) -> ItemWrite {
        ItemWrite::new()
            .overwrite(ItemField::Source, SourceKind::Fast)
            .overwrite(ItemField::SourceUrl, "https://example.com/blog/a")
            .overwrite(ItemField::Title, "A")
            .overwrite(ItemField::TagList, Vec::<String>::new())
            .overwrite(ItemField::UpdatedAt, updated_at)
            .overwrite(ItemField::LastIngestedAt, Utc::now())
    }

    #[tokio::test]
    async fn guarded_writes() {
        let store = MemoryStore::new();
        let id = ItemId::from("a");

        let out = store
            .update(&id, &insert_write("1"), WriteGuard::Absent)
            .await
            .unwrap();
        assert_eq!(out, WriteOutcome::Applied);

        // Second insert loses
        let out = store
            .update(&id, &insert_write("1"), WriteGuard::Absent)
            .await
            .unwrap();
        assert_eq!(out, WriteOutcome::Conflict);

        // Stale change signal loses
        let write = ItemWrite::new().overwrite(ItemField::Title, "B");
        let out = store
            .update(&id, &write, WriteGuard::UpdatedAt(Some("0".into())))
            .await
            .unwrap();
        assert_eq!(out, WriteOutcome::Conflict);

        let out = store
            .update(&id, &write, WriteGuard::UpdatedAt(Some("1".into())))
            .await
            .unwrap();
        assert_eq!(out, WriteOutcome::Applied);
        assert_eq!(store.get(&id).await.unwrap().unwrap().title, "B");

        let out = store
            .update(&ItemId::from("zzz"), &write, WriteGuard::Exists)
            .await
            .unwrap();
        assert_eq!(out, WriteOutcome::Missing);
    }

    #[tokio::test]
    async fn queue_dedups_pending_jobs() {
        let queue = MemoryQueue::new();
        let ids = vec![ItemId::from("a")];
        assert!(
            queue
                .enqueue(Stage::Summarize, &ids, Duration::ZERO)
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            queue
                .enqueue(Stage::Summarize, &ids, Duration::ZERO)
                .await
                .unwrap()
                .is_none()
        );

        let claimed = queue.claim_due(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 1);

        // Once running, an identical job may be queued again
        assert!(
            queue
                .enqueue(Stage::Summarize, &ids, Duration::ZERO)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_jobs_become_due() {
        let queue = MemoryQueue::new();
        queue
            .enqueue(Stage::Classify, &[ItemId::from("a")], Duration::from_secs(2))
            .await
            .unwrap();

        assert!(queue.claim_due(10).await.unwrap().is_empty());
        assert_eq!(
            queue.next_due_in().await.unwrap(),
            Some(Duration::from_secs(2))
        );

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(queue.claim_due(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fail_with_and_without_retry() {
        let queue = MemoryQueue::new();
        queue
            .enqueue(Stage::Summarize, &[ItemId::from("a")], Duration::ZERO)
            .await
            .unwrap();
        let job = queue.claim_due(1).await.unwrap().remove(0);

        queue.fail(&job.id, "quota", Some(Duration::ZERO)).await.unwrap();
        let job = queue.claim_due(1).await.unwrap().remove(0);
        assert_eq!(job.attempts, 2);

        queue.fail(&job.id, "quota", None).await.unwrap();
        let snap = queue.snapshot();
        assert_eq!(snap[0].status, JobStatus::Failed);
        assert_eq!(snap[0].last_error.as_deref(), Some("quota"));
    }

    #[tokio::test]
    async fn release_stale_requeues_running_jobs() {
        let queue = MemoryQueue::new();
        queue
            .enqueue(Stage::FetchContent, &[ItemId::from("a")], Duration::ZERO)
            .await
            .unwrap();
        queue.claim_due(1).await.unwrap();

        assert_eq!(queue.release_stale(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(queue.claim_due(1).await.unwrap().len(), 1);
    }
}
