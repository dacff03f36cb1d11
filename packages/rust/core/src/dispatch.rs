//! Enrollment of item ids into the stage queue.

use std::time::Duration;

use tracing::{debug, warn};

use euchub_shared::{ItemId, PipelineConfig, Stage};
use euchub_storage::JobQueue;

/// Outcome of enrolling a set of ids into one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrollment {
    /// Jobs newly queued.
    pub jobs: usize,
    /// Batches skipped because an identical job was already pending.
    pub duplicates: usize,
    /// Ids whose batch could not be enqueued after every attempt.
    pub lost: Vec<ItemId>,
}

impl Enrollment {
    pub fn merge(&mut self, other: Enrollment) {
        self.jobs += other.jobs;
        self.duplicates += other.duplicates;
        self.lost.extend(other.lost);
    }
}

/// Split `ids` into `batch_size` chunks and enqueue chunk *i* for `stage`
/// after `base_delay + i * inter_batch_delay`.
///
/// An enqueue that keeps failing loses only its own chunk; the remaining
/// chunks are still attempted.
pub async fn enroll(
    queue: &dyn JobQueue,
    stage: Stage,
    ids: &[ItemId],
    base_delay: Duration,
    config: &PipelineConfig,
) -> Enrollment {
    let mut out = Enrollment::default();

    for (i, chunk) in ids.chunks(config.batch_size.max(1)).enumerate() {
        let delay = base_delay + config.inter_batch_delay * i as u32;
        match enqueue_with_retry(queue, stage, chunk, delay, config.enqueue_attempts).await {
            Some(Some(job_id)) => {
                debug!(%stage, job_id, ids = chunk.len(), delay_ms = delay.as_millis() as u64, "enqueued batch");
                out.jobs += 1;
            }
            Some(None) => out.duplicates += 1,
            None => out.lost.extend_from_slice(chunk),
        }
    }

    out
}

/// `Some(result)` on success, `None` once every attempt has failed.
async fn enqueue_with_retry(
    queue: &dyn JobQueue,
    stage: Stage,
    chunk: &[ItemId],
    delay: Duration,
    attempts: u32,
) -> Option<Option<String>> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match queue.enqueue(stage, chunk, delay).await {
            Ok(job) => return Some(job),
            Err(e) => warn!(%stage, attempt, attempts, error = %e, "enqueue failed"),
        }
    }
    let ids: Vec<&str> = chunk.iter().map(ItemId::as_str).collect();
    warn!(%stage, ?ids, "batch could not be enqueued");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use euchub_storage::MemoryQueue;

    fn ids(n: usize) -> Vec<ItemId> {
        (0..n).map(|i| ItemId(format!("item-{i}"))).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_with_staggered_delays() {
        let queue = MemoryQueue::new();
        let config = PipelineConfig::default();

        let out = enroll(&queue, Stage::FetchContent, &ids(12), Duration::ZERO, &config).await;
        assert_eq!(out.jobs, 3);
        assert!(out.lost.is_empty());

        let jobs = queue.snapshot();
        let sizes: Vec<usize> = jobs.iter().map(|j| j.item_ids.len()).collect();
        assert_eq!(sizes, vec![5, 5, 2]);
        let delays: Vec<u64> = jobs.iter().map(|j| j.due_in.as_secs()).collect();
        assert_eq!(delays, vec![0, 2, 4]);
        assert!(jobs.iter().all(|j| j.stage == Stage::FetchContent));
    }

    #[tokio::test]
    async fn retries_transient_enqueue_failures() {
        let queue = MemoryQueue::new();
        queue.fail_next_enqueues(2);

        let out = enroll(&queue, Stage::Summarize, &ids(3), Duration::ZERO, &PipelineConfig::default()).await;
        assert_eq!(out.jobs, 1);
        assert!(out.lost.is_empty());
    }

    #[tokio::test]
    async fn reports_lost_ids_after_final_failure() {
        let queue = MemoryQueue::new();
        queue.fail_next_enqueues(3);

        let out = enroll(&queue, Stage::Summarize, &ids(7), Duration::ZERO, &PipelineConfig::default()).await;
        assert_eq!(out.jobs, 1);
        assert_eq!(out.lost, ids(5));
    }

    #[tokio::test]
    async fn identical_pending_batch_is_not_duplicated() {
        let queue = MemoryQueue::new();
        let config = PipelineConfig::default();
        enroll(&queue, Stage::Classify, &ids(2), Duration::ZERO, &config).await;
        let again = enroll(&queue, Stage::Classify, &ids(2), Duration::ZERO, &config).await;
        assert_eq!(again.jobs, 0);
        assert_eq!(again.duplicates, 1);
        assert_eq!(queue.snapshot().len(), 1);
    }
}
