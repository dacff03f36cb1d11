//! One incremental ingestion pass over a single source.
//!
//! Fetches the source's index, classifies every fetched item against the
//! store, applies the guarded write for its classification, and enrolls the
//! NEW and CHANGED ids into the source's first enrichment stage.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, instrument, warn};

use euchub_crawler::{FetchFailure, IndexFetch, MetadataFetcher};
use euchub_shared::{EucHubError, FetchedItem, ItemId, Result, SourceKind};
use euchub_storage::{ItemStore, WriteOutcome};

use crate::change::{ChangeKind, detect, guard_for, write_policy};
use crate::dispatch::{Enrollment, enroll};
use crate::pipeline::{PipelineContext, ProgressReporter};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Result of one ingestion pass.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub source: SourceKind,
    /// Items returned by the metadata fetcher.
    pub fetched: usize,
    pub new: Vec<ItemId>,
    pub changed: Vec<ItemId>,
    pub unchanged: usize,
    /// URLs the fetcher could not turn into items.
    pub fetch_failures: Vec<FetchFailure>,
    /// Items whose store write failed or kept conflicting.
    pub store_failures: Vec<(ItemId, String)>,
    pub enrollment: Enrollment,
    pub elapsed: Duration,
}

impl IngestReport {
    fn new(source: SourceKind) -> Self {
        Self {
            source,
            fetched: 0,
            new: Vec::new(),
            changed: Vec::new(),
            unchanged: 0,
            fetch_failures: Vec::new(),
            store_failures: Vec::new(),
            enrollment: Enrollment::default(),
            elapsed: Duration::ZERO,
        }
    }

    /// NEW and CHANGED ids, in fetch order within each group.
    pub fn enrollable(&self) -> Vec<ItemId> {
        self.new.iter().chain(self.changed.iter()).cloned().collect()
    }

    pub fn failed(&self) -> usize {
        self.fetch_failures.len() + self.store_failures.len()
    }
}

// ---------------------------------------------------------------------------
// Pass
// ---------------------------------------------------------------------------

/// Run one pass over `fetcher`'s source.
#[instrument(skip_all, fields(source = %fetcher.source()))]
pub async fn run_pass(
    ctx: &PipelineContext,
    fetcher: &dyn MetadataFetcher,
    progress: &dyn ProgressReporter,
) -> Result<IngestReport> {
    let start = Instant::now();
    let source = fetcher.source();
    let mut report = IngestReport::new(source);

    progress.phase(&format!("Fetching {source} index"));
    let IndexFetch { items, failures } = fetcher.fetch_index().await?;
    report.fetched = items.len();
    report.fetch_failures = failures;
    info!(items = report.fetched, failures = report.fetch_failures.len(), "index fetched");

    progress.phase("Detecting changes");
    let total = items.len();
    for (i, fetched) in items.iter().enumerate() {
        match ingest_item(ctx.store.as_ref(), fetched, ctx.config.write_conflict_retries).await {
            Ok(kind) => {
                match kind {
                    ChangeKind::New => report.new.push(fetched.id.clone()),
                    ChangeKind::Changed => report.changed.push(fetched.id.clone()),
                    ChangeKind::Unchanged => report.unchanged += 1,
                }
                progress.item_ingested(fetched.id.as_str(), kind, i + 1, total);
            }
            Err(e) => {
                warn!(id = %fetched.id, error = %e, "item write failed");
                report.store_failures.push((fetched.id.clone(), e.to_string()));
            }
        }
    }

    let ids = report.enrollable();
    if !ids.is_empty() {
        progress.phase("Enrolling for enrichment");
        report.enrollment = enroll(
            ctx.queue.as_ref(),
            source.entry_stage(),
            &ids,
            Duration::ZERO,
            &ctx.config,
        )
        .await;
    }

    report.elapsed = start.elapsed();
    info!(
        new = report.new.len(),
        changed = report.changed.len(),
        unchanged = report.unchanged,
        failed = report.failed(),
        jobs = report.enrollment.jobs,
        lost = report.enrollment.lost.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "pass complete"
    );
    Ok(report)
}

/// Classify and write one fetched item, re-reading after a guard conflict.
pub async fn ingest_item(
    store: &dyn ItemStore,
    fetched: &FetchedItem,
    conflict_retries: u32,
) -> Result<ChangeKind> {
    for attempt in 0..=conflict_retries {
        let stored = store.get(&fetched.id).await?;
        let kind = detect(fetched, stored.as_ref());
        let write = write_policy(kind, fetched, Utc::now());
        let guard = guard_for(kind, stored.as_ref());

        match store.update(&fetched.id, &write, guard).await? {
            WriteOutcome::Applied => return Ok(kind),
            // Conflict: a concurrent pass won. Missing: the row vanished
            // between read and write. Either way, classify again.
            WriteOutcome::Conflict | WriteOutcome::Missing => {
                warn!(id = %fetched.id, attempt, kind = kind.as_str(), "write guard did not hold");
            }
        }
    }

    Err(EucHubError::Conflict {
        id: fetched.id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use euchub_shared::{AUTHOR_PLACEHOLDER, BODY_PLACEHOLDER, Item, Stage};
    use euchub_storage::{ItemWrite, MemoryQueue, MemoryStore, WriteGuard};

    use crate::pipeline::SilentProgress;
    use crate::testing::{StaticFetcher, context, enriched_item, slow_fetched};

    #[tokio::test]
    async fn unchanged_pass_preserves_enrichment() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let before = enriched_item("builder-x", "2024-01-01");
        store.insert(before.clone()).unwrap();

        let ctx = context(store.clone(), queue.clone());
        let fetcher = StaticFetcher::new(SourceKind::Slow, vec![slow_fetched("builder-x", "2024-01-01")]);
        let report = run_pass(&ctx, &fetcher, &SilentProgress).await.unwrap();

        assert_eq!(report.unchanged, 1);
        assert!(report.enrollable().is_empty());
        assert!(queue.snapshot().is_empty());

        let after = store.get(&ItemId::from("builder-x")).await.unwrap().unwrap();
        assert_eq!(after.author_display, before.author_display);
        assert_eq!(after.body_text, before.body_text);
        assert_eq!(after.ai_summary, before.ai_summary);
        assert_eq!(after.content_label, before.content_label);
        assert_eq!(after.label_confidence, before.label_confidence);
        assert!(after.last_ingested_at > before.last_ingested_at);
    }

    #[tokio::test]
    async fn unchanged_pass_refreshes_published_date() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        store.insert(enriched_item("builder-x", "2024-01-01")).unwrap();

        let ctx = context(store.clone(), queue.clone());
        let mut corrected = slow_fetched("builder-x", "2024-01-01");
        corrected.published_at = "2023-12-15".into();
        let fetcher = StaticFetcher::new(SourceKind::Slow, vec![corrected]);
        let report = run_pass(&ctx, &fetcher, &SilentProgress).await.unwrap();

        assert_eq!(report.unchanged, 1);
        let after = store.get(&ItemId::from("builder-x")).await.unwrap().unwrap();
        assert_eq!(after.published_at.as_deref(), Some("2023-12-15"));
        assert_eq!(after.ai_summary.as_deref(), Some("S1"));
        assert!(queue.snapshot().is_empty());
    }

    #[tokio::test]
    async fn changed_pass_resets_and_enrolls() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        store.insert(enriched_item("builder-x", "2024-01-01")).unwrap();

        let ctx = context(store.clone(), queue.clone());
        let fetcher = StaticFetcher::new(SourceKind::Slow, vec![slow_fetched("builder-x", "2024-02-01")]);
        let report = run_pass(&ctx, &fetcher, &SilentProgress).await.unwrap();

        assert_eq!(report.changed, vec![ItemId::from("builder-x")]);

        let after = store.get(&ItemId::from("builder-x")).await.unwrap().unwrap();
        assert_eq!(after.author_display.as_deref(), Some(AUTHOR_PLACEHOLDER));
        assert_eq!(after.ai_summary, None);
        assert_eq!(after.content_label, None);
        assert_eq!(after.updated_at.as_deref(), Some("2024-02-01"));

        let jobs = queue.snapshot();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].stage, Stage::FetchContent);
        assert_eq!(jobs[0].item_ids, vec![ItemId::from("builder-x")]);
    }

    #[tokio::test]
    async fn new_item_is_created_with_placeholders() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let ctx = context(store.clone(), queue.clone());

        let fetcher = StaticFetcher::new(SourceKind::Slow, vec![slow_fetched("builder-new", "2024-03-01")]);
        let report = run_pass(&ctx, &fetcher, &SilentProgress).await.unwrap();
        assert_eq!(report.new, vec![ItemId::from("builder-new")]);

        let item = store.get(&ItemId::from("builder-new")).await.unwrap().unwrap();
        assert_eq!(item.author_display.as_deref(), Some(AUTHOR_PLACEHOLDER));
        assert_eq!(item.body_text.as_deref(), Some(BODY_PLACEHOLDER));
        assert_eq!(item.ai_summary, None);
        assert_eq!(item.content_label, None);
        assert_eq!(item.label_confidence, None);
        assert_eq!(queue.snapshot()[0].item_ids, vec![ItemId::from("builder-new")]);
    }

    #[tokio::test]
    async fn only_new_and_changed_ids_are_enrolled() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        store.insert(enriched_item("builder-same", "2024-01-01")).unwrap();
        store.insert(enriched_item("builder-edit", "2024-01-01")).unwrap();

        let ctx = context(store.clone(), queue.clone());
        let fetcher = StaticFetcher::new(
            SourceKind::Slow,
            vec![
                slow_fetched("builder-same", "2024-01-01"),
                slow_fetched("builder-edit", "2024-05-05"),
                slow_fetched("builder-fresh", "2024-05-06"),
            ],
        );
        run_pass(&ctx, &fetcher, &SilentProgress).await.unwrap();

        let enrolled: Vec<ItemId> = queue
            .snapshot()
            .into_iter()
            .flat_map(|job| job.item_ids)
            .collect();
        assert_eq!(
            enrolled,
            vec![ItemId::from("builder-fresh"), ItemId::from("builder-edit")]
        );
    }

    #[tokio::test]
    async fn non_placeholder_author_survives_unchanged_passes() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let ctx = context(store.clone(), queue.clone());
        let fetcher = StaticFetcher::new(SourceKind::Slow, vec![slow_fetched("builder-x", "2024-01-01")]);

        run_pass(&ctx, &fetcher, &SilentProgress).await.unwrap();
        // Full-content stage replaced the placeholder.
        store
            .update(
                &ItemId::from("builder-x"),
                &ItemWrite::new().overwrite(euchub_storage::ItemField::AuthorDisplay, "Jane Doe"),
                WriteGuard::Exists,
            )
            .await
            .unwrap();

        for _ in 0..3 {
            run_pass(&ctx, &fetcher, &SilentProgress).await.unwrap();
        }
        let item = store.get(&ItemId::from("builder-x")).await.unwrap().unwrap();
        assert_eq!(item.author_display.as_deref(), Some("Jane Doe"));
    }

    /// A store whose first guarded write always loses the race.
    struct RacingStore {
        inner: MemoryStore,
        races_left: std::sync::Mutex<u32>,
    }

    #[async_trait]
    impl ItemStore for RacingStore {
        async fn get(&self, id: &ItemId) -> Result<Option<Item>> {
            self.inner.get(id).await
        }

        async fn update(&self, id: &ItemId, write: &ItemWrite, guard: WriteGuard) -> Result<WriteOutcome> {
            let raced = {
                let mut races = self.races_left.lock().unwrap();
                let raced = *races > 0;
                if raced {
                    *races -= 1;
                }
                raced
            };
            if raced {
                return Ok(WriteOutcome::Conflict);
            }
            self.inner.update(id, write, guard).await
        }
    }

    #[tokio::test]
    async fn conflicts_are_retried_then_reported() {
        let racing = RacingStore {
            inner: MemoryStore::new(),
            races_left: std::sync::Mutex::new(2),
        };
        let fetched = slow_fetched("builder-x", "2024-01-01");
        assert_eq!(ingest_item(&racing, &fetched, 3).await.unwrap(), ChangeKind::New);

        let always = RacingStore {
            inner: MemoryStore::new(),
            races_left: std::sync::Mutex::new(u32::MAX),
        };
        let err = ingest_item(&always, &fetched, 3).await.unwrap_err();
        assert!(matches!(err, EucHubError::Conflict { .. }));
    }

    /// A store whose first read returns a row that has since been deleted.
    struct StaleReadStore {
        inner: MemoryStore,
        stale: std::sync::Mutex<Option<Item>>,
    }

    #[async_trait]
    impl ItemStore for StaleReadStore {
        async fn get(&self, id: &ItemId) -> Result<Option<Item>> {
            let stale = self.stale.lock().unwrap().take();
            match stale {
                Some(item) => Ok(Some(item)),
                None => self.inner.get(id).await,
            }
        }

        async fn update(&self, id: &ItemId, write: &ItemWrite, guard: WriteGuard) -> Result<WriteOutcome> {
            self.inner.update(id, write, guard).await
        }
    }

    #[tokio::test]
    async fn vanished_row_is_reclassified_as_new() {
        let store = StaleReadStore {
            inner: MemoryStore::new(),
            stale: std::sync::Mutex::new(Some(enriched_item("builder-x", "2024-01-01"))),
        };
        let fetched = slow_fetched("builder-x", "2024-01-01");

        assert_eq!(ingest_item(&store, &fetched, 3).await.unwrap(), ChangeKind::New);
        let item = store.inner.get(&ItemId::from("builder-x")).await.unwrap().unwrap();
        assert_eq!(item.author_display.as_deref(), Some(AUTHOR_PLACEHOLDER));
        assert_eq!(item.ai_summary, None);
    }

    #[tokio::test]
    async fn index_failure_fails_the_pass() {
        let ctx = context(Arc::new(MemoryStore::new()), Arc::new(MemoryQueue::new()));
        let fetcher = StaticFetcher::failing(SourceKind::Fast);
        assert!(run_pass(&ctx, &fetcher, &SilentProgress).await.is_err());
    }
}
