//! Execution of one claimed stage job.
//!
//! A job processes at most `batch_size` ids, one at a time. Per-item problems
//! are logged and counted; only a systemic text-generation failure (or a
//! store/queue error) fails the job, in which case nothing is chained. A job
//! whose tail or next-stage enqueue is lost also fails, so the queue retries it.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use euchub_shared::{EucHubError, Item, ItemId, Result, Stage};
use euchub_storage::{FieldValue, ItemField, ItemWrite, StageJob, WriteGuard, WriteOutcome};

use crate::dispatch::{Enrollment, enroll};
use crate::enrichment::{
    TaskType, classify_prompt, parse_classification, summarizable_body, summary_prompt,
};
use crate::llm::TextGenerator;
use crate::pipeline::PipelineContext;

/// What happened to one id within a stage batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Written,
    Skipped,
    Failed,
}

/// Summary of one stage job execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub processed: usize,
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Ids beyond `batch_size`, handed back to the same stage.
    pub requeued: Enrollment,
    /// The processed batch enrolled into the next stage.
    pub chained: Enrollment,
}

/// Run `job` to completion.
#[instrument(skip_all, fields(stage = %job.stage, job_id = %job.id, ids = job.item_ids.len()))]
pub async fn run_stage(ctx: &PipelineContext, job: &StageJob) -> Result<StageReport> {
    let split = job.item_ids.len().min(ctx.config.batch_size.max(1));
    let (batch, rest) = job.item_ids.split_at(split);

    let mut report = StageReport::default();
    for id in batch {
        let outcome = match job.stage {
            Stage::FetchContent => fetch_content(ctx, id).await?,
            Stage::Summarize => summarize(ctx, id).await?,
            Stage::Classify => classify(ctx, id).await?,
        };
        report.processed += 1;
        match outcome {
            ItemOutcome::Written => report.written += 1,
            ItemOutcome::Skipped => report.skipped += 1,
            ItemOutcome::Failed => report.failed += 1,
        }
    }

    if !rest.is_empty() {
        report.requeued = enroll(
            ctx.queue.as_ref(),
            job.stage,
            rest,
            ctx.config.inter_batch_delay,
            &ctx.config,
        )
        .await;
    }

    if let Some(next) = job.stage.next() {
        report.chained = enroll(ctx.queue.as_ref(), next, batch, Duration::ZERO, &ctx.config).await;
    }

    // Ids that were not handed on must come back through the job's own retry.
    let lost: Vec<&str> = report
        .requeued
        .lost
        .iter()
        .chain(&report.chained.lost)
        .map(ItemId::as_str)
        .collect();
    if !lost.is_empty() {
        return Err(EucHubError::Queue(format!(
            "{} id(s) could not be enqueued after {}: {}",
            lost.len(),
            job.stage,
            lost.join(", ")
        )));
    }

    info!(
        written = report.written,
        skipped = report.skipped,
        failed = report.failed,
        requeued = rest.len(),
        "stage batch complete"
    );
    Ok(report)
}

/// Load an item for enrichment; missing ids are skipped.
async fn load(ctx: &PipelineContext, id: &ItemId) -> Result<Option<Item>> {
    let item = ctx.store.get(id).await?;
    if item.is_none() {
        warn!(%id, "item not found, skipping");
    }
    Ok(item)
}

/// Write guarded on the change signal read at load time, so a concurrent
/// CHANGED pass is never overwritten with stale enrichment.
async fn write(ctx: &PipelineContext, item: &Item, update: ItemWrite) -> Result<ItemOutcome> {
    let guard = WriteGuard::UpdatedAt(item.updated_at.clone());
    match ctx.store.update(&item.id, &update, guard).await? {
        WriteOutcome::Applied => Ok(ItemOutcome::Written),
        WriteOutcome::Conflict | WriteOutcome::Missing => {
            warn!(id = %item.id, "item changed during enrichment, result discarded");
            Ok(ItemOutcome::Skipped)
        }
    }
}

fn generator(ctx: &PipelineContext) -> Result<&dyn TextGenerator> {
    ctx.generator
        .as_deref()
        .ok_or_else(|| EucHubError::config("no text generator configured"))
}

/// Per-item generation failures become `None`; systemic ones abort the job.
async fn generate(
    generator: &dyn TextGenerator,
    id: &ItemId,
    task: TaskType,
    prompt: &str,
) -> Result<Option<String>> {
    match generator.generate(prompt, task.max_tokens()).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.is_systemic() => Err(e.into()),
        Err(e) => {
            warn!(
                %id,
                task = task.as_str(),
                model = generator.model(),
                error = %e,
                "generation failed, leaving field empty"
            );
            Ok(None)
        }
    }
}

async fn fetch_content(ctx: &PipelineContext, id: &ItemId) -> Result<ItemOutcome> {
    let Some(item) = load(ctx, id).await? else {
        return Ok(ItemOutcome::Skipped);
    };

    let content = match ctx.content.fetch_content(&item).await {
        Ok(Some(content)) => content,
        Ok(None) => {
            debug!(%id, "no author on page, record left untouched");
            return Ok(ItemOutcome::Skipped);
        }
        Err(e) => {
            warn!(%id, error = %e, "full-content fetch failed");
            return Ok(ItemOutcome::Failed);
        }
    };

    let mut update = ItemWrite::new()
        .overwrite(ItemField::AuthorDisplay, content.author)
        .overwrite(ItemField::BodyText, content.body)
        .overwrite(ItemField::LastIngestedAt, Utc::now());
    if let Some(title) = content.title {
        update = update.overwrite(ItemField::Title, title);
    }
    write(ctx, &item, update).await
}

async fn summarize(ctx: &PipelineContext, id: &ItemId) -> Result<ItemOutcome> {
    let generator = generator(ctx)?;
    let Some(item) = load(ctx, id).await? else {
        return Ok(ItemOutcome::Skipped);
    };

    let body = match summarizable_body(&item) {
        Ok(body) => body,
        Err(reason) => {
            debug!(%id, reason = reason.as_str(), "not summarizable");
            return Ok(ItemOutcome::Skipped);
        }
    };

    let prompt = summary_prompt(&item, body);
    match generate(generator, id, TaskType::Summarize, &prompt).await? {
        Some(summary) => {
            write(ctx, &item, ItemWrite::new().overwrite(ItemField::AiSummary, summary)).await
        }
        None => Ok(ItemOutcome::Failed),
    }
}

async fn classify(ctx: &PipelineContext, id: &ItemId) -> Result<ItemOutcome> {
    let generator = generator(ctx)?;
    let Some(item) = load(ctx, id).await? else {
        return Ok(ItemOutcome::Skipped);
    };

    if item.ai_summary.is_none() && summarizable_body(&item).is_err() {
        debug!(%id, "nothing to classify");
        return Ok(ItemOutcome::Skipped);
    }

    let prompt = classify_prompt(&item);
    let Some(response) = generate(generator, id, TaskType::Classify, &prompt).await? else {
        return Ok(ItemOutcome::Failed);
    };

    let Some(classification) = parse_classification(&response) else {
        warn!(%id, %response, "unusable classification response");
        return Ok(ItemOutcome::Failed);
    };

    debug!(
        %id,
        model = generator.model(),
        label = %classification.label,
        confidence = classification.confidence,
        reasoning = classification.reasoning.as_deref().unwrap_or_default(),
        "classified"
    );
    let update = ItemWrite::new()
        .overwrite(ItemField::ContentLabel, classification.label)
        .overwrite(
            ItemField::LabelConfidence,
            FieldValue::Real(f64::from(classification.confidence)),
        );
    write(ctx, &item, update).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use euchub_shared::{AUTHOR_PLACEHOLDER, BODY_PLACEHOLDER};
    use euchub_storage::{ItemStore, MemoryQueue, MemoryStore};

    use crate::testing::{ScriptedGenerator, StaticContent, context, fast_item, placeholder_item};

    fn job(stage: Stage, ids: &[&str]) -> StageJob {
        StageJob {
            id: "job-1".into(),
            stage,
            item_ids: ids.iter().map(|id| ItemId::from(*id)).collect(),
            attempts: 1,
        }
    }

    #[tokio::test]
    async fn page_without_author_leaves_placeholders() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        store.insert(placeholder_item("builder-x", "2024-01-01")).unwrap();
        let ctx = context(store.clone(), queue.clone());

        let report = run_stage(&ctx, &job(Stage::FetchContent, &["builder-x"])).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.chained.jobs, 1);

        let item = store.get(&ItemId::from("builder-x")).await.unwrap().unwrap();
        assert_eq!(item.author_display.as_deref(), Some(AUTHOR_PLACEHOLDER));
        assert_eq!(item.body_text.as_deref(), Some(BODY_PLACEHOLDER));
    }

    #[tokio::test]
    async fn missing_items_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let mut ctx = context(store, queue.clone());
        ctx.generator = Some(Arc::new(ScriptedGenerator::new(|_| Ok("unused".into()))));

        let report = run_stage(&ctx, &job(Stage::Summarize, &["ghost"])).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn placeholder_body_is_not_summarized_or_classified() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        store.insert(placeholder_item("builder-x", "2024-01-01")).unwrap();
        let mut ctx = context(store.clone(), queue.clone());
        ctx.generator = Some(Arc::new(ScriptedGenerator::new(|_| {
            panic!("generator must not be called")
        })));

        let summarize = run_stage(&ctx, &job(Stage::Summarize, &["builder-x"])).await.unwrap();
        assert_eq!(summarize.skipped, 1);
        let classify = run_stage(&ctx, &job(Stage::Classify, &["builder-x"])).await.unwrap();
        assert_eq!(classify.skipped, 1);
        assert_eq!(classify.chained, Enrollment::default());
    }

    #[tokio::test]
    async fn enrichment_for_a_changed_item_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        store.insert(fast_item("post-a", "2024-01-01")).unwrap();

        let racing_store = store.clone();
        let mut ctx = context(store.clone(), queue);
        ctx.generator = Some(Arc::new(ScriptedGenerator::new(move |_| {
            // A discovery pass lands between load and write.
            racing_store.insert(fast_item("post-a", "2024-06-01")).unwrap();
            Ok("Stale summary.".into())
        })));

        let report = run_stage(&ctx, &job(Stage::Summarize, &["post-a"])).await.unwrap();
        assert_eq!(report.skipped, 1);

        let item = store.get(&ItemId::from("post-a")).await.unwrap().unwrap();
        assert_eq!(item.updated_at.as_deref(), Some("2024-06-01"));
        assert_eq!(item.ai_summary, None);
    }

    /// Records the completion budget of every request.
    struct BudgetRecorder(std::sync::Mutex<Vec<u32>>);

    #[async_trait::async_trait]
    impl TextGenerator for BudgetRecorder {
        async fn generate(
            &self,
            _prompt: &str,
            max_tokens: u32,
        ) -> std::result::Result<String, crate::llm::GenerateError> {
            self.0.lock().unwrap().push(max_tokens);
            Ok(r#"{"label": "Curation", "confidence": 0.5}"#.into())
        }

        fn model(&self) -> &str {
            "recorder"
        }
    }

    #[tokio::test]
    async fn each_task_requests_its_own_budget() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        store.insert(fast_item("post-a", "2024-01-01")).unwrap();
        let recorder = Arc::new(BudgetRecorder(std::sync::Mutex::new(Vec::new())));
        let mut ctx = context(store, queue);
        ctx.generator = Some(recorder.clone());

        run_stage(&ctx, &job(Stage::Summarize, &["post-a"])).await.unwrap();
        run_stage(&ctx, &job(Stage::Classify, &["post-a"])).await.unwrap();

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![TaskType::Summarize.max_tokens(), TaskType::Classify.max_tokens()]
        );
    }

    #[tokio::test]
    async fn unmatched_label_is_not_written() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        store.insert(fast_item("post-a", "2024-01-01")).unwrap();
        let mut ctx = context(store.clone(), queue);
        ctx.generator = Some(Arc::new(ScriptedGenerator::new(|_| {
            Ok(r#"{"label": "Tutorial", "confidence": 0.9}"#.into())
        })));

        let report = run_stage(&ctx, &job(Stage::Classify, &["post-a"])).await.unwrap();
        assert_eq!(report.failed, 1);
        let item = store.get(&ItemId::from("post-a")).await.unwrap().unwrap();
        assert_eq!(item.content_label, None);
        assert_eq!(item.label_confidence, None);
    }

    #[tokio::test]
    async fn full_content_overwrites_placeholders() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        store.insert(placeholder_item("builder-x", "2024-01-01")).unwrap();
        let mut ctx = context(store.clone(), queue.clone());
        ctx.content = Arc::new(StaticContent::author("Jane Doe", "The real article body."));

        let report = run_stage(&ctx, &job(Stage::FetchContent, &["builder-x"])).await.unwrap();
        assert_eq!(report.written, 1);

        let item = store.get(&ItemId::from("builder-x")).await.unwrap().unwrap();
        assert_eq!(item.author_display.as_deref(), Some("Jane Doe"));
        assert_eq!(item.body_text.as_deref(), Some("The real article body."));
        assert_eq!(item.title, "Title builder-x");
        assert_eq!(queue.snapshot()[0].stage, Stage::Summarize);
    }
}
