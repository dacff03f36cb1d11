//! Invocation entry point: payload → discovery passes or explicit backfill.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};

use euchub_crawler::{ContentFetcher, MetadataFetcher};
use euchub_shared::{
    Environment, EucHubError, InvocationPayload, ItemId, PipelineConfig, Result, SourceKind,
    SourceSelector,
};
use euchub_storage::{ItemStore, JobQueue};

use crate::change::ChangeKind;
use crate::dispatch::{Enrollment, enroll};
use crate::ingest::{IngestReport, run_pass};
use crate::llm::TextGenerator;

/// Everything a pass or a stage job needs, passed explicitly.
pub struct PipelineContext {
    pub environment: Environment,
    pub config: PipelineConfig,
    pub store: Arc<dyn ItemStore>,
    pub queue: Arc<dyn JobQueue>,
    /// Absent when no API key is configured; the generating stages then fail.
    pub generator: Option<Arc<dyn TextGenerator>>,
    pub content: Arc<dyn ContentFetcher>,
    pub fetchers: Vec<Arc<dyn MetadataFetcher>>,
}

impl PipelineContext {
    fn fetcher_for(&self, source: SourceKind) -> Result<&dyn MetadataFetcher> {
        self.fetchers
            .iter()
            .find(|f| f.source() == source)
            .map(|f| f.as_ref())
            .ok_or_else(|| EucHubError::config(format!("no metadata fetcher for source '{source}'")))
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each fetched item is classified and written.
    fn item_ingested(&self, id: &str, kind: ChangeKind, current: usize, total: usize);
    /// Called when the invocation completes.
    fn done(&self, report: &InvocationReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item_ingested(&self, _id: &str, _kind: ChangeKind, _current: usize, _total: usize) {}
    fn done(&self, _report: &InvocationReport) {}
}

/// Ids enrolled by an explicit (backfill) invocation.
#[derive(Debug, Clone, Default)]
pub struct Backfill {
    pub enrolled: Vec<(SourceKind, Vec<ItemId>)>,
    /// Ids that are not in the store (only checked for `source = all`).
    pub unknown: Vec<ItemId>,
    pub enrollment: Enrollment,
}

/// Result of one invocation.
#[derive(Debug, Clone, Default)]
pub struct InvocationReport {
    pub passes: Vec<IngestReport>,
    /// Sources whose index could not be read.
    pub source_errors: Vec<(SourceKind, String)>,
    pub backfill: Option<Backfill>,
    pub elapsed: Duration,
}

impl InvocationReport {
    /// Ids that were classified but could not be enqueued.
    pub fn lost_enqueues(&self) -> Vec<ItemId> {
        self.passes
            .iter()
            .flat_map(|p| p.enrollment.lost.iter().cloned())
            .chain(self.backfill.iter().flat_map(|b| b.enrollment.lost.iter().cloned()))
            .collect()
    }
}

/// Run one invocation.
///
/// Without `item_ids`, every selected source gets a discovery pass. A source
/// whose index cannot be read is reported; the invocation fails only when no
/// selected source could be read. With `item_ids`, discovery is skipped and
/// the ids are enrolled into their source's first enrichment stage.
#[instrument(skip_all, fields(env = %ctx.environment, source = ?payload.source))]
pub async fn invoke(
    ctx: &PipelineContext,
    payload: &InvocationPayload,
    progress: &dyn ProgressReporter,
) -> Result<InvocationReport> {
    let start = Instant::now();
    let mut report = InvocationReport::default();

    match &payload.item_ids {
        Some(ids) => {
            progress.phase("Enrolling requested items");
            report.backfill = Some(backfill(ctx, payload.source, ids).await?);
        }
        None => {
            for source in payload.source.sources() {
                let fetcher = ctx.fetcher_for(source)?;
                match run_pass(ctx, fetcher, progress).await {
                    Ok(pass) => report.passes.push(pass),
                    Err(e) => {
                        error!(%source, error = %e, "pass failed");
                        report.source_errors.push((source, e.to_string()));
                    }
                }
            }
            if report.passes.is_empty() {
                if let Some((source, message)) = report.source_errors.first() {
                    return Err(EucHubError::Network(format!("{source} pass failed: {message}")));
                }
            }
        }
    }

    report.elapsed = start.elapsed();
    let lost = report.lost_enqueues();
    if !lost.is_empty() {
        warn!(count = lost.len(), ?lost, "items classified but not enrolled");
    }
    info!(elapsed_ms = report.elapsed.as_millis() as u64, "invocation complete");
    progress.done(&report);
    Ok(report)
}

async fn backfill(ctx: &PipelineContext, selector: SourceSelector, ids: &[ItemId]) -> Result<Backfill> {
    let mut out = Backfill::default();

    let routed: Vec<(SourceKind, Vec<ItemId>)> = match selector {
        SourceSelector::Fast => vec![(SourceKind::Fast, ids.to_vec())],
        SourceSelector::Slow => vec![(SourceKind::Slow, ids.to_vec())],
        SourceSelector::All => {
            let mut fast = Vec::new();
            let mut slow = Vec::new();
            for id in ids {
                match ctx.store.get(id).await? {
                    Some(item) if item.source == SourceKind::Fast => fast.push(id.clone()),
                    Some(_) => slow.push(id.clone()),
                    None => {
                        warn!(%id, "unknown item id, skipping");
                        out.unknown.push(id.clone());
                    }
                }
            }
            vec![(SourceKind::Fast, fast), (SourceKind::Slow, slow)]
        }
    };

    for (source, ids) in routed.into_iter().filter(|(_, ids)| !ids.is_empty()) {
        let stage = source.entry_stage();
        info!(%source, %stage, ids = ids.len(), "backfill enrollment");
        out.enrollment
            .merge(enroll(ctx.queue.as_ref(), stage, &ids, Duration::ZERO, &ctx.config).await);
        out.enrolled.push((source, ids));
    }

    Ok(out)
}
