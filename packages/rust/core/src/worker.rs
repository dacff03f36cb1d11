//! Stage-queue worker.
//!
//! Claims due jobs one at a time and runs each under the execution ceiling.
//! Failed jobs are retried with exponential backoff up to `max_attempts`;
//! a job that hits the ceiling is parked as failed immediately.

use std::time::Duration;

use tracing::{error, info, instrument, warn};

use euchub_shared::Result;
use euchub_storage::StageJob;

use crate::pipeline::PipelineContext;
use crate::stages::run_stage;

/// Backoff before the first retry of a failed job; doubles per attempt.
const RETRY_BASE: Duration = Duration::from_secs(30);

/// Result of draining the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub completed: usize,
    /// Failures handed back to the queue for another attempt.
    pub retried: usize,
    /// Jobs parked as failed after exhausting their attempts.
    pub failed: usize,
    pub timed_out: usize,
    /// Jobs returned to pending because a previous worker died mid-run.
    pub released: u64,
}

/// Process jobs until the queue holds no pending work (waiting for delayed
/// jobs to come due), or until `max_jobs` have been handled.
#[instrument(skip_all, fields(env = %ctx.environment))]
pub async fn drain(ctx: &PipelineContext, max_jobs: Option<usize>) -> Result<WorkerReport> {
    let mut report = WorkerReport {
        released: ctx.queue.release_stale(ctx.config.execution_ceiling).await?,
        ..WorkerReport::default()
    };
    if report.released > 0 {
        warn!(released = report.released, "released stale running jobs");
    }

    let mut handled = 0usize;
    while max_jobs.is_none_or(|max| handled < max) {
        let Some(job) = ctx.queue.claim_due(1).await?.into_iter().next() else {
            match ctx.queue.next_due_in().await? {
                Some(wait) => {
                    info!(wait_ms = wait.as_millis() as u64, "waiting for next job");
                    tokio::time::sleep(wait).await;
                    continue;
                }
                None => break,
            }
        };

        handled += 1;
        process(ctx, &job, &mut report).await?;
    }

    info!(
        completed = report.completed,
        retried = report.retried,
        failed = report.failed,
        timed_out = report.timed_out,
        "queue drained"
    );
    Ok(report)
}

async fn process(ctx: &PipelineContext, job: &StageJob, report: &mut WorkerReport) -> Result<()> {
    let ceiling = ctx.config.execution_ceiling;

    match tokio::time::timeout(ceiling, run_stage(ctx, job)).await {
        Ok(Ok(_)) => {
            ctx.queue.complete(&job.id).await?;
            report.completed += 1;
        }
        Ok(Err(e)) if job.attempts < ctx.config.max_attempts => {
            let retry_in = retry_backoff(job.attempts);
            warn!(
                job_id = %job.id,
                stage = %job.stage,
                attempt = job.attempts,
                retry_in_secs = retry_in.as_secs(),
                error = %e,
                "stage job failed, will retry"
            );
            ctx.queue.fail(&job.id, &e.to_string(), Some(retry_in)).await?;
            report.retried += 1;
        }
        Ok(Err(e)) => {
            error!(
                job_id = %job.id,
                stage = %job.stage,
                attempts = job.attempts,
                ids = ?job.item_ids,
                error = %e,
                "stage job failed permanently"
            );
            ctx.queue.fail(&job.id, &e.to_string(), None).await?;
            report.failed += 1;
        }
        Err(_) => {
            error!(
                job_id = %job.id,
                stage = %job.stage,
                ceiling_secs = ceiling.as_secs(),
                ids = ?job.item_ids,
                "stage job hit the execution ceiling"
            );
            let message = format!("timed out after {}s", ceiling.as_secs());
            ctx.queue.fail(&job.id, &message, None).await?;
            report.timed_out += 1;
        }
    }
    Ok(())
}

fn retry_backoff(attempts: u32) -> Duration {
    RETRY_BASE.saturating_mul(2u32.saturating_pow(attempts.saturating_sub(1)))
}
