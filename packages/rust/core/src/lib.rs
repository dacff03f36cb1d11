//! Pipeline orchestration and enrichment for the EUC Content Hub.
//!
//! This crate ties together the metadata fetchers, the item store and the
//! stage queue: [`invoke`] runs discovery passes (or an explicit backfill),
//! and [`drain`] works the queued enrichment stages.

pub mod change;
pub mod dispatch;
pub mod enrichment;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod stages;
pub mod worker;

#[cfg(test)]
mod testing;

pub use change::ChangeKind;
pub use dispatch::{Enrollment, enroll};
pub use ingest::{IngestReport, ingest_item, run_pass};
pub use llm::{GenerateError, OpenRouterClient, TextGenerator};
pub use pipeline::{
    Backfill, InvocationReport, PipelineContext, ProgressReporter, SilentProgress, invoke,
};
pub use stages::{StageReport, run_stage};
pub use worker::{WorkerReport, drain};
