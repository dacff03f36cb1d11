//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use euchub_core::{
    ChangeKind, InvocationReport, OpenRouterClient, PipelineContext, ProgressReporter,
    TextGenerator, WorkerReport, drain, invoke,
};
use euchub_crawler::{FastSourceFetcher, FullContentFetcher, HttpFetcher, SlowSourceFetcher};
use euchub_shared::{
    AppConfig, Environment, InvocationPayload, ItemId, PipelineConfig, SourceSelector, init_config,
    load_config, load_config_from, resolve_api_key,
};
use euchub_storage::{IngestRunRecord, ItemStore, JobQueue, Storage};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// euchub: incremental crawl, change detection and enrichment for EUC blog content.
#[derive(Parser)]
#[command(
    name = "euchub",
    version,
    about = "Crawl EUC blog sources, detect changes, and enrich new or edited posts.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Target environment (production or staging). Defaults to the config value.
    #[arg(long, global = true)]
    pub env: Option<Environment>,

    /// Config file to use instead of ~/.euchub/euchub.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the enrichment batch size.
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a discovery pass, or enroll explicit ids for backfill.
    Crawl {
        /// Source to crawl: fast, slow, or all.
        #[arg(short, long, default_value = "all")]
        source: SourceSelector,

        /// Item ids to enroll instead of discovering (comma-separated).
        #[arg(long, value_delimiter = ',')]
        ids: Option<Vec<String>>,

        /// Work the stage queue after the pass.
        #[arg(long)]
        drain: bool,
    },

    /// Run one invocation from a raw JSON payload.
    Invoke {
        /// Payload, e.g. '{"source":"slow","item_ids":["a"]}'.
        payload: String,

        /// Work the stage queue after the invocation.
        #[arg(long)]
        drain: bool,
    },

    /// Drain the stage queue, waiting for delayed jobs.
    Worker {
        /// Stop after this many jobs.
        #[arg(long)]
        max_jobs: Option<usize>,
    },

    /// Print a stored item as JSON.
    Show {
        /// Item id.
        id: String,
    },

    /// Show item totals, queue counts and recent ingest runs.
    Status {
        /// Number of ingest runs to list.
        #[arg(long, default_value = "10")]
        runs: u32,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "euchub=info",
        1 => "euchub=debug",
        _ => "euchub=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let overrides = Overrides {
        env: cli.env,
        config: cli.config,
        batch_size: cli.batch_size,
    };

    match cli.command {
        Command::Crawl { source, ids, drain } => {
            let payload = InvocationPayload {
                source,
                item_ids: ids.map(|ids| ids.into_iter().map(ItemId).collect()),
            };
            cmd_invoke(&overrides, &payload, drain).await
        }
        Command::Invoke { payload, drain } => {
            let payload = InvocationPayload::from_json(&payload)?;
            cmd_invoke(&overrides, &payload, drain).await
        }
        Command::Worker { max_jobs } => cmd_worker(&overrides, max_jobs).await,
        Command::Show { id } => cmd_show(&overrides, &id).await,
        Command::Status { runs } => cmd_status(&overrides, runs).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&overrides).await,
        },
    }
}

/// Global flags that adjust the loaded configuration.
struct Overrides {
    env: Option<Environment>,
    config: Option<PathBuf>,
    batch_size: Option<usize>,
}

impl Overrides {
    fn load(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        };
        if let Some(env) = self.env {
            config.environment = env;
        }
        if let Some(batch_size) = self.batch_size {
            config.pipeline.batch_size = batch_size;
        }
        Ok(config)
    }
}

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = config.store.database_path(config.environment)?;
    info!(env = %config.environment, path = %path.display(), "opening item store");
    Ok(Arc::new(Storage::open(&path).await?))
}

/// Wire the fetchers, store, queue and generator for one environment.
fn build_context(config: &AppConfig, storage: Arc<Storage>) -> Result<PipelineContext> {
    let pipeline = PipelineConfig::from(config);
    let http = Arc::new(HttpFetcher::new(config.crawl_policies.clone())?);

    let generator: Option<Arc<dyn TextGenerator>> = match resolve_api_key(config) {
        Ok(key) => Some(Arc::new(OpenRouterClient::new(&config.openrouter, key)?)),
        Err(e) => {
            warn!(error = %e, "no text generator available; summarize/classify jobs will fail");
            None
        }
    };

    Ok(PipelineContext {
        environment: config.environment,
        store: storage.clone(),
        queue: storage,
        generator,
        content: Arc::new(FullContentFetcher::new(http.clone(), pipeline.body_max_chars)),
        fetchers: vec![
            Arc::new(FastSourceFetcher::new(
                http.clone(),
                config.sources.fast.clone(),
                pipeline.body_max_chars,
            )),
            Arc::new(SlowSourceFetcher::new(http, config.sources.slow.clone())),
        ],
        config: pipeline,
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_invoke(overrides: &Overrides, payload: &InvocationPayload, then_drain: bool) -> Result<()> {
    let config = overrides.load()?;
    let storage = open_storage(&config).await?;
    let ctx = build_context(&config, storage.clone())?;

    info!(env = %ctx.environment, source = ?payload.source, backfill = payload.item_ids.is_some(), "invoking pipeline");

    let started_at = Utc::now();
    let reporter = CliProgress::new();
    let report = invoke(&ctx, payload, &reporter).await?;

    record_runs(&storage, &report, started_at).await;
    print_invocation(&report);

    if then_drain {
        let worker = drain(&ctx, None).await?;
        print_worker(&worker);
    }
    Ok(())
}

async fn record_runs(storage: &Storage, report: &InvocationReport, started_at: DateTime<Utc>) {
    for pass in &report.passes {
        let record = IngestRunRecord {
            id: Uuid::now_v7().to_string(),
            source: pass.source,
            started_at,
            finished_at: Utc::now(),
            stats: serde_json::json!({
                "fetched": pass.fetched,
                "new": pass.new.len(),
                "changed": pass.changed.len(),
                "unchanged": pass.unchanged,
                "failed": pass.failed(),
                "enrolled_jobs": pass.enrollment.jobs,
                "lost": pass.enrollment.lost.len(),
            }),
        };
        if let Err(e) = storage.record_ingest_run(&record).await {
            warn!(source = %pass.source, error = %e, "could not record ingest run");
        }
    }
}

fn print_invocation(report: &InvocationReport) {
    println!();
    for pass in &report.passes {
        println!("  {} pass", pass.source);
        println!("    Fetched:   {}", pass.fetched);
        println!("    New:       {}", pass.new.len());
        println!("    Changed:   {}", pass.changed.len());
        println!("    Unchanged: {}", pass.unchanged);
        println!("    Failed:    {}", pass.failed());
        println!("    Jobs:      {}", pass.enrollment.jobs);
        for failure in &pass.fetch_failures {
            println!("      ! {}: {}", failure.url, failure.error);
        }
        for (id, error) in &pass.store_failures {
            println!("      ! {id}: {error}");
        }
    }
    for (source, error) in &report.source_errors {
        println!("  {source} pass failed: {error}");
    }
    if let Some(backfill) = &report.backfill {
        for (source, ids) in &backfill.enrolled {
            println!("  Enrolled {} {source} item(s)", ids.len());
        }
        for id in &backfill.unknown {
            println!("  Unknown id skipped: {id}");
        }
    }
    let lost = report.lost_enqueues();
    if !lost.is_empty() {
        println!("  Not enrolled ({}):", lost.len());
        for id in lost {
            println!("    {id}");
        }
    }
    println!("  Time: {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

fn print_worker(report: &WorkerReport) {
    println!("  Worker");
    println!("    Completed: {}", report.completed);
    println!("    Retried:   {}", report.retried);
    println!("    Failed:    {}", report.failed);
    println!("    Timed out: {}", report.timed_out);
    if report.released > 0 {
        println!("    Released:  {}", report.released);
    }
    println!();
}

async fn cmd_worker(overrides: &Overrides, max_jobs: Option<usize>) -> Result<()> {
    let config = overrides.load()?;
    let storage = open_storage(&config).await?;
    let ctx = build_context(&config, storage)?;

    let spinner = spinner();
    spinner.set_message("Working stage queue");
    let report = drain(&ctx, max_jobs).await;
    spinner.finish_and_clear();

    print_worker(&report?);
    Ok(())
}

async fn cmd_show(overrides: &Overrides, id: &str) -> Result<()> {
    let config = overrides.load()?;
    let storage = open_storage(&config).await?;

    let item = storage
        .get(&ItemId::from(id))
        .await?
        .ok_or_else(|| eyre!("no item '{id}' in the {} store", config.environment))?;
    println!("{}", serde_json::to_string_pretty(&item)?);
    Ok(())
}

async fn cmd_status(overrides: &Overrides, runs: u32) -> Result<()> {
    let config = overrides.load()?;
    let storage = open_storage(&config).await?;

    println!();
    println!("  Environment: {}", config.environment);
    println!();
    println!("  Items");
    for stats in storage.item_stats().await? {
        println!(
            "    {:<5} {:>6} items, {:>6} summarized, {:>6} labeled",
            stats.source.as_str(),
            stats.items,
            stats.summarized,
            stats.labeled
        );
    }

    println!();
    println!("  Stage queue");
    let counts = storage.counts().await?;
    if counts.is_empty() {
        println!("    (empty)");
    }
    for count in counts {
        println!(
            "    {:<14} {:<8} {:>6}",
            count.stage.as_str(),
            count.status.as_str(),
            count.count
        );
    }

    println!();
    println!("  Recent ingest runs");
    for run in storage.recent_ingest_runs(runs).await? {
        println!(
            "    {} {:<5} {:>5.1}s {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.source.as_str(),
            (run.finished_at - run.started_at).num_milliseconds() as f64 / 1000.0,
            run.stats
        );
    }
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(overrides: &Overrides) -> Result<()> {
    let config = overrides.load()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(
            style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
    }
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        Self { spinner: spinner() }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item_ingested(&self, id: &str, kind: ChangeKind, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Ingesting [{current}/{total}] {id} ({})", kind.as_str()));
    }

    fn done(&self, _report: &InvocationReport) {
        self.spinner.finish_and_clear();
    }
}
