//! Application configuration for the pipeline.
//!
//! User config lives at `~/.euchub/euchub.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EucHubError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "euchub.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".euchub";

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Deployment environment. Selects which item database a run touches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Staging,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
        }
    }

    /// Suffix appended to environment-scoped resource names.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Production => "",
            Self::Staging => "-staging",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = EucHubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "production" | "prod" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            other => Err(EucHubError::config(format!("unknown environment '{other}'"))),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Config structs (matching euchub.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Environment used when `--env` is not given.
    #[serde(default)]
    pub environment: Environment,

    /// Item store location.
    #[serde(default)]
    pub store: StoreConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Batching and retry knobs for the stage chain.
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Source endpoints.
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Crawl policies.
    #[serde(default)]
    pub crawl_policies: CrawlPoliciesConfig,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the per-environment databases.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> String {
    "~/.euchub/data".into()
}

impl StoreConfig {
    /// Database file for `env`, with `~` expanded.
    pub fn database_path(&self, env: Environment) -> Result<PathBuf> {
        let dir = expand_home(&self.data_dir)?;
        Ok(dir.join(format!("items{}.db", env.suffix())))
    }
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for summaries and classification.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Chat-completions base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-call timeout.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "anthropic/claude-3-haiku".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_llm_timeout() -> u64 {
    30
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Ids per stage job.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delay between successive batches of one stage.
    #[serde(default = "default_inter_batch_delay")]
    pub inter_batch_delay_ms: u64,

    /// Wall-clock ceiling for a single stage job.
    #[serde(default = "default_execution_ceiling")]
    pub execution_ceiling_secs: u64,

    /// Attempts before a failing job is parked as failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Upper bound on stored body text, in characters.
    #[serde(default = "default_body_max_chars")]
    pub body_max_chars: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            inter_batch_delay_ms: default_inter_batch_delay(),
            execution_ceiling_secs: default_execution_ceiling(),
            max_attempts: default_max_attempts(),
            body_max_chars: default_body_max_chars(),
        }
    }
}

fn default_batch_size() -> usize {
    5
}
fn default_inter_batch_delay() -> u64 {
    2000
}
fn default_execution_ceiling() -> u64 {
    900
}
fn default_max_attempts() -> u32 {
    3
}
fn default_body_max_chars() -> usize {
    3000
}

/// `[sources]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub fast: FastSourceConfig,
    #[serde(default)]
    pub slow: SlowSourceConfig,
}

/// `[sources.fast]`: the blog listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastSourceConfig {
    #[serde(default = "default_listing_url")]
    pub listing_url: String,

    /// Stop after this many listing pages (unbounded when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
}

impl Default for FastSourceConfig {
    fn default() -> Self {
        Self {
            listing_url: default_listing_url(),
            max_pages: None,
        }
    }
}

fn default_listing_url() -> String {
    "https://aws.amazon.com/blogs/desktop-and-application-streaming/".into()
}

/// `[sources.slow]`: the sitemap index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowSourceConfig {
    #[serde(default = "default_sitemap_index_url")]
    pub sitemap_index_url: String,

    /// Substring identifying article sitemaps inside the index.
    #[serde(default = "default_article_marker")]
    pub article_sitemap_marker: String,

    /// Relevance keywords matched against URL and derived title.
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
}

impl Default for SlowSourceConfig {
    fn default() -> Self {
        Self {
            sitemap_index_url: default_sitemap_index_url(),
            article_sitemap_marker: default_article_marker(),
            keywords: default_keywords(),
        }
    }
}

fn default_sitemap_index_url() -> String {
    "https://builder.aws.com/sitemaps/sitemap.xml".into()
}
fn default_article_marker() -> String {
    "/sitemaps/articles/".into()
}
fn default_keywords() -> Vec<String> {
    [
        "euc",
        "end-user-computing",
        "end user computing",
        "workspaces",
        "appstream",
        "workspace",
        "end user",
        "desktop",
        "virtual desktop",
        "vdi",
        "daas",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// `[crawl_policies]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlPoliciesConfig {
    /// Minimum ms between requests.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts per request before giving up.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base of the exponential retry backoff.
    #[serde(default = "default_retry_base")]
    pub retry_base_ms: u64,
}

impl Default for CrawlPoliciesConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: default_rate_limit(),
            request_timeout_secs: default_request_timeout(),
            retries: default_retries(),
            retry_base_ms: default_retry_base(),
        }
    }
}

fn default_rate_limit() -> u64 {
    200
}
fn default_request_timeout() -> u64 {
    30
}
fn default_retries() -> u32 {
    3
}
fn default_retry_base() -> u64 {
    1000
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    pub execution_ceiling: Duration,
    pub max_attempts: u32,
    pub body_max_chars: usize,
    /// Guarded-write retries when a concurrent pass wins the race.
    pub write_conflict_retries: u32,
    /// Attempts at the dispatch boundary before an enqueue is reported lost.
    pub enqueue_attempts: u32,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        let p = &config.pipeline;
        Self {
            batch_size: p.batch_size.max(1),
            inter_batch_delay: Duration::from_millis(p.inter_batch_delay_ms),
            execution_ceiling: Duration::from_secs(p.execution_ceiling_secs),
            max_attempts: p.max_attempts.max(1),
            body_max_chars: p.body_max_chars,
            write_conflict_retries: 3,
            enqueue_attempts: 3,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.euchub/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| EucHubError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.euchub/euchub.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| EucHubError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| EucHubError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| EucHubError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| EucHubError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| EucHubError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the OpenRouter API key from the env var named in config.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(EucHubError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable."
        ))),
    }
}

fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| EucHubError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}
