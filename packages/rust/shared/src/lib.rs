//! Shared types, error model, and configuration for the EUC Content Hub pipeline.
//!
//! This crate is the foundation depended on by all other `euchub` crates.
//! It provides:
//! - [`EucHubError`], the unified error type
//! - Domain types ([`Item`], [`FetchedItem`], [`ItemId`], [`Stage`], [`InvocationPayload`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlPoliciesConfig, Environment, FastSourceConfig, OpenRouterConfig,
    PipelineConfig, PipelineSettings, SlowSourceConfig, SourcesConfig, StoreConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_api_key,
};
pub use error::{EucHubError, Result};
pub use types::{
    AUTHOR_PLACEHOLDER, BODY_PLACEHOLDER, BUILDER_TAGS, ContentLabel, FetchedItem,
    InvocationPayload, Item, ItemId, MULTIPLE_AUTHORS, SourceKind, SourceSelector, Stage,
};
