//! euchub CLI: incremental crawl and enrichment pipeline for EUC blog content.
//!
//! Every run is explicitly invoked: a discovery pass over the fast and/or
//! slow source, a backfill of explicit item ids, or a drain of the stage queue.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
