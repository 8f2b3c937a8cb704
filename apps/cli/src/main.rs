//! feedgraph CLI: ingest syndication feeds into a content-addressed store.
//!
//! Fetches a feed, stores its enclosures and original payload as blobs, and
//! publishes the whole snapshot as one DAG node whose CID is printed on stdout.

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
