//! cortap: compliance review data service.
//!
//! Fetches review records from the remote review-management API, consolidates
//! them into one canonical document per subject, caches it, and serves it
//! over a CLI and an HTTP API.

mod commands;
mod server;

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
