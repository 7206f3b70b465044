//! Bulletin ETL - loads the central bank's monthly points-of-sale bulletin
//! into the warehouse.
//!
//! Downloads the newest workbook if it hasn't been archived yet, then processes
//! every matching workbook in the intake directory.

mod archive;
mod audit;
mod coerce;
mod columns;
mod config;
mod error;
mod fetch;
mod loader;
mod period;
mod pipeline;
mod sheet_parser;
mod sheet_transformer;
mod table;
mod transform;
mod warehouse;

use anyhow::Context;
use config::EtlConfig;
use fetch::{BulletinFetcher, SourceFetcher};
use pipeline::RunContext;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "bulletin_etl=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        error!("An error occurred in the ETL process: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let config = EtlConfig::load()?;

    if config.fetch.enabled {
        let fetcher = BulletinFetcher::new(&config.fetch, &config.intake_dir, &config.archive_dir)?;
        if let Some(path) = fetcher.fetch_source_file().await {
            info!("New bulletin downloaded: {}", path.display());
        }
    }

    let files = archive::find_intake_files(&config.intake_dir, &config.file_pattern)?;
    if files.is_empty() {
        info!("There is no new files to be processed");
        return Ok(());
    }
    info!("Found {} file(s) to process: {:?}", files.len(), files);

    let summaries = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let ctx = RunContext::connect(&config)?;
        Ok(pipeline::run(&ctx, &files))
    })
    .await
    .context("ETL worker panicked")??;

    info!("Processed {} file(s)", summaries.len());
    Ok(())
}
