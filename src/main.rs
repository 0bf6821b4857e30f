use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use price_harvest::config::{HarvestConfig, RunMode};
use price_harvest::database_ops::{Db, PgJobStore, PgStagingStore};
use price_harvest::download::Downloader;
use price_harvest::staging::StagingLoader;
use price_harvest::status::StatusTracker;
use price_harvest::transform::SqlTemplateTransformer;
use price_harvest::util::env;
use price_harvest::Orchestrator;

/// Harvest pending vendor price exports into the staging store and run the
/// brand transformation for each. All settings come from the environment / .env.
#[derive(Parser, Debug)]
#[command(name = "harvest", version, about)]
struct Cli {}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _cli = Cli::parse();
    env::init_env();
    price_harvest::logging::init_tracing("info")?;

    env::preflight_check(
        "harvest",
        &[&["HARVEST_DB_URL", "DATABASE_URL", "DB_URL", "DB_HOST"]],
        &[
            "HARVEST_DB_URL",
            "DATABASE_URL",
            "HARVEST_MODE",
            "HARVEST_JOBS_TABLE",
            "HARVEST_STAGING_TABLE",
            "HARVEST_MAX_JOBS",
            "HARVEST_TRANSFORM_SQL",
            "HARVEST_VALIDATE_SQL",
        ],
    )?;
    let cfg = HarvestConfig::from_env()?;

    let transformer = SqlTemplateTransformer::from_files(&cfg.transform_sql, &cfg.validate_sql)
        .context("loading transformation templates")?;
    let downloader = Downloader::new(&cfg.download).context("building http client")?;
    let db = Db::connect(
        &cfg.database_url,
        cfg.store.max_connections,
        cfg.store.acquire_timeout,
    )?;

    let jobs = PgJobStore::new(db.clone(), &cfg.store);
    let staging = PgStagingStore::new(db.clone(), &cfg.store.staging_table);
    let orchestrator = Orchestrator::new(
        StatusTracker::new(Arc::new(jobs)).with_limit(cfg.max_jobs),
        StagingLoader::new(Arc::new(staging)),
        downloader,
        Arc::new(transformer),
        Arc::new(db.clone()),
    );

    let report = match cfg.mode {
        RunMode::Jobs => orchestrator.run().await,
        RunMode::StagedBrands => orchestrator.run_staged_brands().await,
    };
    info!(
        mode = ?cfg.mode,
        selected = report.selected,
        completed = report.completed(),
        failed = report.failed(),
        brands = report.brand_outcomes.len(),
        store_error = report.store_error.is_some(),
        "run summary"
    );
    match report.to_json() {
        Ok(json) => info!(target: "harvest::report", report = %json, "run report"),
        Err(e) => warn!(error = %e, "could not serialize run report"),
    }

    db.close().await;
    Ok(())
}
