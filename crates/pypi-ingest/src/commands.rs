//! Subcommand implementations
//!
//! Each command opens its own store from [`Config`], does its work and
//! closes the pool again. Results meant for the operator go to stdout;
//! everything else goes through tracing.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::sync::watch;
use tracing::info;

use crate::cli::RunArgs;
use crate::config::{Config, SchedulerConfig};
use crate::db;
use crate::models::ProcessingStatus;
use crate::registry::RegistryClient;
use crate::scheduler::{RunSummary, Scheduler};
use crate::store::{PackageStore, PgStatusStore};

/// Apply command-line overrides on top of the environment
pub fn apply_run_args(config: &mut SchedulerConfig, args: &RunArgs) {
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(min_delay) = args.min_delay {
        config.min_delay_secs = min_delay;
    }
    if let Some(max_delay) = args.max_delay {
        config.max_delay_secs = max_delay;
    }
}

/// Package names from a list file. Blank lines and `#` comments are skipped.
pub fn parse_name_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

async fn connect(config: &Config) -> Result<PgStatusStore> {
    PgStatusStore::connect(&config.database)
        .await
        .context("Failed to connect to the package database")
}

pub async fn run(
    config: &Config,
    args: &RunArgs,
    shutdown: watch::Receiver<bool>,
) -> Result<RunSummary> {
    let mut config = config.clone();
    apply_run_args(&mut config.scheduler, args);
    config.validate()?;

    let registry = RegistryClient::new(&config.registry)?;
    let store = connect(&config).await?;
    if args.migrate {
        db::run_migrations(store.pool()).await?;
    }

    let summary = Scheduler::new(store, registry, &config.scheduler)
        .with_shutdown(shutdown)
        .run()
        .await
        .context("Scheduler stopped on a store failure")?;

    Ok(summary)
}

pub async fn enqueue(config: &Config, names: &[String], file: Option<&Path>) -> Result<()> {
    let mut all = names.to_vec();
    if let Some(path) = file {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read package list {}", path.display()))?;
        all.extend(parse_name_list(&contents));
    }

    if all.is_empty() {
        anyhow::bail!("No package names given");
    }

    let store = connect(config).await?;
    let inserted = store.enqueue(&all[..]).await;
    store.close().await;
    let inserted = inserted?;

    println!(
        "Queued {} new package(s), {} already known",
        inserted,
        (all.len() as u64).saturating_sub(inserted)
    );
    Ok(())
}

pub async fn reset(config: &Config, from: ProcessingStatus) -> Result<()> {
    let store = connect(config).await?;
    let reset = store.reset(from).await;
    store.close().await;

    println!("Reset {} {} package(s) to ready", reset?, from);
    Ok(())
}

pub async fn status(config: &Config) -> Result<()> {
    let store = connect(config).await?;
    let summary = store.summary().await;
    store.close().await;
    let summary = summary?;

    for status in ProcessingStatus::ALL {
        println!("{:<12} {:>10}", status, summary.get(status));
    }
    println!("{:<12} {:>10}", "total", summary.total());
    Ok(())
}

pub async fn show(config: &Config, name: &str) -> Result<()> {
    let store = connect(config).await?;
    let package = store.find(name).await;
    store.close().await;

    let Some(package) = package? else {
        anyhow::bail!("Package '{}' is not in the database", name);
    };

    println!("{}", serde_json::to_string_pretty(&package)?);
    Ok(())
}

pub async fn migrate(config: &Config) -> Result<()> {
    let store = connect(config).await?;
    let result = db::run_migrations(store.pool()).await;
    store.close().await;
    result?;

    info!("Schema is up to date");
    Ok(())
}
