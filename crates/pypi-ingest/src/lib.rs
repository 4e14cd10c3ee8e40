//! PyPI metadata ingestion
//!
//! Workers claim package names from a shared Postgres table, fetch each
//! package's JSON document from the registry and record its latest version,
//! distribution files and project links.
//!
//! # Lifecycle
//!
//! Every package row moves `READY -> IN_PROGRESS -> {COMPLETE | FAILED}`:
//!
//! - [`store`]: claiming, persisting and status bookkeeping
//! - [`registry`]: the registry HTTP client
//! - [`task`]: one package from claim to terminal status
//! - [`scheduler`]: the claim loop with pacing, drain/daemon modes and shutdown
//!
//! Several workers may run against the same database; the claim is a single
//! atomic statement, so no package is processed twice concurrently.
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod models;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use models::{DownloadArtifact, PackageRecord, ProcessingStatus, StatusSummary, StoredPackage};
pub use registry::{RegistryClient, RegistryDocument, RegistryError, RegistryFetcher};
pub use scheduler::{PacingConfig, RunMode, RunSummary, Scheduler};
pub use store::{PackageStore, PgStatusStore, StoreError, StoreResult};
pub use task::{IngestionTask, TaskOutcome};
