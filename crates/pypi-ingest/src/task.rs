//! Ingestion task
//!
//! Carries one claimed record to a terminal status: fetch the registry
//! document, fill the record, persist and mark COMPLETE. Any failure along
//! the way marks the record FAILED instead. Nothing is propagated to the
//! caller; the outcome is returned for accounting.

use std::time::Instant;
use tracing::{error, info, warn};

use crate::models::{PackageRecord, ProcessingStatus};
use crate::registry::RegistryFetcher;
use crate::store::PackageStore;

/// How a task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Complete,
    Failed { reason: String },
}

impl TaskOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, TaskOutcome::Complete)
    }
}

pub struct IngestionTask<'a> {
    store: &'a dyn PackageStore,
    registry: &'a dyn RegistryFetcher,
}

impl<'a> IngestionTask<'a> {
    pub fn new(store: &'a dyn PackageStore, registry: &'a dyn RegistryFetcher) -> Self {
        Self { store, registry }
    }

    /// Process one IN_PROGRESS record
    pub async fn run(&self, mut record: PackageRecord) -> TaskOutcome {
        let started = Instant::now();
        info!(
            package = %record.identity,
            record_id = record.record_id,
            "Processing package"
        );

        let document = match self.registry.fetch(&record.identity).await {
            Ok(document) => document,
            Err(e) => {
                warn!(
                    package = %record.identity,
                    record_id = record.record_id,
                    error = %e,
                    "Registry fetch failed"
                );
                return self.fail(&mut record, e.to_string()).await;
            }
        };

        record.apply_document(document);

        if let Err(e) = self.store.complete(&record).await {
            error!(
                package = %record.identity,
                record_id = record.record_id,
                error = %e,
                "Failed to persist package"
            );
            return self.fail(&mut record, e.to_string()).await;
        }

        record.status = ProcessingStatus::Complete;
        info!(
            package = %record.identity,
            record_id = record.record_id,
            version = %record.version,
            artifacts = record.download_artifacts.len(),
            project_urls = record.project_urls.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Package complete"
        );

        TaskOutcome::Complete
    }

    async fn fail(&self, record: &mut PackageRecord, reason: String) -> TaskOutcome {
        // A record left IN_PROGRESS here needs an operator reset.
        if let Err(e) = self.store.mark_status(record, ProcessingStatus::Failed).await {
            error!(
                package = %record.identity,
                record_id = record.record_id,
                error = %e,
                "Failed to mark package as failed"
            );
        }
        record.status = ProcessingStatus::Failed;

        TaskOutcome::Failed { reason }
    }
}
