//! In-memory store and registry used by unit tests

use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::models::{PackageRecord, ProcessingStatus, StoredPackage};
use crate::registry::{RegistryDocument, RegistryError, RegistryFetcher};
use crate::store::{PackageStore, StoreError, StoreResult};

#[derive(Default)]
pub(crate) struct MemoryStore {
    packages: Mutex<BTreeMap<i64, StoredPackage>>,
    fail_persist: AtomicBool,
    fail_mark: AtomicBool,
    closed: AtomicBool,
    claims: AtomicUsize,
}

impl MemoryStore {
    pub(crate) fn with_packages(names: &[&str]) -> Self {
        let store = Self::default();
        for name in names {
            store.add(name);
        }
        store
    }

    pub(crate) fn add(&self, name: &str) {
        let mut packages = self.packages.lock().unwrap();
        let id = packages.len() as i64 + 1;
        packages.insert(
            id,
            StoredPackage {
                record_id: id,
                identity: name.to_string(),
                version: None,
                status: ProcessingStatus::Ready,
                download_artifacts: Vec::new(),
                project_urls: BTreeMap::new(),
            },
        );
    }

    pub(crate) fn get(&self, name: &str) -> StoredPackage {
        self.packages
            .lock()
            .unwrap()
            .values()
            .find(|p| p.identity == name)
            .cloned()
            .unwrap()
    }

    pub(crate) fn fail_persist(&self) {
        self.fail_persist.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_mark(&self) {
        self.fail_mark.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of claim attempts, including empty ones
    pub(crate) fn claims(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageStore for MemoryStore {
    async fn claim_next(&self) -> StoreResult<Option<PackageRecord>> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        let mut packages = self.packages.lock().unwrap();
        let next = packages
            .values_mut()
            .find(|p| p.status == ProcessingStatus::Ready);

        Ok(next.map(|package| {
            package.status = ProcessingStatus::InProgress;
            PackageRecord::claimed(
                package.record_id,
                package.identity.clone(),
                package.version.clone(),
            )
        }))
    }

    async fn mark_status(
        &self,
        record: &PackageRecord,
        status: ProcessingStatus,
    ) -> StoreResult<()> {
        if self.fail_mark.load(Ordering::SeqCst) {
            return Err(StoreError::MissingRecord(record.record_id));
        }
        let mut packages = self.packages.lock().unwrap();
        let package = packages
            .get_mut(&record.record_id)
            .ok_or(StoreError::MissingRecord(record.record_id))?;
        package.status = status;
        Ok(())
    }

    async fn persist_result(&self, record: &PackageRecord) -> StoreResult<()> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(StoreError::MissingRecord(record.record_id));
        }
        let mut packages = self.packages.lock().unwrap();
        let package = packages
            .get_mut(&record.record_id)
            .ok_or(StoreError::MissingRecord(record.record_id))?;
        package.version = Some(record.version.clone());
        package.download_artifacts = record.download_artifacts.clone();
        package.project_urls = record.project_urls.clone();
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Serves canned documents; unknown names get a 404
#[derive(Default)]
pub(crate) struct MemoryRegistry {
    documents: HashMap<String, RegistryDocument>,
    fetches: AtomicUsize,
}

impl MemoryRegistry {
    pub(crate) fn with(mut self, name: &str, document: RegistryDocument) -> Self {
        self.documents.insert(name.to_string(), document);
        self
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryFetcher for MemoryRegistry {
    async fn fetch(&self, package: &str) -> Result<RegistryDocument, RegistryError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.documents
            .get(package)
            .cloned()
            .ok_or_else(|| RegistryError::Status {
                package: package.to_string(),
                status: StatusCode::NOT_FOUND,
            })
    }
}
