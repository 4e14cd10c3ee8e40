//! Package records and processing status
//!
//! A [`PackageRecord`] is the in-memory copy of one row of the `packages`
//! table while a worker holds it. The database stays the source of truth:
//! records are read on claim, filled from the registry, written back and
//! dropped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::registry::RegistryDocument;

/// Version stored when the registry document carries none
pub const DEFAULT_VERSION: &str = "0";

/// Artifact type stored when a distribution entry has no packaging format
pub const UNKNOWN_ARTIFACT_TYPE: &str = "unknown";

/// Status code found in the store that maps to no [`ProcessingStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Unknown processing status code: {0}")]
pub struct UnknownStatusCode(pub i16);

/// Processing status of a package
///
/// `Ready -> InProgress -> {Complete | Failed}`. Persisted as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Ready,
    InProgress,
    Failed,
    Complete,
}

impl ProcessingStatus {
    pub const ALL: [ProcessingStatus; 4] = [
        ProcessingStatus::Ready,
        ProcessingStatus::InProgress,
        ProcessingStatus::Failed,
        ProcessingStatus::Complete,
    ];

    /// Integer code stored in `packages.status`
    pub fn code(self) -> i16 {
        match self {
            ProcessingStatus::Ready => 0,
            ProcessingStatus::InProgress => 1,
            ProcessingStatus::Failed => 2,
            ProcessingStatus::Complete => 3,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, UnknownStatusCode> {
        match code {
            0 => Ok(ProcessingStatus::Ready),
            1 => Ok(ProcessingStatus::InProgress),
            2 => Ok(ProcessingStatus::Failed),
            3 => Ok(ProcessingStatus::Complete),
            other => Err(UnknownStatusCode(other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Ready => "ready",
            ProcessingStatus::InProgress => "in_progress",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Complete => "complete",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingStatus::Failed | ProcessingStatus::Complete)
    }

    /// Whether the pipeline may move a record from `self` to `next`
    pub fn can_transition_to(self, next: ProcessingStatus) -> bool {
        matches!(
            (self, next),
            (ProcessingStatus::Ready, ProcessingStatus::InProgress)
                | (ProcessingStatus::InProgress, ProcessingStatus::Complete)
                | (ProcessingStatus::InProgress, ProcessingStatus::Failed)
        )
    }
}

impl TryFrom<i16> for ProcessingStatus {
    type Error = UnknownStatusCode;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "ready" => Ok(ProcessingStatus::Ready),
            "in_progress" => Ok(ProcessingStatus::InProgress),
            "failed" => Ok(ProcessingStatus::Failed),
            "complete" | "completed" => Ok(ProcessingStatus::Complete),
            _ => Err(format!("unknown status '{}'", s)),
        }
    }
}

/// One downloadable distribution file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadArtifact {
    /// Packaging format, e.g. "sdist" or "bdist_wheel"
    pub artifact_type: String,
    pub url: String,
}

impl DownloadArtifact {
    pub fn new(artifact_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            artifact_type: artifact_type.into(),
            url: url.into(),
        }
    }
}

/// Unit of work held by one worker between claim and terminal status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Primary key in `packages`
    pub record_id: i64,
    /// Registry package name
    pub identity: String,
    pub version: String,
    pub download_artifacts: Vec<DownloadArtifact>,
    pub project_urls: BTreeMap<String, String>,
    pub status: ProcessingStatus,
}

impl PackageRecord {
    /// A freshly claimed record with no fetched data yet
    pub fn claimed(record_id: i64, identity: impl Into<String>, version: Option<String>) -> Self {
        Self {
            record_id,
            identity: identity.into(),
            version: version.unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            download_artifacts: Vec::new(),
            project_urls: BTreeMap::new(),
            status: ProcessingStatus::InProgress,
        }
    }

    /// Replace the fetched fields with the document's content.
    ///
    /// Artifacts and URLs are replaced wholesale, never merged.
    pub fn apply_document(&mut self, document: RegistryDocument) {
        self.version = document
            .version
            .unwrap_or_else(|| DEFAULT_VERSION.to_string());
        self.download_artifacts = document.download_artifacts;
        self.project_urls = document.project_urls;
    }
}

/// A package as currently persisted, including fetched rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPackage {
    pub record_id: i64,
    pub identity: String,
    /// `None` until the package has been fetched once
    pub version: Option<String>,
    pub status: ProcessingStatus,
    pub download_artifacts: Vec<DownloadArtifact>,
    pub project_urls: BTreeMap<String, String>,
}

/// Number of records per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub ready: i64,
    pub in_progress: i64,
    pub failed: i64,
    pub complete: i64,
}

impl StatusSummary {
    pub fn add(&mut self, status: ProcessingStatus, count: i64) {
        match status {
            ProcessingStatus::Ready => self.ready += count,
            ProcessingStatus::InProgress => self.in_progress += count,
            ProcessingStatus::Failed => self.failed += count,
            ProcessingStatus::Complete => self.complete += count,
        }
    }

    pub fn get(&self, status: ProcessingStatus) -> i64 {
        match status {
            ProcessingStatus::Ready => self.ready,
            ProcessingStatus::InProgress => self.in_progress,
            ProcessingStatus::Failed => self.failed,
            ProcessingStatus::Complete => self.complete,
        }
    }

    pub fn total(&self) -> i64 {
        self.ready + self.in_progress + self.failed + self.complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_canonical() {
        assert_eq!(ProcessingStatus::Ready.code(), 0);
        assert_eq!(ProcessingStatus::InProgress.code(), 1);
        assert_eq!(ProcessingStatus::Failed.code(), 2);
        assert_eq!(ProcessingStatus::Complete.code(), 3);

        for status in ProcessingStatus::ALL {
            assert_eq!(ProcessingStatus::from_code(status.code()), Ok(status));
        }
    }

    #[test]
    fn test_unknown_status_code_is_rejected() {
        assert_eq!(ProcessingStatus::from_code(4), Err(UnknownStatusCode(4)));
        assert!(ProcessingStatus::try_from(-1).is_err());
    }

    #[test]
    fn test_transitions_follow_lifecycle() {
        use ProcessingStatus::*;

        assert!(Ready.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Complete));
        assert!(InProgress.can_transition_to(Failed));

        assert!(!Ready.can_transition_to(Complete));
        assert!(!Ready.can_transition_to(Failed));
        assert!(!InProgress.can_transition_to(Ready));
        for terminal in [Complete, Failed] {
            assert!(terminal.is_terminal());
            for next in ProcessingStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("failed".parse::<ProcessingStatus>(), Ok(ProcessingStatus::Failed));
        assert_eq!(
            "in-progress".parse::<ProcessingStatus>(),
            Ok(ProcessingStatus::InProgress)
        );
        assert!("done".parse::<ProcessingStatus>().is_err());
        assert_eq!(ProcessingStatus::InProgress.to_string(), "in_progress");
    }

    #[test]
    fn test_apply_document_replaces_fields() {
        let mut record = PackageRecord::claimed(7, "example-lib", Some("1.0".to_string()));
        record.download_artifacts = vec![DownloadArtifact::new("sdist", "https://old")];
        record
            .project_urls
            .insert("Old".to_string(), "https://old".to_string());

        let mut urls = BTreeMap::new();
        urls.insert("Homepage".to_string(), "https://example.com".to_string());
        record.apply_document(RegistryDocument {
            version: None,
            download_artifacts: vec![DownloadArtifact::new("bdist_wheel", "https://new")],
            project_urls: urls,
        });

        assert_eq!(record.version, DEFAULT_VERSION);
        assert_eq!(
            record.download_artifacts,
            vec![DownloadArtifact::new("bdist_wheel", "https://new")]
        );
        assert_eq!(record.project_urls.len(), 1);
        assert!(record.project_urls.contains_key("Homepage"));
    }

    #[test]
    fn test_summary_totals() {
        let mut summary = StatusSummary::default();
        summary.add(ProcessingStatus::Ready, 3);
        summary.add(ProcessingStatus::Failed, 2);
        summary.add(ProcessingStatus::Failed, 1);

        assert_eq!(summary.get(ProcessingStatus::Failed), 3);
        assert_eq!(summary.total(), 6);
    }
}
