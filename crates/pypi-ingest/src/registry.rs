//! Registry client
//!
//! Fetches `GET {base}/pypi/{name}/json` and reduces the document to the
//! fields the pipeline stores. One request per package, no retries.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::RegistryConfig;
use crate::models::{DownloadArtifact, UNKNOWN_ARTIFACT_TYPE};

/// Registry fetch failures. All of them end the package in FAILED.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid registry URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request for '{package}' failed: {source}")]
    Transport {
        package: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Registry returned {status} for '{package}'")]
    Status { package: String, status: StatusCode },

    #[error("Malformed registry document for '{package}': {source}")]
    Decode {
        package: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Fields extracted from one registry document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDocument {
    /// `info.version`, if present
    pub version: Option<String>,
    /// Distribution files from `urls`, in document order
    pub download_artifacts: Vec<DownloadArtifact>,
    /// `info.project_urls`
    pub project_urls: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    #[serde(default)]
    info: Option<RawInfo>,
    #[serde(default)]
    urls: Option<Vec<RawDistribution>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInfo {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    project_urls: Option<BTreeMap<String, Option<String>>>,
}

#[derive(Debug, Deserialize)]
struct RawDistribution {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    packagetype: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl From<RawDocument> for RegistryDocument {
    fn from(raw: RawDocument) -> Self {
        let info = raw.info.unwrap_or_default();

        let download_artifacts = raw
            .urls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|dist| {
                let url = dist.url?;
                // `packagetype` is what the JSON API serves; `type` is accepted
                // for older mirrors.
                let artifact_type = dist
                    .packagetype
                    .or(dist.kind)
                    .unwrap_or_else(|| UNKNOWN_ARTIFACT_TYPE.to_string());
                Some(DownloadArtifact { artifact_type, url })
            })
            .collect();

        let project_urls = info
            .project_urls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(label, url)| url.map(|url| (label, url)))
            .collect();

        Self {
            version: info.version,
            download_artifacts,
            project_urls,
        }
    }
}

impl RegistryDocument {
    /// Parse a raw JSON body
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice::<RawDocument>(body).map(Self::from)
    }
}

/// Source of registry documents
#[async_trait]
pub trait RegistryFetcher: Send + Sync {
    async fn fetch(&self, package: &str) -> Result<RegistryDocument, RegistryError>;
}

#[async_trait]
impl<T: RegistryFetcher + ?Sized> RegistryFetcher for Arc<T> {
    async fn fetch(&self, package: &str) -> Result<RegistryDocument, RegistryError> {
        (**self).fetch(package).await
    }
}

/// HTTP implementation of [`RegistryFetcher`]
pub struct RegistryClient {
    client: Client,
    base_url: Url,
}

impl RegistryClient {
    pub fn new(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| RegistryError::InvalidUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(RegistryError::InvalidUrl {
                url: config.base_url.clone(),
                reason: "not a base URL".to_string(),
            });
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(RegistryError::Client)?;

        Ok(Self { client, base_url })
    }

    /// JSON endpoint for a package, with the name percent-encoded as one segment
    pub fn document_url(&self, package: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["pypi", package, "json"]);
        }
        url
    }
}

#[async_trait]
impl RegistryFetcher for RegistryClient {
    async fn fetch(&self, package: &str) -> Result<RegistryDocument, RegistryError> {
        let url = self.document_url(package);
        tracing::debug!(package = %package, url = %url, "Fetching registry document");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| RegistryError::Transport {
                package: package.to_string(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(RegistryError::Status {
                package: package.to_string(),
                status,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| RegistryError::Transport {
                package: package.to_string(),
                source,
            })?;

        RegistryDocument::from_slice(&body).map_err(|source| RegistryError::Decode {
            package: package.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: serde_json::Value) -> RegistryDocument {
        RegistryDocument::from_slice(value.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_full_document() {
        let doc = parse(serde_json::json!({
            "info": {
                "name": "example-lib",
                "version": "2.1.0",
                "project_urls": {"Homepage": "https://example.com", "Source": "https://git.example.com"}
            },
            "urls": [
                {"url": "https://files/example-2.1.0.tar.gz", "packagetype": "sdist", "size": 10},
                {"url": "https://files/example-2.1.0-py3-none-any.whl", "packagetype": "bdist_wheel"}
            ]
        }));

        assert_eq!(doc.version.as_deref(), Some("2.1.0"));
        assert_eq!(
            doc.download_artifacts,
            vec![
                DownloadArtifact::new("sdist", "https://files/example-2.1.0.tar.gz"),
                DownloadArtifact::new("bdist_wheel", "https://files/example-2.1.0-py3-none-any.whl"),
            ]
        );
        assert_eq!(doc.project_urls["Homepage"], "https://example.com");
        assert_eq!(doc.project_urls.len(), 2);
    }

    #[test]
    fn test_missing_type_defaults_to_unknown() {
        let doc = parse(serde_json::json!({
            "info": {"version": "1.0"},
            "urls": [{"url": "https://files/a.zip"}]
        }));

        assert_eq!(doc.download_artifacts[0].artifact_type, UNKNOWN_ARTIFACT_TYPE);
    }

    #[test]
    fn test_type_field_is_accepted_as_fallback() {
        let doc = parse(serde_json::json!({
            "urls": [
                {"url": "https://files/a.egg", "type": "bdist_egg"},
                {"url": "https://files/b.tar.gz", "type": "legacy", "packagetype": "sdist"}
            ]
        }));

        assert_eq!(doc.download_artifacts[0].artifact_type, "bdist_egg");
        assert_eq!(doc.download_artifacts[1].artifact_type, "sdist");
    }

    #[test]
    fn test_same_format_artifacts_are_all_kept() {
        let doc = parse(serde_json::json!({
            "urls": [
                {"url": "https://files/a-cp311.whl", "packagetype": "bdist_wheel"},
                {"url": "https://files/a-cp312.whl", "packagetype": "bdist_wheel"}
            ]
        }));

        assert_eq!(doc.download_artifacts.len(), 2);
    }

    #[test]
    fn test_sparse_document() {
        let doc = parse(serde_json::json!({
            "info": {"project_urls": null, "version": null},
            "urls": [{"packagetype": "sdist"}]
        }));

        assert_eq!(doc.version, None);
        assert!(doc.download_artifacts.is_empty());
        assert!(doc.project_urls.is_empty());

        assert_eq!(parse(serde_json::json!({})), RegistryDocument::default());
    }

    #[test]
    fn test_null_project_url_is_skipped() {
        let doc = parse(serde_json::json!({
            "info": {"project_urls": {"Homepage": "https://example.com", "Docs": null}}
        }));

        assert_eq!(doc.project_urls.len(), 1);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(RegistryDocument::from_slice(b"<html>not json</html>").is_err());
        assert!(RegistryDocument::from_slice(br#"{"urls": "nope"}"#).is_err());
    }

    #[test]
    fn test_document_url() {
        let config = RegistryConfig {
            base_url: "https://pypi.org/".to_string(),
            ..RegistryConfig::default()
        };
        let client = RegistryClient::new(&config).unwrap();

        assert_eq!(
            client.document_url("example-lib").as_str(),
            "https://pypi.org/pypi/example-lib/json"
        );
        assert_eq!(
            client.document_url("a/b").as_str(),
            "https://pypi.org/pypi/a%2Fb/json"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let config = RegistryConfig {
            base_url: "not a url".to_string(),
            ..RegistryConfig::default()
        };
        assert!(matches!(
            RegistryClient::new(&config),
            Err(RegistryError::InvalidUrl { .. })
        ));
    }
}
