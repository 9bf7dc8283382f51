//! Manifest source contracts, cell normalization and table decoding.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lmr_storage::{FetchError, HttpFetcher};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub mod normalize;
pub mod table;

pub use normalize::{normalize_date_cell, strip_footnotes};
pub use table::{extract_table_lines, StrideLayout, TableDecoder, WikiStrideDecoder, DEFAULT_MANIFEST_SELECTOR};

pub const CRATE_NAME: &str = "lmr-adapters";

/// The manifest document as fetched, before any table extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawManifest {
    pub source: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
    pub sha256: String,
}

impl RawManifest {
    pub fn new(source: impl Into<String>, body: String, fetched_at: DateTime<Utc>) -> Self {
        let sha256 = sha256_hex(body.as_bytes());
        Self {
            source: source.into(),
            body,
            fetched_at,
            sha256,
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
    #[error("{schema}: {message}")]
    Layout { schema: &'static str, message: String },
}

#[async_trait]
pub trait ManifestSource: Send + Sync {
    fn describe(&self) -> String;

    async fn fetch_manifest(&self, run_id: Uuid) -> Result<RawManifest, AdapterError>;
}

/// Manifest hosted as an HTML page.
#[derive(Debug, Clone)]
pub struct HttpManifestSource {
    http: HttpFetcher,
    url: String,
}

impl HttpManifestSource {
    pub fn new(http: HttpFetcher, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch_manifest(&self, run_id: Uuid) -> Result<RawManifest, AdapterError> {
        let resp = self.http.fetch_bytes(run_id, &self.url).await?;
        debug!(%run_id, url = %resp.final_url, bytes = resp.body.len(), "fetched manifest");
        Ok(RawManifest::new(resp.final_url.clone(), resp.text(), resp.fetched_at))
    }
}

/// Manifest snapshot saved on disk, used for offline replays.
#[derive(Debug, Clone)]
pub struct FileManifestSource {
    path: PathBuf,
}

impl FileManifestSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ManifestSource for FileManifestSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch_manifest(&self, _run_id: Uuid) -> Result<RawManifest, AdapterError> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| AdapterError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(RawManifest::new(self.describe(), body, Utc::now()))
    }
}
