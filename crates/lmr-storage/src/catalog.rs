//! Catalog store seam: the authoritative launch and launchpad records the
//! reconciler reads from and patches.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use lmr_core::{CatalogLaunch, LaunchpadRecord, ReconciledUpdate};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{FetchError, HttpFetcher};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("no launch with id {0}")]
    UnknownLaunch(String),
}

/// Filter over catalog launches. Results are always sorted by flight number ascending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchQuery {
    pub upcoming: Option<bool>,
    pub auto_update: Option<bool>,
}

impl LaunchQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, launch: &CatalogLaunch) -> bool {
        self.upcoming.map_or(true, |v| launch.upcoming == v)
            && self.auto_update.map_or(true, |v| launch.auto_update == v)
    }

    fn to_filter(self) -> JsonValue {
        let mut filter = serde_json::Map::new();
        if let Some(upcoming) = self.upcoming {
            filter.insert("upcoming".into(), JsonValue::Bool(upcoming));
        }
        if let Some(auto_update) = self.auto_update {
            filter.insert("auto_update".into(), JsonValue::Bool(auto_update));
        }
        JsonValue::Object(filter)
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list_launches(&self, query: &LaunchQuery) -> Result<Vec<CatalogLaunch>, StoreError>;

    /// Single-result lookup of a launchpad by canonical name.
    async fn resolve_site(&self, canonical_name: &str) -> Result<Option<LaunchpadRecord>, StoreError>;

    /// Partial update of the listed fields only.
    async fn patch_launch(&self, id: &str, update: &ReconciledUpdate) -> Result<(), StoreError>;
}

#[derive(Debug, Deserialize)]
struct QueryPage<T> {
    docs: Vec<T>,
}

/// Catalog store reached over the public REST API (`/launches`, `/launchpads`).
#[derive(Debug, Clone)]
pub struct HttpCatalogStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpCatalogStore {
    pub fn new(http: &HttpFetcher, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: http.client().clone(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post_query<T: DeserializeOwned>(&self, path: &str, body: &JsonValue) -> Result<QueryPage<T>, StoreError> {
        let url = self.url(path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(FetchError::from)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url,
            }
            .into());
        }
        resp.json::<QueryPage<T>>()
            .await
            .map_err(|e| StoreError::Decode {
                url,
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl CatalogStore for HttpCatalogStore {
    async fn list_launches(&self, query: &LaunchQuery) -> Result<Vec<CatalogLaunch>, StoreError> {
        let body = json!({
            "query": query.to_filter(),
            "options": {
                "pagination": false,
                "sort": { "flight_number": "asc" },
            },
        });
        let page: QueryPage<CatalogLaunch> = self.post_query("launches/query", &body).await?;
        Ok(page.docs)
    }

    async fn resolve_site(&self, canonical_name: &str) -> Result<Option<LaunchpadRecord>, StoreError> {
        let body = json!({
            "query": { "name": canonical_name },
            "options": { "limit": 1 },
        });
        let page: QueryPage<LaunchpadRecord> = self.post_query("launchpads/query", &body).await?;
        Ok(page.docs.into_iter().next())
    }

    async fn patch_launch(&self, id: &str, update: &ReconciledUpdate) -> Result<(), StoreError> {
        let url = self.url(&format!("launches/{id}"));
        let mut req = self.client.patch(&url).json(update);
        if let Some(key) = &self.api_key {
            req = req.header("spacex-key", key);
        }
        let resp = req.send().await.map_err(FetchError::from)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url,
            }
            .into());
        }
        Ok(())
    }
}

/// In-process catalog used by offline replays and tests. Patches are applied
/// to the held records and kept in dispatch order.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    launches: Mutex<Vec<CatalogLaunch>>,
    launchpads: Vec<LaunchpadRecord>,
    patches: Mutex<Vec<(String, ReconciledUpdate)>>,
}

impl MemoryCatalogStore {
    pub fn new(launches: Vec<CatalogLaunch>, launchpads: Vec<LaunchpadRecord>) -> Self {
        Self {
            launches: Mutex::new(launches),
            launchpads,
            patches: Mutex::new(Vec::new()),
        }
    }

    pub fn from_json_files(launches: impl AsRef<Path>, launchpads: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self::new(read_json_file(launches)?, read_json_file(launchpads)?))
    }

    pub async fn patches(&self) -> Vec<(String, ReconciledUpdate)> {
        self.patches.lock().await.clone()
    }

    pub async fn launch(&self, id: &str) -> Option<CatalogLaunch> {
        self.launches.lock().await.iter().find(|l| l.id == id).cloned()
    }
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn list_launches(&self, query: &LaunchQuery) -> Result<Vec<CatalogLaunch>, StoreError> {
        let mut out: Vec<_> = self
            .launches
            .lock()
            .await
            .iter()
            .filter(|l| query.matches(l))
            .cloned()
            .collect();
        out.sort_by_key(|l| l.flight_number);
        Ok(out)
    }

    async fn resolve_site(&self, canonical_name: &str) -> Result<Option<LaunchpadRecord>, StoreError> {
        Ok(self
            .launchpads
            .iter()
            .find(|pad| pad.name == canonical_name)
            .cloned())
    }

    async fn patch_launch(&self, id: &str, update: &ReconciledUpdate) -> Result<(), StoreError> {
        let mut launches = self.launches.lock().await;
        let launch = launches
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| StoreError::UnknownLaunch(id.to_string()))?;
        launch.flight_number = update.flight_number;
        drop(launches);
        self.patches.lock().await.push((id.to_string(), update.clone()));
        Ok(())
    }
}
