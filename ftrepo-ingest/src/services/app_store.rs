//! App Store lookup for app icons and official names
//!
//! Queries the public iTunes Search API. A listing is matched by exact
//! bundle identifier first, then by app name. Results, including "not
//! found", are kept in a persistent cache keyed by `bundle_id:app_name` so
//! each app is searched once across runs.

use crate::error::PersistenceError;
use crate::services::inference_client::RateLimiter;
use async_trait::async_trait;
use ftrepo_common::config::AppStoreConfig;
use ftrepo_common::json_store::{read_json, write_json_atomic};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("ftrepo-ingest/", env!("CARGO_PKG_VERSION"));
const SEARCH_LIMIT: &str = "5";

/// App Store search errors
#[derive(Debug, Error)]
pub enum AppStoreError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// One App Store listing, as searched and as cached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreListing {
    pub name: String,
    #[serde(rename = "icon", default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub bundle_id: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(rename = "trackName", default)]
    track_name: Option<String>,
    #[serde(rename = "bundleId", default)]
    bundle_id: Option<String>,
    #[serde(rename = "artworkUrl512", default)]
    artwork_url_512: Option<String>,
    #[serde(rename = "artworkUrl100", default)]
    artwork_url_100: Option<String>,
}

impl From<SearchResult> for StoreListing {
    fn from(result: SearchResult) -> Self {
        Self {
            name: result.track_name.unwrap_or_default(),
            icon_url: result.artwork_url_512.or(result.artwork_url_100),
            bundle_id: result.bundle_id.unwrap_or_default(),
        }
    }
}

/// Free-text App Store search
#[async_trait]
pub trait AppStoreSearch: Send + Sync {
    async fn search(&self, term: &str) -> Result<Vec<StoreListing>, AppStoreError>;
}

/// iTunes Search API client (`entity=software`)
pub struct ItunesSearchClient {
    http_client: reqwest::Client,
    rate_limiter: RateLimiter,
    endpoint: String,
    timeout: Duration,
}

impl ItunesSearchClient {
    pub fn new(config: &AppStoreConfig) -> Result<Self, AppStoreError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| AppStoreError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::new(config.min_interval_ms),
            endpoint: config.endpoint.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl AppStoreSearch for ItunesSearchClient {
    async fn search(&self, term: &str) -> Result<Vec<StoreListing>, AppStoreError> {
        self.rate_limiter.wait().await;
        debug!(term = term, "Searching App Store");

        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&[("term", term), ("entity", "software"), ("limit", SEARCH_LIMIT)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppStoreError::Timeout(self.timeout)
                } else {
                    AppStoreError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppStoreError::ApiError(status.as_u16(), error_text));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| AppStoreError::ParseError(e.to_string()))?;
        Ok(body.results.into_iter().map(StoreListing::from).collect())
    }
}

/// Listing whose bundle identifier is exactly `bundle_id`
pub fn match_bundle_id(results: &[StoreListing], bundle_id: &str) -> Option<StoreListing> {
    results.iter().find(|r| r.bundle_id == bundle_id).cloned()
}

/// Listing named `name` (case-insensitive), else the top result
pub fn match_name(results: &[StoreListing], name: &str) -> Option<StoreListing> {
    let wanted = name.trim().to_lowercase();
    results
        .iter()
        .find(|r| r.name.trim().to_lowercase() == wanted)
        .or_else(|| results.first())
        .cloned()
}

/// Name to search when the app name is unknown: `com.burbn.instagram` -> `burbn`
fn name_from_bundle_id(bundle_id: &str) -> Option<&str> {
    let parts: Vec<&str> = bundle_id.split('.').filter(|p| !p.is_empty()).collect();
    (parts.len() >= 2).then(|| parts[parts.len() - 2])
}

/// Persistent `bundle_id:app_name` -> listing cache; `null` records a miss
#[derive(Debug, Default)]
pub struct ListingCache {
    path: Option<PathBuf>,
    entries: BTreeMap<String, Option<StoreListing>>,
    dirty: bool,
}

impl ListingCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the cache file at `path`; missing or unreadable files start empty
    pub fn load(path: &Path) -> Self {
        let entries = match read_json::<BTreeMap<String, Option<StoreListing>>>(path) {
            Ok(Some(entries)) => {
                info!("Loaded {} App Store lookups from {}", entries.len(), path.display());
                entries
            }
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!("Discarding unreadable App Store cache: {}", e);
                BTreeMap::new()
            }
        };

        Self {
            path: Some(path.to_path_buf()),
            entries,
            dirty: false,
        }
    }

    pub fn key(bundle_id: &str, app_name: &str) -> String {
        format!("{}:{}", bundle_id, app_name)
    }

    /// `Some(None)` is a cached miss
    pub fn lookup(&self, key: &str) -> Option<&Option<StoreListing>> {
        self.entries.get(key)
    }

    pub fn store(&mut self, key: String, listing: Option<StoreListing>) {
        self.entries.insert(key, listing);
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn flush(&mut self) -> Result<(), PersistenceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }

        write_json_atomic(path, &self.entries).map_err(|source| PersistenceError {
            path: path.clone(),
            source,
        })?;
        self.dirty = false;
        debug!("Flushed {} App Store lookups to {}", self.entries.len(), path.display());
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupStats {
    pub cache_hits: usize,
    pub searches: usize,
    pub found: usize,
    pub failures: usize,
}

/// Finds icons for entries that have none
pub struct IconResolver {
    search: Arc<dyn AppStoreSearch>,
    cache: ListingCache,
    stats: LookupStats,
}

impl IconResolver {
    pub fn new(search: Arc<dyn AppStoreSearch>, cache: ListingCache) -> Self {
        Self {
            search,
            cache,
            stats: LookupStats::default(),
        }
    }

    /// Listing for an app, from the cache or the App Store
    ///
    /// Search failures return `None` without caching, so the app is tried
    /// again next run.
    pub async fn lookup(&mut self, bundle_id: &str, app_name: &str) -> Option<StoreListing> {
        let key = ListingCache::key(bundle_id, app_name);
        if let Some(cached) = self.cache.lookup(&key) {
            self.stats.cache_hits += 1;
            return cached.clone();
        }

        match self.search_listing(bundle_id, app_name).await {
            Ok(listing) => {
                if listing.is_some() {
                    self.stats.found += 1;
                } else {
                    debug!(bundle_id = bundle_id, name = app_name, "Not found on the App Store");
                }
                self.cache.store(key, listing.clone());
                listing
            }
            Err(e) => {
                self.stats.failures += 1;
                warn!(bundle_id = bundle_id, "App Store lookup failed: {}", e);
                None
            }
        }
    }

    pub async fn icon_for(&mut self, bundle_id: &str, app_name: &str) -> Option<String> {
        self.lookup(bundle_id, app_name)
            .await
            .and_then(|listing| listing.icon_url)
    }

    async fn search_listing(
        &mut self,
        bundle_id: &str,
        app_name: &str,
    ) -> Result<Option<StoreListing>, AppStoreError> {
        if !bundle_id.is_empty() {
            self.stats.searches += 1;
            let results = self.search.search(bundle_id).await?;
            if let Some(listing) = match_bundle_id(&results, bundle_id) {
                return Ok(Some(listing));
            }
        }

        let name = match app_name.trim() {
            "" => name_from_bundle_id(bundle_id).unwrap_or_default(),
            name => name,
        };
        if name.is_empty() {
            return Ok(None);
        }
        self.stats.searches += 1;
        let results = self.search.search(name).await?;
        Ok(match_name(&results, name))
    }

    pub fn stats(&self) -> &LookupStats {
        &self.stats
    }

    pub fn flush_cache(&mut self) -> Result<(), PersistenceError> {
        self.cache.flush()
    }
}
