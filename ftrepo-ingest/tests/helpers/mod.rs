//! Test Helper Utilities
//!
//! Shared utilities for testing ftrepo-ingest

#![allow(dead_code)]

pub mod fakes;

pub use fakes::{attachment, ipa, MemoryBlobStore, MemorySource, ScriptedBackend, ScriptedStore};

use ftrepo_ingest::models::VariantRegistry;
use ftrepo_ingest::services::{
    AppStoreSearch, BlobStore, ChatSource, FingerprintCache, IconResolver, InferenceBackend,
    ListingCache, MetadataExtractor,
};
use ftrepo_ingest::workflow::persistence::load_catalog;
use ftrepo_ingest::workflow::{CatalogFiles, IngestOptions, IngestOrchestrator};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Public base URL used by [`MemoryBlobStore`]
pub const CDN: &str = "https://cdn.test/releases";

/// Scratch directory holding the catalog, derived catalog and cache files
pub struct TestEnv {
    pub dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn apps_path(&self) -> PathBuf {
        self.dir.path().join("apps.json")
    }

    pub fn derived_path(&self) -> PathBuf {
        self.dir.path().join("altstore.json")
    }

    pub fn cache_path(&self) -> PathBuf {
        self.dir.path().join("ai_bundle_cache.json")
    }

    pub fn appstore_cache_path(&self) -> PathBuf {
        self.dir.path().join("appstore_cache.json")
    }

    /// Icon resolver over `store`, caching into this env
    pub fn icon_resolver(&self, store: Arc<ScriptedStore>) -> IconResolver {
        IconResolver::new(
            store as Arc<dyn AppStoreSearch>,
            ListingCache::load(&self.appstore_cache_path()),
        )
    }

    /// Seed the primary catalog document
    pub fn write_apps(&self, document: &Value) {
        std::fs::write(
            self.apps_path(),
            serde_json::to_vec_pretty(document).expect("serialize"),
        )
        .expect("Failed to write apps.json");
    }

    pub fn read_apps(&self) -> Value {
        read_json(&self.apps_path())
    }

    pub fn read_derived(&self) -> Value {
        read_json(&self.derived_path())
    }

    /// Orchestrator over the given fakes, reading and writing this env's files
    pub fn orchestrator(
        &self,
        source: Arc<MemorySource>,
        blobs: Arc<MemoryBlobStore>,
        backend: Arc<ScriptedBackend>,
        options: IngestOptions,
    ) -> IngestOrchestrator {
        build(self, source, blobs, backend, options)
    }
}

/// Orchestrator over any source and blob store with default options
pub fn orchestrator_with(
    env: &TestEnv,
    source: Arc<dyn ChatSource>,
    blobs: Arc<dyn BlobStore>,
    backend: Arc<ScriptedBackend>,
) -> IngestOrchestrator {
    build(env, source, blobs, backend, IngestOptions::default())
}

fn build(
    env: &TestEnv,
    source: Arc<dyn ChatSource>,
    blobs: Arc<dyn BlobStore>,
    backend: Arc<ScriptedBackend>,
    options: IngestOptions,
) -> IngestOrchestrator {
    let extractor = MetadataExtractor::new(
        backend as Arc<dyn InferenceBackend>,
        None,
        FingerprintCache::load(&env.cache_path()),
        Duration::from_secs(5),
    );
    let catalog =
        load_catalog(&env.apps_path(), "FTRepo", "xyz.ftrepo").expect("Failed to load catalog");

    IngestOrchestrator::new(
        source,
        blobs,
        extractor,
        VariantRegistry::new(["BHInstagram", "Theta", "YTLite"]),
        catalog,
        CatalogFiles {
            primary: env.apps_path(),
            derived: env.derived_path(),
        },
        options,
    )
}

pub fn read_json(path: &std::path::Path) -> Value {
    let text = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    serde_json::from_str(&text).expect("invalid JSON")
}

/// `apps` array of a document as (name, bundleIdentifier, version) triples
pub fn app_summaries(document: &Value) -> Vec<(String, String, String)> {
    document["apps"]
        .as_array()
        .expect("apps array")
        .iter()
        .map(|app| {
            (
                app["name"].as_str().unwrap_or_default().to_string(),
                app["bundleIdentifier"].as_str().unwrap_or_default().to_string(),
                app["version"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}
