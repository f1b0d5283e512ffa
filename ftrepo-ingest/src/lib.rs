//! ftrepo-ingest library interface
//!
//! Exposes the ingestion components for the binaries and for integration
//! testing.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod workflow;

pub use crate::error::{PersistenceError, RunError};

use anyhow::{Context, Result};
use ftrepo_common::config::TomlConfig;
use models::VariantRegistry;
use services::inference_client::backends_from_config;
use services::app_store::{IconResolver, ItunesSearchClient, ListingCache};
use services::{DirectoryBlobStore, DirectorySource, FingerprintCache, MetadataExtractor};
use std::sync::Arc;
use std::time::Duration;
use workflow::persistence::load_catalog;
use workflow::{CatalogFiles, IngestOptions, IngestOrchestrator};

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `default_level` when set.
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("ftrepo_ingest={0},ftrepo_common={0}", default_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wire the directory-backed source and blob store, the configured
/// inference backends, the App Store icon lookup and the on-disk documents
/// into an orchestrator
pub fn build_orchestrator(config: &TomlConfig, api_key: Option<String>) -> Result<IngestOrchestrator> {
    let registry = VariantRegistry::load(&config.variants.path)
        .context("Failed to load variant registry")?;

    let (primary, fallback) = backends_from_config(&config.inference, api_key, &registry)
        .context("Failed to initialize inference backends")?;
    let extractor = MetadataExtractor::new(
        primary,
        fallback,
        FingerprintCache::load(&config.cache.path),
        Duration::from_secs(config.inference.timeout_secs),
    );

    let catalog = load_catalog(
        &config.catalog.path,
        &config.catalog.name,
        &config.catalog.identifier,
    )
    .context("Failed to load catalog")?;

    let source = DirectorySource::new(config.source.root.clone(), config.source.channels.clone());
    let blob_store = DirectoryBlobStore::new(
        config.blob_store.root.clone(),
        config.blob_store.public_base_url.clone(),
    );

    let orchestrator = IngestOrchestrator::new(
        Arc::new(source),
        Arc::new(blob_store),
        extractor,
        registry,
        catalog,
        CatalogFiles {
            primary: config.catalog.path.clone(),
            derived: config.catalog.derived_path.clone(),
        },
        IngestOptions::from_config(config),
    );

    if !config.app_store.enabled {
        return Ok(orchestrator);
    }
    let search = ItunesSearchClient::new(&config.app_store)
        .context("Failed to initialize App Store client")?;
    Ok(orchestrator.with_icon_resolver(IconResolver::new(
        Arc::new(search),
        ListingCache::load(&config.app_store.cache_path),
    )))
}
