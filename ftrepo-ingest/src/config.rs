//! Configuration resolution for ftrepo-ingest
//!
//! Settings come from the TOML file loaded by `ftrepo_common::config`, with
//! environment variables taking priority for the values operators usually
//! set per deployment (API key, models, limits, channels).

use ftrepo_common::config::{InferenceProvider, TomlConfig};
use ftrepo_common::{Error, Result};
use std::env;
use std::str::FromStr;
use tracing::{info, warn};

pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";
pub const MODEL_ENV: &str = "OPENROUTER_MODEL";
pub const FALLBACK_MODEL_ENV: &str = "OPENROUTER_FALLBACK_MODEL";
pub const MAX_ITEMS_ENV: &str = "MAX_DOWNLOADS_PER_CHANNEL";
pub const CONCURRENCY_ENV: &str = "MAX_CONCURRENT_DOWNLOADS";
pub const CHANNELS_ENV: &str = "FTREPO_CHANNELS";
pub const PUBLIC_BASE_URL_ENV: &str = "FTREPO_PUBLIC_BASE_URL";

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_number<T: FromStr>(name: &str) -> Option<T> {
    let raw = env_value(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a number", name, raw);
            None
        }
    }
}

/// Apply environment overrides on top of the loaded TOML values
///
/// The API key is handled separately by [`resolve_api_key`].
pub fn apply_env_overrides(config: &mut TomlConfig) {
    if let Some(model) = env_value(MODEL_ENV) {
        config.inference.primary_model = model;
    }

    // Present but blank disables the fallback
    if let Ok(fallback) = env::var(FALLBACK_MODEL_ENV) {
        let fallback = fallback.trim();
        config.inference.fallback_model = if fallback.is_empty() {
            None
        } else {
            Some(fallback.to_string())
        };
    }

    if let Some(max_items) = env_number(MAX_ITEMS_ENV) {
        config.source.max_items_per_source = max_items;
    }
    if let Some(concurrency) = env_number(CONCURRENCY_ENV) {
        config.source.max_concurrent_downloads = concurrency;
    }

    if let Some(channels) = env_value(CHANNELS_ENV) {
        config.source.channels = channels
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| c.trim_start_matches('@').to_string())
            .collect();
    }

    if let Some(base_url) = env_value(PUBLIC_BASE_URL_ENV) {
        config.blob_store.public_base_url = base_url;
    }
}

/// Resolve the inference API key
///
/// **Priority:** ENV → TOML
///
/// The OpenRouter provider cannot run without a key, so its absence is a
/// configuration error. The plain HTTP provider may run unauthenticated.
pub fn resolve_api_key(config: &TomlConfig) -> Result<Option<String>> {
    let env_key = env::var(API_KEY_ENV).ok().filter(|k| is_valid_key(k));
    let toml_key = config
        .inference
        .api_key
        .as_ref()
        .filter(|k| is_valid_key(k))
        .cloned();

    if env_key.is_some() && toml_key.is_some() {
        warn!(
            "Inference API key found in both environment and TOML config. Using environment (highest priority)."
        );
    }

    if let Some(key) = env_key {
        info!("Inference API key loaded from environment variable");
        return Ok(Some(key));
    }
    if let Some(key) = toml_key {
        info!("Inference API key loaded from TOML config");
        return Ok(Some(key));
    }

    match config.inference.provider {
        InferenceProvider::OpenRouter => Err(Error::Config(format!(
            "Inference API key not configured. Please configure using one of:\n\
             1. Environment: {}=your-key-here\n\
             2. TOML config: [inference] api_key = \"your-key\"\n\
             \n\
             Obtain an API key at: https://openrouter.ai/",
            API_KEY_ENV
        ))),
        InferenceProvider::Http => Ok(None),
    }
}

/// Reject settings the run cannot work with
pub fn validate(config: &TomlConfig) -> Result<()> {
    if config.source.max_items_per_source == 0 {
        return Err(Error::Config(
            "source.max_items_per_source must be at least 1".to_string(),
        ));
    }
    if config.source.max_concurrent_downloads == 0 {
        return Err(Error::Config(
            "source.max_concurrent_downloads must be at least 1".to_string(),
        ));
    }
    if config.inference.primary_model.trim().is_empty() {
        return Err(Error::Config("inference.primary_model must not be empty".to_string()));
    }
    if config.inference.endpoint.trim().is_empty() {
        return Err(Error::Config("inference.endpoint must not be empty".to_string()));
    }
    if config.inference.timeout_secs == 0 {
        return Err(Error::Config("inference.timeout_secs must be at least 1".to_string()));
    }
    Ok(())
}
