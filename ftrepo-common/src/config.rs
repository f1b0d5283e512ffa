//! Bootstrap configuration loading
//!
//! Configuration is read once at startup from a TOML file. Resolution order
//! for the file location:
//! 1. Explicit path (command-line argument)
//! 2. `FTREPO_CONFIG` environment variable
//! 3. `<config_dir>/ftrepo/config.toml` (platform config directory)
//! 4. Built-in defaults (no file)
//!
//! A missing file never terminates the process: a warning is logged and the
//! built-in defaults are used. A file that exists but does not parse is an
//! error. Environment-variable overrides for individual settings are applied
//! by the service crate on top of the loaded values.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "FTREPO_CONFIG";

/// Complete bootstrap configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub source: SourceConfig,
    pub inference: InferenceConfig,
    pub blob_store: BlobStoreConfig,
    pub catalog: CatalogConfig,
    pub cache: CacheConfig,
    pub app_store: AppStoreConfig,
    pub variants: VariantsConfig,
    pub logging: LoggingConfig,
    /// Display-name corrections keyed by bundle identifier
    pub name_overrides: BTreeMap<String, String>,
}

/// Chat source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Root of the drop folder (one subdirectory per channel)
    pub root: PathBuf,
    /// Channels to scan; empty means every channel found under `root`
    pub channels: Vec<String>,
    /// Attachments fetched per channel or topic
    pub max_items_per_source: usize,
    /// Concurrent attachment downloads
    pub max_concurrent_downloads: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("inbox"),
            channels: Vec::new(),
            max_items_per_source: 5,
            max_concurrent_downloads: 3,
        }
    }
}

/// Which wire protocol the inference service speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceProvider {
    /// OpenRouter chat-completions API
    #[default]
    OpenRouter,
    /// Plain JSON endpoint taking `{description, filename}`
    Http,
}

/// Inference service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub provider: InferenceProvider,
    pub endpoint: String,
    /// API key (required at startup; usually supplied through the environment)
    pub api_key: Option<String>,
    pub primary_model: String,
    /// Model retried once when the primary fails; `None` disables the fallback
    pub fallback_model: Option<String>,
    /// Per-request timeout; a timed-out call counts as a failed call
    pub timeout_secs: u64,
    /// Minimum spacing between consecutive requests (0 = unlimited)
    pub min_interval_ms: u64,
    /// Site URL sent as `HTTP-Referer` for OpenRouter app attribution; not
    /// sent when unset
    pub referer: Option<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            provider: InferenceProvider::OpenRouter,
            endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            api_key: None,
            primary_model: "openai/gpt-4o-mini".to_string(),
            fallback_model: Some("openai/gpt-4o".to_string()),
            timeout_secs: 15,
            min_interval_ms: 0,
            referer: None,
        }
    }
}

/// Artifact hosting settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobStoreConfig {
    /// Directory holding published packages
    pub root: PathBuf,
    /// Public URL prefix under which `root` is served
    pub public_base_url: String,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("release"),
            public_base_url: "https://example.com/releases/download/latest".to_string(),
        }
    }
}

/// Catalog document settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Source name written into new documents
    pub name: String,
    /// Source identifier written into new documents
    pub identifier: String,
    /// Primary catalog document
    pub path: PathBuf,
    /// Variant-safe derived catalog document
    pub derived_path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            name: "FTRepo".to_string(),
            identifier: "xyz.ftrepo".to_string(),
            path: PathBuf::from("apps.json"),
            derived_path: PathBuf::from("altstore.json"),
        }
    }
}

/// Fingerprint cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ai_bundle_cache.json"),
        }
    }
}

/// App Store icon lookup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppStoreConfig {
    /// Look up icons for entries that have none
    pub enabled: bool,
    /// iTunes Search API endpoint
    pub endpoint: String,
    /// Lookup cache, including misses
    pub cache_path: PathBuf,
    pub timeout_secs: u64,
    /// Minimum spacing between consecutive searches (0 = unlimited)
    pub min_interval_ms: u64,
}

impl Default for AppStoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://itunes.apple.com/search".to_string(),
            cache_path: PathBuf::from("appstore_cache.json"),
            timeout_secs: 10,
            min_interval_ms: 0,
        }
    }
}

/// Variant registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VariantsConfig {
    pub path: PathBuf,
}

impl Default for VariantsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tweaks_list.json"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error);
    /// `RUST_LOG` takes precedence when set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Locate the configuration file, if any
///
/// Returns `None` when no explicit path is given and no file exists at the
/// default location.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|d| d.join("ftrepo").join("config.toml"))
        .filter(|p| p.exists())
}

/// Load configuration from `cli_arg` or the default locations
///
/// A missing file yields defaults with a warning; a malformed file is an error.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = resolve_config_path(cli_arg) else {
        info!("No config file found, using built-in defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!(
            path = %path.display(),
            "Config file not found, using built-in defaults"
        );
        return Ok(TomlConfig::default());
    }

    let config = parse_config_file(&path)?;
    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Parse a TOML configuration file
pub fn parse_config_file(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}
