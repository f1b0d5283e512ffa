//! Catalog entry: one application's latest known release

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One application's (or application variant's) latest known release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Bundle identifier of the base application
    pub key: String,
    /// Human-readable application name, without the variant suffix
    pub display_name: String,
    /// Version string as announced
    pub version: String,
    /// Variant (tweak) name distinguishing this entry from the base app
    pub variant_label: Option<String>,
    /// Locator returned by the blob store (public download URL)
    pub download_ref: String,
    /// Fingerprint of the announcement text that produced this entry
    pub source_fingerprint: String,
    /// Filename of the package inside the blob store
    pub blob_name: String,
    /// Channel the package was announced in
    pub source: Option<String>,
    /// Published description (source header + cleaned announcement text)
    pub description: Option<String>,
    /// When the announcement was posted
    pub published_at: Option<DateTime<Utc>>,
    /// Package size in bytes
    pub size: Option<u64>,
    /// Icon URL carried over from an existing document or looked up
    pub icon_url: Option<String>,
    /// Minimum OS version read from the package's Info.plist
    #[serde(default)]
    pub min_os_version: Option<String>,
    /// App-level document fields this pipeline does not manage
    /// (`tintColor`, `subtitle`, `screenshots`, ...)
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// Identity of a catalog slot: bundle identifier plus variant
///
/// Variant labels are compared case-insensitively, so `BHInstagram` and
/// `bhinstagram` occupy the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub key: String,
    pub variant: Option<String>,
}

impl SlotKey {
    pub fn new(key: &str, variant: Option<&str>) -> Self {
        Self {
            key: key.to_string(),
            variant: variant.map(str::to_lowercase),
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(variant) => write!(f, "{}:{}", self.key, variant),
            None => write!(f, "{}", self.key),
        }
    }
}

impl CatalogEntry {
    /// Slot this entry occupies in the catalog
    pub fn slot(&self) -> SlotKey {
        SlotKey::new(&self.key, self.variant_label.as_deref())
    }

    /// Name shown to users: `"Instagram (BHInstagram)"` for variants
    pub fn full_name(&self) -> String {
        match &self.variant_label {
            Some(variant) => format!("{} ({})", self.display_name, variant),
            None => self.display_name.clone(),
        }
    }
}

/// Split `"Instagram (BHInstagram)"` into `("Instagram", Some("BHInstagram"))`
///
/// Only a trailing parenthesized group is considered; names without one are
/// returned unchanged.
pub fn split_variant_suffix(name: &str) -> (String, Option<String>) {
    let trimmed = name.trim();
    if let Some(without_close) = trimmed.strip_suffix(')') {
        if let Some(open) = without_close.rfind('(') {
            let base = without_close[..open].trim();
            let label = without_close[open + 1..].trim();
            if !base.is_empty() && !label.is_empty() && !label.contains(')') {
                return (base.to_string(), Some(label.to_string()));
            }
        }
    }
    (trimmed.to_string(), None)
}
