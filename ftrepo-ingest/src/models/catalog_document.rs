//! AltStore-style source documents
//!
//! The primary document (`apps.json`) and the derived document
//! (`altstore.json`) share this shape. Unknown fields at both the document
//! and app level are carried through untouched.

use super::catalog_entry::{split_variant_suffix, CatalogEntry};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Top-level source document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default)]
    pub apps: Vec<AppRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One app as written into a source document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRecord {
    pub name: String,
    #[serde(default)]
    pub bundle_identifier: String,
    #[serde(default)]
    pub version: String,
    #[serde(rename = "downloadURL", default)]
    pub download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub developer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localized_description: Option<String>,
    #[serde(rename = "iconURL", default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default)]
    pub versions: Vec<AppVersion>,
    #[serde(default = "empty_object")]
    pub app_permissions: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_fingerprint: Option<String>,
    #[serde(
        rename = "minOSVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub min_os_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Version history item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppVersion {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localized_description: Option<String>,
    #[serde(rename = "downloadURL", default)]
    pub download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(
        rename = "minOSVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub min_os_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

impl CatalogDocument {
    pub fn new(name: &str, identifier: &str) -> Self {
        Self {
            name: name.to_string(),
            identifier: Some(identifier.to_string()),
            apps: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Same header (name, identifier, extra fields) with a new app list
    pub fn with_apps(&self, apps: Vec<AppRecord>) -> Self {
        Self {
            name: self.name.clone(),
            identifier: self.identifier.clone(),
            apps,
            extra: self.extra.clone(),
        }
    }

    /// Recover catalog entries from the app list
    ///
    /// Records without a bundle identifier cannot occupy a slot and are
    /// skipped.
    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.apps
            .iter()
            .filter_map(|record| {
                let entry = record.to_entry();
                if entry.is_none() {
                    debug!("Skipping app record without bundle identifier: {}", record.name);
                }
                entry
            })
            .collect()
    }
}

impl AppRecord {
    /// Render an entry for the primary document
    pub fn from_entry(entry: &CatalogEntry) -> Self {
        let version_date = entry.published_at.as_ref().map(format_date);
        Self {
            name: entry.full_name(),
            bundle_identifier: entry.key.clone(),
            version: entry.version.clone(),
            download_url: entry.download_ref.clone(),
            developer_name: entry.source.as_ref().map(|s| format!("@{}", s)),
            localized_description: entry.description.clone(),
            icon_url: entry.icon_url.clone(),
            version_date: version_date.clone(),
            size: entry.size,
            versions: vec![AppVersion {
                version: entry.version.clone(),
                build_version: None,
                date: version_date,
                localized_description: entry.description.clone(),
                download_url: entry.download_ref.clone(),
                size: entry.size,
                min_os_version: entry.min_os_version.clone(),
                extra: Map::new(),
            }],
            app_permissions: empty_object(),
            variant: entry.variant_label.clone(),
            file_name: Some(entry.blob_name.clone()),
            source_fingerprint: Some(entry.source_fingerprint.clone())
                .filter(|fingerprint| !fingerprint.is_empty()),
            min_os_version: entry.min_os_version.clone(),
            extra: entry.extra.clone(),
        }
    }

    /// Render an entry for the derived document under `derived_key`
    ///
    /// Version items gain a `buildVersion` so stores that require one accept
    /// the source.
    pub fn derived(entry: &CatalogEntry, derived_key: &str) -> Self {
        let mut record = Self::from_entry(entry);
        record.bundle_identifier = derived_key.to_string();
        for version in &mut record.versions {
            version.build_version = Some(version.version.clone());
        }
        record
    }

    /// Recover a catalog entry from a stored record
    ///
    /// Records written before variants were tracked explicitly carry the
    /// variant only in the name (`"Instagram (Theta)"`) and the package name
    /// only in the download URL; both are recovered here.
    pub fn to_entry(&self) -> Option<CatalogEntry> {
        let key = self.bundle_identifier.trim();
        if key.is_empty() {
            return None;
        }

        let (display_name, variant_label) = match &self.variant {
            Some(variant) if !variant.trim().is_empty() => {
                let variant = variant.trim().to_string();
                let suffix = format!("({})", variant);
                let base = self
                    .name
                    .trim()
                    .strip_suffix(&suffix)
                    .map(str::trim)
                    .unwrap_or_else(|| self.name.trim());
                (base.to_string(), Some(variant))
            }
            _ => split_variant_suffix(&self.name),
        };

        let blob_name = self
            .file_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| blob_name_from_url(&self.download_url));

        let published_at = self
            .version_date
            .as_deref()
            .or_else(|| self.versions.first().and_then(|v| v.date.as_deref()))
            .and_then(parse_date);

        let source = self
            .developer_name
            .as_deref()
            .and_then(|d| d.strip_prefix('@'))
            .map(str::to_string);

        Some(CatalogEntry {
            key: key.to_string(),
            display_name,
            version: self.version.clone(),
            variant_label,
            download_ref: self.download_url.clone(),
            source_fingerprint: self.source_fingerprint.clone().unwrap_or_default(),
            blob_name,
            source,
            description: self.localized_description.clone(),
            published_at,
            size: self.size,
            icon_url: self.icon_url.clone(),
            min_os_version: self
                .min_os_version
                .clone()
                .or_else(|| self.versions.first().and_then(|v| v.min_os_version.clone())),
            extra: self.extra.clone(),
        })
    }
}

/// Last path segment of a download URL, percent-decoded
fn blob_name_from_url(url: &str) -> String {
    let segment = url
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .rsplit('/')
        .next()
        .unwrap_or_default();
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}
