//! Validated output of the metadata extractor

use serde::{Deserialize, Serialize};

/// Structured metadata inferred from an announcement
///
/// Only ever constructed from a response that passed validation, so every
/// required field is present and well-formed. This is also the value stored
/// in the fingerprint cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferredMetadata {
    /// Official name of the base application
    pub app_name: String,
    /// Version token (contains at least one digit)
    pub version: String,
    /// Variant (tweak) name, if the announcement names one
    #[serde(default)]
    pub variant_label: Option<String>,
    /// Bundle identifier of the base application
    pub resolved_key: String,
    /// Announcement text with markup removed
    pub cleaned_description: String,
}
