//! Registry of recognized variant (tweak) labels

use ftrepo_common::json_store::read_json;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// On-disk shape of the variant list file
#[derive(Debug, Default, Deserialize)]
struct VariantListFile {
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
    #[serde(default)]
    tweaks: Vec<String>,
}

/// Known variant labels, matched case-insensitively
///
/// Label order is preserved so the inference prompt lists variants in the
/// order the curator wrote them.
#[derive(Debug, Clone, Default)]
pub struct VariantRegistry {
    labels: Vec<String>,
    by_lowercase: HashMap<String, usize>,
}

impl VariantRegistry {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::default();
        for label in labels {
            let label = label.as_ref().trim();
            if label.is_empty() {
                continue;
            }
            let lower = label.to_lowercase();
            if registry.by_lowercase.contains_key(&lower) {
                continue;
            }
            registry.by_lowercase.insert(lower, registry.labels.len());
            registry.labels.push(label.to_string());
        }
        registry
    }

    /// Load the registry from a `{"tweaks": [...]}` file
    ///
    /// A missing file yields an empty registry. A malformed file is an error.
    pub fn load(path: &Path) -> ftrepo_common::Result<Self> {
        match read_json::<VariantListFile>(path)? {
            Some(file) => {
                let registry = Self::new(file.tweaks);
                info!(
                    "Loaded {} variant labels from {}",
                    registry.len(),
                    path.display()
                );
                Ok(registry)
            }
            None => {
                warn!(
                    "Variant list not found at {}; no variant suffixes will be derived",
                    path.display()
                );
                Ok(Self::default())
            }
        }
    }

    pub fn contains(&self, label: &str) -> bool {
        self.by_lowercase.contains_key(&label.trim().to_lowercase())
    }

    /// Registry spelling of a label, if recognized
    pub fn canonical(&self, label: &str) -> Option<&str> {
        self.by_lowercase
            .get(&label.trim().to_lowercase())
            .map(|&idx| self.labels[idx].as_str())
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
