//! Variant-safe identifier derivation
//!
//! Stores that key installs by bundle identifier cannot show a base app and
//! its variants side by side. The derived catalog gives every entry whose
//! variant is in the registry its own identifier: `<key>.<variant>`,
//! lowercased. Entries with unrecognized or no variants keep their key.

use crate::models::{CatalogEntry, VariantRegistry};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Short description of an entry for conflict reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryRef {
    pub key: String,
    pub name: String,
    pub version: String,
}

impl From<&CatalogEntry> for EntryRef {
    fn from(entry: &CatalogEntry) -> Self {
        Self {
            key: entry.key.clone(),
            name: entry.full_name(),
            version: entry.version.clone(),
        }
    }
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.name, self.version, self.key)
    }
}

/// A derivation decision that needs a human to look at it
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DerivationConflict {
    /// Two entries produced the same derived key; the first was kept
    #[error("Derived key {derived_key} claimed by {kept} and {dropped}; kept the first")]
    DuplicateKey {
        derived_key: String,
        kept: EntryRef,
        dropped: EntryRef,
    },

    /// Key already ends with the variant suffix; left unchanged
    #[error("{entry} already ends with .{suffix}; key left unchanged")]
    SuffixAlreadyPresent { entry: EntryRef, suffix: String },
}

/// One entry of the derived catalog
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedEntry {
    pub derived_key: String,
    pub entry: CatalogEntry,
}

/// Derived catalog plus everything that could not be derived cleanly
#[derive(Debug, Clone, Default)]
pub struct DerivedCatalog {
    pub entries: Vec<DerivedEntry>,
    pub conflicts: Vec<DerivationConflict>,
}

/// Identifier for one entry, plus a conflict when the suffix was already there
pub fn derived_key(
    entry: &CatalogEntry,
    registry: &VariantRegistry,
) -> (String, Option<DerivationConflict>) {
    let Some(label) = entry
        .variant_label
        .as_deref()
        .and_then(|label| registry.canonical(label))
    else {
        return (entry.key.clone(), None);
    };

    let suffix = label.to_lowercase();
    if entry.key.to_lowercase().ends_with(&format!(".{}", suffix)) {
        let conflict = DerivationConflict::SuffixAlreadyPresent {
            entry: EntryRef::from(entry),
            suffix,
        };
        return (entry.key.clone(), Some(conflict));
    }

    (format!("{}.{}", entry.key, suffix), None)
}

/// Derive identifiers for an exported catalog
///
/// Input order is preserved. When two entries derive the same key, the one
/// that comes first is kept and the other is reported and left out.
pub fn derive(entries: &[CatalogEntry], registry: &VariantRegistry) -> DerivedCatalog {
    let mut derived = DerivedCatalog::default();
    let mut claimed: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        let (key, conflict) = derived_key(entry, registry);
        if let Some(conflict) = conflict {
            warn!("{}", conflict);
            derived.conflicts.push(conflict);
        }

        if let Some(&idx) = claimed.get(&key) {
            let conflict = DerivationConflict::DuplicateKey {
                derived_key: key,
                kept: EntryRef::from(&derived.entries[idx].entry),
                dropped: EntryRef::from(entry),
            };
            warn!("{}", conflict);
            derived.conflicts.push(conflict);
            continue;
        }

        claimed.insert(key.clone(), derived.entries.len());
        derived.entries.push(DerivedEntry {
            derived_key: key,
            entry: entry.clone(),
        });
    }

    derived
}
