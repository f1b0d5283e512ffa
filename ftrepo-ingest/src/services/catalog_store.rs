//! In-memory catalog with version-aware upsert
//!
//! At most one entry exists per (key, variant) slot. A candidate replaces the
//! slot's entry only when it is strictly newer; equal or older candidates
//! are rejected as stale.

use super::version::compare_versions;
use crate::models::{CatalogEntry, SlotKey};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

/// Why an upsert was (or was not) applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpsertReason {
    /// Slot was empty
    New,
    /// Candidate version is strictly greater
    Upgraded,
    /// Candidate version is equal or lower
    Stale,
    /// Versions not comparable and the raw strings differ
    ReplacedUnversioned,
}

impl UpsertReason {
    pub fn is_applied(&self) -> bool {
        !matches!(self, UpsertReason::Stale)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertReason::New => "new",
            UpsertReason::Upgraded => "upgraded",
            UpsertReason::Stale => "stale",
            UpsertReason::ReplacedUnversioned => "replaced-unversioned",
        }
    }
}

/// Result of [`CatalogStore::upsert`]
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub applied: bool,
    pub reason: UpsertReason,
    /// Entry that previously occupied the slot, when one was replaced
    pub replaced: Option<CatalogEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogStore {
    entries: BTreeMap<SlotKey, CatalogEntry>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store by upserting each entry in order
    ///
    /// Returns the store and the number of entries dropped because their
    /// slot already held an equal or newer version.
    pub fn from_entries<I>(entries: I) -> (Self, usize)
    where
        I: IntoIterator<Item = CatalogEntry>,
    {
        let mut store = Self::new();
        let mut dropped = 0;
        for entry in entries {
            if !store.upsert(entry).applied {
                dropped += 1;
            }
        }
        (store, dropped)
    }

    /// Decide what [`upsert`](Self::upsert) would do, without changing anything
    pub fn evaluate(&self, candidate: &CatalogEntry) -> UpsertReason {
        let Some(existing) = self.entries.get(&candidate.slot()) else {
            return UpsertReason::New;
        };

        match compare_versions(&candidate.version, &existing.version) {
            Some(Ordering::Greater) => UpsertReason::Upgraded,
            Some(_) => UpsertReason::Stale,
            None if candidate.version.trim() != existing.version.trim() => {
                UpsertReason::ReplacedUnversioned
            }
            None => UpsertReason::Stale,
        }
    }

    /// Insert or replace the candidate's slot according to version order
    pub fn upsert(&mut self, candidate: CatalogEntry) -> UpsertOutcome {
        let reason = self.evaluate(&candidate);
        if !reason.is_applied() {
            debug!(
                slot = %candidate.slot(),
                version = %candidate.version,
                "Rejected stale candidate"
            );
            return UpsertOutcome {
                applied: false,
                reason,
                replaced: None,
            };
        }

        let replaced = self.entries.insert(candidate.slot(), candidate);
        UpsertOutcome {
            applied: true,
            reason,
            replaced,
        }
    }

    pub fn get(&self, key: &str, variant: Option<&str>) -> Option<&CatalogEntry> {
        self.entries.get(&SlotKey::new(key, variant))
    }

    /// Keep only entries matching `keep`; returns the removed entries
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<CatalogEntry>
    where
        F: FnMut(&CatalogEntry) -> bool,
    {
        let doomed: Vec<SlotKey> = self
            .entries
            .iter()
            .filter(|&(_, entry)| !keep(entry))
            .map(|(slot, _)| slot.clone())
            .collect();

        doomed
            .into_iter()
            .filter_map(|slot| self.entries.remove(&slot))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries ordered by display name, then variant (base first), then key
    pub fn export(&self) -> Vec<CatalogEntry> {
        let mut entries: Vec<CatalogEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.variant_label.cmp(&b.variant_label))
                .then_with(|| a.key.cmp(&b.key))
        });
        entries
    }
}
