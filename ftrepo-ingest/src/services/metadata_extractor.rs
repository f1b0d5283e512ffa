//! Metadata extraction with cache and model fallback
//!
//! Resolution order for one announcement:
//! 1. Fingerprint cache
//! 2. Primary backend
//! 3. Fallback backend (when configured and distinct from the primary)
//!
//! A backend "fails" when it errors, times out, or returns a response that
//! does not validate. Only validated results reach the cache.

use super::fingerprint_cache::FingerprintCache;
use super::inference_client::{InferenceBackend, RawInference};
use super::version;
use crate::error::PersistenceError;
use crate::models::InferredMetadata;
use ftrepo_common::fingerprint::{fingerprint_text, normalize_text};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Both inference attempts failed (or the only attempt failed)
#[derive(Debug, Error)]
#[error("Metadata extraction failed for {filename}: {summary}")]
pub struct ExtractionError {
    pub filename: String,
    /// One line per attempted backend: `"<backend>: <reason>"`
    pub summary: String,
}

/// Counters for one extractor lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractorStats {
    pub cache_hits: usize,
    pub primary_successes: usize,
    pub fallback_successes: usize,
    pub failures: usize,
}

pub struct MetadataExtractor {
    primary: Arc<dyn InferenceBackend>,
    fallback: Option<Arc<dyn InferenceBackend>>,
    cache: FingerprintCache,
    call_timeout: Duration,
    stats: ExtractorStats,
}

impl MetadataExtractor {
    /// Create an extractor
    ///
    /// A fallback with the same name as the primary is dropped: retrying the
    /// same model cannot change the outcome.
    pub fn new(
        primary: Arc<dyn InferenceBackend>,
        fallback: Option<Arc<dyn InferenceBackend>>,
        cache: FingerprintCache,
        call_timeout: Duration,
    ) -> Self {
        let fallback = fallback.filter(|f| {
            let distinct = f.name() != primary.name();
            if !distinct {
                debug!("Fallback backend matches primary ({}); disabled", f.name());
            }
            distinct
        });

        Self {
            primary,
            fallback,
            cache,
            call_timeout,
            stats: ExtractorStats::default(),
        }
    }

    /// Fingerprint identifying an announcement in the cache
    ///
    /// Derived from the normalized description only, so reposts with the
    /// same text under a different filename share one inference call. Items
    /// without any description fall back to the filename.
    pub fn fingerprint(description: &str, filename: &str) -> String {
        if normalize_text(description).is_empty() {
            fingerprint_text(&format!("filename:{}", filename))
        } else {
            fingerprint_text(description)
        }
    }

    /// Infer metadata for one announcement
    pub async fn extract(
        &mut self,
        description: &str,
        filename: &str,
    ) -> Result<InferredMetadata, ExtractionError> {
        let fingerprint = Self::fingerprint(description, filename);

        if let Some(cached) = self.cache.lookup(&fingerprint) {
            debug!(filename = filename, "Fingerprint cache hit");
            self.stats.cache_hits += 1;
            return Ok(cached.clone());
        }

        let mut failures = Vec::new();

        match self.attempt(&self.primary, description, filename).await {
            Ok(metadata) => {
                self.stats.primary_successes += 1;
                self.cache.store(&fingerprint, metadata.clone());
                return Ok(metadata);
            }
            Err(reason) => {
                warn!(
                    backend = self.primary.name(),
                    filename = filename,
                    "Primary inference failed: {}",
                    reason
                );
                failures.push(format!("{}: {}", self.primary.name(), reason));
            }
        }

        if let Some(fallback) = &self.fallback {
            info!(backend = fallback.name(), filename = filename, "Retrying with fallback model");
            match self.attempt(fallback, description, filename).await {
                Ok(metadata) => {
                    self.stats.fallback_successes += 1;
                    self.cache.store(&fingerprint, metadata.clone());
                    return Ok(metadata);
                }
                Err(reason) => {
                    warn!(
                        backend = fallback.name(),
                        filename = filename,
                        "Fallback inference failed: {}",
                        reason
                    );
                    failures.push(format!("{}: {}", fallback.name(), reason));
                }
            }
        }

        self.stats.failures += 1;
        Err(ExtractionError {
            filename: filename.to_string(),
            summary: failures.join("; "),
        })
    }

    /// One bounded call plus validation; the error is a human-readable reason
    async fn attempt(
        &self,
        backend: &Arc<dyn InferenceBackend>,
        description: &str,
        filename: &str,
    ) -> Result<InferredMetadata, String> {
        let raw = tokio::time::timeout(self.call_timeout, backend.infer(description, filename))
            .await
            .map_err(|_| format!("timed out after {:?}", self.call_timeout))?
            .map_err(|e| e.to_string())?;

        validate(raw, description).map_err(|e| format!("invalid response: {}", e))
    }

    pub fn stats(&self) -> &ExtractorStats {
        &self.stats
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    pub fn flush_cache(&mut self) -> Result<(), PersistenceError> {
        self.cache.flush()
    }
}

/// Text content of a raw field; `null`, `"null"`, and blank strings are absent
fn text_field(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() || text.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(text)
    }
}

/// Turn an untyped response into [`InferredMetadata`] or explain why not
pub fn validate(raw: RawInference, description: &str) -> Result<InferredMetadata, String> {
    let app_name = text_field(raw.app_name.as_ref()).ok_or("missing appName")?;

    let version = text_field(raw.version.as_ref()).ok_or("missing version")?;
    if !version::is_well_formed(&version) {
        return Err(format!("version {:?} contains no digits", version));
    }

    let resolved_key = text_field(raw.resolved_key.as_ref()).ok_or("missing resolvedKey")?;
    if resolved_key.chars().any(char::is_whitespace) {
        return Err(format!("resolvedKey {:?} contains whitespace", resolved_key));
    }

    let cleaned_description = match raw.cleaned_description {
        Some(Value::String(s)) if !s.trim().is_empty() && !s.trim().eq_ignore_ascii_case("null") => s,
        Some(Value::String(_)) | Some(Value::Null) | None => description.trim().to_string(),
        Some(other) => return Err(format!("cleanedDescription is not text: {}", other)),
    };

    Ok(InferredMetadata {
        app_name,
        version,
        variant_label: text_field(raw.variant_label.as_ref()),
        resolved_key,
        cleaned_description,
    })
}
