//! In-memory stand-ins for the chat source, blob store, inference service
//! and App Store search

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use ftrepo_ingest::services::blob_store::public_url;
use ftrepo_ingest::services::{
    AppStoreError, AppStoreSearch, Attachment, BlobError, BlobStore, ChatSource, InferenceBackend,
    InferenceError, RawInference, SourceError, SourceHandle, StoreListing, TransientFetchError,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::CDN;

/// Attachment posted `minutes_ago`; its bytes are the filename
pub fn attachment(filename: &str, description: &str, minutes_ago: i64) -> Attachment {
    Attachment {
        filename: filename.to_string(),
        description: description.to_string(),
        posted_at: Some(Utc::now() - ChronoDuration::minutes(minutes_ago)),
        size: Some(filename.len() as u64),
        locator: filename.to_string(),
    }
}

/// Minimal .ipa: a zip holding `Payload/App.app/Info.plist`
pub fn ipa(bundle_id: &str, version: &str, min_os: &str) -> Vec<u8> {
    let mut dict = plist::Dictionary::new();
    for (key, value) in [
        ("CFBundleIdentifier", bundle_id),
        ("CFBundleShortVersionString", version),
        ("MinimumOSVersion", min_os),
    ] {
        dict.insert(key.to_string(), plist::Value::String(value.to_string()));
    }
    let mut info = Vec::new();
    plist::Value::Dictionary(dict).to_writer_xml(&mut info).unwrap();

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("Payload/App.app/Info.plist", zip::write::FileOptions::default())
        .unwrap();
    writer.write_all(&info).unwrap();
    writer.finish().unwrap().into_inner()
}

/// Chat source backed by fixed attachment lists
#[derive(Default)]
pub struct MemorySource {
    channels: Vec<String>,
    topics: HashMap<String, Vec<String>>,
    attachments: HashMap<String, Vec<Attachment>>,
    /// Download bytes by filename; others download as their filename
    contents: HashMap<String, Vec<u8>>,
    failing_downloads: HashSet<String>,
    unavailable: HashSet<String>,
    downloads: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain channel; attachments are listed in the given order
    pub fn channel(mut self, name: &str, attachments: Vec<Attachment>) -> Self {
        self.channels.push(name.to_string());
        self.attachments.insert(name.to_string(), attachments);
        self
    }

    /// Add a topic to an existing channel
    pub fn topic(mut self, channel: &str, topic: &str, attachments: Vec<Attachment>) -> Self {
        self.topics
            .entry(channel.to_string())
            .or_default()
            .push(topic.to_string());
        self.attachments
            .insert(format!("{}/{}", channel, topic), attachments);
        self
    }

    /// Serve `bytes` when `filename` is downloaded
    pub fn contents(mut self, filename: &str, bytes: Vec<u8>) -> Self {
        self.contents.insert(filename.to_string(), bytes);
        self
    }

    pub fn failing_download(mut self, filename: &str) -> Self {
        self.failing_downloads.insert(filename.to_string());
        self
    }

    /// Listing this channel or `channel/topic` fails
    pub fn unavailable(mut self, locator: &str) -> Self {
        self.unavailable.insert(locator.to_string());
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatSource for MemorySource {
    async fn list_channels(&self) -> Result<Vec<SourceHandle>, SourceError> {
        Ok(self
            .channels
            .iter()
            .map(|name| SourceHandle {
                channel: name.clone(),
                topic: None,
                locator: name.clone(),
            })
            .collect())
    }

    async fn list_topics(&self, channel: &SourceHandle) -> Result<Vec<SourceHandle>, SourceError> {
        Ok(self
            .topics
            .get(&channel.channel)
            .into_iter()
            .flatten()
            .map(|topic| SourceHandle {
                channel: channel.channel.clone(),
                topic: Some(topic.clone()),
                locator: format!("{}/{}", channel.channel, topic),
            })
            .collect())
    }

    async fn list_attachments(
        &self,
        handle: &SourceHandle,
        limit: usize,
    ) -> Result<Vec<Attachment>, SourceError> {
        if self.unavailable.contains(&handle.locator) {
            return Err(SourceError::ChannelUnavailable {
                channel: handle.label(),
                reason: "forbidden".to_string(),
            });
        }
        Ok(self
            .attachments
            .get(&handle.locator)
            .map(|items| items.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn download(&self, attachment: &Attachment) -> Result<Vec<u8>, TransientFetchError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.failing_downloads.contains(&attachment.filename) {
            return Err(TransientFetchError {
                filename: attachment.filename.clone(),
                reason: "connection reset".to_string(),
            });
        }
        Ok(self
            .contents
            .get(&attachment.filename)
            .cloned()
            .unwrap_or_else(|| attachment.filename.as_bytes().to_vec()))
    }
}

/// Blob store holding packages in memory, served under [`CDN`]
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_uploads: HashSet<String>,
    uploads: AtomicUsize,
    deletes: Mutex<Vec<String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-existing package
    pub fn with_blob(self, filename: &str) -> Self {
        self.blobs
            .lock()
            .unwrap()
            .insert(filename.to_string(), filename.as_bytes().to_vec());
        self
    }

    pub fn failing_upload(mut self, filename: &str) -> Self {
        self.failing_uploads.insert(filename.to_string());
        self
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(filename)
    }

    pub fn names(&self) -> Vec<String> {
        self.blobs.lock().unwrap().keys().cloned().collect()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list(&self) -> Result<BTreeSet<String>, BlobError> {
        Ok(self.blobs.lock().unwrap().keys().cloned().collect())
    }

    async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<String, BlobError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.failing_uploads.contains(filename) {
            return Err(BlobError::Rejected(format!("quota exceeded for {}", filename)));
        }
        self.blobs
            .lock()
            .unwrap()
            .insert(filename.to_string(), bytes.to_vec());
        Ok(public_url(CDN, filename))
    }

    async fn delete(&self, filename: &str) -> Result<(), BlobError> {
        self.deletes.lock().unwrap().push(filename.to_string());
        self.blobs.lock().unwrap().remove(filename);
        Ok(())
    }
}

/// Inference backend answering from a description-keyed script
///
/// Descriptions missing from the script fail with a network error.
#[derive(Default)]
pub struct ScriptedBackend {
    responses: HashMap<String, Value>,
    calls: AtomicUsize,
    cancel_on_first_call: Option<CancellationToken>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a well-formed answer for `description`
    pub fn answer(
        self,
        description: &str,
        app_name: &str,
        version: &str,
        variant: Option<&str>,
        key: &str,
    ) -> Self {
        self.raw(
            description,
            json!({
                "appName": app_name,
                "version": version,
                "variantLabel": variant,
                "resolvedKey": key,
                "cleanedDescription": description,
            }),
        )
    }

    /// Script an arbitrary response object for `description`
    pub fn raw(mut self, description: &str, response: Value) -> Self {
        self.responses.insert(description.to_string(), response);
        self
    }

    /// Cancel `token` when the first inference request arrives
    pub fn cancel_on_first_call(mut self, token: CancellationToken) -> Self {
        self.cancel_on_first_call = Some(token);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn infer(
        &self,
        description: &str,
        _filename: &str,
    ) -> Result<RawInference, InferenceError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Some(token) = &self.cancel_on_first_call {
                token.cancel();
            }
        }
        match self.responses.get(description) {
            Some(response) => serde_json::from_value(response.clone())
                .map_err(|e| InferenceError::ParseError(e.to_string())),
            None => Err(InferenceError::NetworkError("no scripted answer".to_string())),
        }
    }
}

/// App Store search answering from a term-keyed table; unknown terms find nothing
#[derive(Default)]
pub struct ScriptedStore {
    listings: HashMap<String, Vec<StoreListing>>,
    offline: bool,
    terms: Mutex<Vec<String>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `term` finds one listing for `bundle_id` with an icon
    pub fn listing(mut self, term: &str, name: &str, bundle_id: &str, icon: &str) -> Self {
        self.listings.entry(term.to_string()).or_default().push(StoreListing {
            name: name.to_string(),
            icon_url: Some(icon.to_string()),
            bundle_id: bundle_id.to_string(),
        });
        self
    }

    /// Every search fails with a network error
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn terms(&self) -> Vec<String> {
        self.terms.lock().unwrap().clone()
    }
}

#[async_trait]
impl AppStoreSearch for ScriptedStore {
    async fn search(&self, term: &str) -> Result<Vec<StoreListing>, AppStoreError> {
        self.terms.lock().unwrap().push(term.to_string());
        if self.offline {
            return Err(AppStoreError::NetworkError("offline".to_string()));
        }
        Ok(self.listings.get(term).cloned().unwrap_or_default())
    }
}
