//! Inference service clients
//!
//! Backends turn an announcement (description + filename) into an untyped
//! [`RawInference`]. Nothing here decides whether the answer is usable; the
//! metadata extractor validates every response before it is trusted.

use crate::models::VariantRegistry;
use async_trait::async_trait;
use ftrepo_common::config::{InferenceConfig, InferenceProvider};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

const USER_AGENT: &str = concat!("ftrepo-ingest/", env!("CARGO_PKG_VERSION"));
const TITLE: &str = "FTRepo Ingest";
const MAX_TOKENS: u32 = 500;

/// Inference call errors
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid API key")]
    InvalidApiKey,
}

/// Untyped inference response, exactly as the service returned it
///
/// Field names are accepted in both camelCase and snake_case. Values stay as
/// raw JSON so numbers, nulls, and the string `"null"` can be told apart
/// during validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInference {
    #[serde(default, alias = "app_name")]
    pub app_name: Option<Value>,
    #[serde(default)]
    pub version: Option<Value>,
    #[serde(default, alias = "variant_label", alias = "tweak_name", alias = "tweakName")]
    pub variant_label: Option<Value>,
    #[serde(
        default,
        alias = "resolved_key",
        alias = "bundle_id",
        alias = "bundleId",
        alias = "bundleIdentifier"
    )]
    pub resolved_key: Option<Value>,
    #[serde(default, alias = "cleaned_description", alias = "description")]
    pub cleaned_description: Option<Value>,
}

impl RawInference {
    /// Parse a JSON object, tolerating a surrounding Markdown code fence
    pub fn from_content(content: &str) -> Result<Self, InferenceError> {
        let trimmed = content.trim();
        let body = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|rest| rest.strip_suffix("```"))
            .unwrap_or(trimmed)
            .trim();

        serde_json::from_str(body).map_err(|e| InferenceError::ParseError(e.to_string()))
    }
}

/// A service that can infer metadata for one announcement
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Label used in logs and extraction errors (usually the model name)
    fn name(&self) -> &str;

    async fn infer(&self, description: &str, filename: &str)
        -> Result<RawInference, InferenceError>;
}

/// Minimum spacing between requests, shared by all backends of a run
pub struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    pub async fn wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut last = self.last_request.lock().await;
        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Inference rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }
        *last = Some(Instant::now());
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client, InferenceError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| InferenceError::NetworkError(e.to_string()))
}

fn map_send_error(e: reqwest::Error, timeout: Duration) -> InferenceError {
    if e.is_timeout() {
        InferenceError::Timeout(timeout)
    } else {
        InferenceError::NetworkError(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, InferenceError> {
    let status = response.status();
    if status == 401 {
        return Err(InferenceError::InvalidApiKey);
    }
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(InferenceError::ApiError(status.as_u16(), error_text));
    }
    Ok(response)
}

/// System prompt sent with every chat-completions request
pub fn system_prompt(registry: &VariantRegistry) -> String {
    let known_variants = if registry.is_empty() {
        "  (no variants are recognized; always return null for variantLabel)".to_string()
    } else {
        registry
            .labels()
            .map(|label| format!("  - {}", label))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You extract iOS app metadata from a chat announcement of an .ipa file. \
Return a single JSON object with exactly these fields:\n\
- appName: current official App Store name of the BASE app, without tweak names or \
suffixes such as Plus, Pro, ++ or (Patched). Prefer the English name. null if unsure.\n\
- version: the app version, e.g. \"19.10.5\".\n\
- variantLabel: the tweak name, ONLY if it is one of the known variants below; \
uploader or developer names are never variants. Otherwise null.\n\
- resolvedKey: the official App Store bundle identifier of the BASE app. \
Tweaks never change it (Instagram is com.burbn.instagram, TikTok is \
com.zhiliaoapp.musically, X is com.atebits.Tweetie2, YouTube is com.google.ios.youtube).\n\
- cleanedDescription: the announcement text with Markdown removed and otherwise unchanged.\n\n\
Known variants:\n{}\n\n\
Reply with the JSON object only.",
        known_variants
    )
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenRouter chat-completions backend for one model
pub struct OpenRouterBackend {
    http_client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    endpoint: String,
    api_key: String,
    model: String,
    system_prompt: String,
    referer: Option<String>,
    timeout: Duration,
}

impl OpenRouterBackend {
    pub fn new(
        config: &InferenceConfig,
        api_key: String,
        model: String,
        registry: &VariantRegistry,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, InferenceError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            http_client: build_http_client(timeout)?,
            rate_limiter,
            endpoint: config.endpoint.clone(),
            api_key,
            model,
            system_prompt: system_prompt(registry),
            referer: config.referer.clone().filter(|r| !r.trim().is_empty()),
            timeout,
        })
    }

    fn post<T: Serialize>(&self, body: &T) -> reqwest::RequestBuilder {
        let request = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Title", TITLE);
        let request = match &self.referer {
            Some(referer) => request.header("HTTP-Referer", referer),
            None => request,
        };
        request.json(body)
    }
}

#[async_trait]
impl InferenceBackend for OpenRouterBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn infer(
        &self,
        description: &str,
        filename: &str,
    ) -> Result<RawInference, InferenceError> {
        self.rate_limiter.wait().await;

        let context = format!("Description: {}\nFilename: {}", description, filename);
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &context,
                },
            ],
            temperature: 0.0,
            max_tokens: MAX_TOKENS,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        tracing::debug!(model = %self.model, filename = filename, "Requesting metadata inference");

        let response = self
            .post(&request)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;

        let completion: ChatCompletionResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| InferenceError::ParseError(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| InferenceError::ParseError("response has no message content".to_string()))?;

        RawInference::from_content(&content)
    }
}

/// Request body for the plain HTTP backend
#[derive(Debug, Serialize)]
pub struct InferenceRequest<'a> {
    pub description: &'a str,
    pub filename: &'a str,
}

/// Plain JSON backend: POST `{description, filename}`, response is the metadata object
pub struct HttpInferenceBackend {
    http_client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    endpoint: String,
    api_key: Option<String>,
    label: String,
    timeout: Duration,
}

impl HttpInferenceBackend {
    pub fn new(
        config: &InferenceConfig,
        api_key: Option<String>,
        label: String,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, InferenceError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            http_client: build_http_client(timeout)?,
            rate_limiter,
            endpoint: config.endpoint.clone(),
            api_key,
            label,
            timeout,
        })
    }
}

#[async_trait]
impl InferenceBackend for HttpInferenceBackend {
    fn name(&self) -> &str {
        &self.label
    }

    async fn infer(
        &self,
        description: &str,
        filename: &str,
    ) -> Result<RawInference, InferenceError> {
        self.rate_limiter.wait().await;

        let mut request = self
            .http_client
            .post(&self.endpoint)
            .json(&InferenceRequest {
                description,
                filename,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;

        let body = check_status(response)
            .await?
            .text()
            .await
            .map_err(|e| InferenceError::NetworkError(e.to_string()))?;

        RawInference::from_content(&body)
    }
}

/// Primary and optional fallback backend
pub type BackendPair = (Arc<dyn InferenceBackend>, Option<Arc<dyn InferenceBackend>>);

/// Build the configured backends; both share one rate limiter
///
/// The plain HTTP provider has no notion of models, so it never gets a
/// fallback.
pub fn backends_from_config(
    config: &InferenceConfig,
    api_key: Option<String>,
    registry: &VariantRegistry,
) -> Result<BackendPair, InferenceError> {
    let rate_limiter = Arc::new(RateLimiter::new(config.min_interval_ms));

    match config.provider {
        InferenceProvider::OpenRouter => {
            let api_key = api_key.ok_or(InferenceError::InvalidApiKey)?;
            let primary = OpenRouterBackend::new(
                config,
                api_key.clone(),
                config.primary_model.clone(),
                registry,
                Arc::clone(&rate_limiter),
            )?;
            let fallback = match &config.fallback_model {
                Some(model) => Some(Arc::new(OpenRouterBackend::new(
                    config,
                    api_key,
                    model.clone(),
                    registry,
                    rate_limiter,
                )?) as Arc<dyn InferenceBackend>),
                None => None,
            };
            let primary: Arc<dyn InferenceBackend> = Arc::new(primary);
            Ok((primary, fallback))
        }
        InferenceProvider::Http => {
            if config.fallback_model.is_some() {
                tracing::debug!("Fallback model ignored for the HTTP inference provider");
            }
            let primary = HttpInferenceBackend::new(
                config,
                api_key,
                config.endpoint.clone(),
                rate_limiter,
            )?;
            let primary: Arc<dyn InferenceBackend> = Arc::new(primary);
            Ok((primary, None))
        }
    }
}
