//! Typed clients for the embedding and chat endpoints.
//!
//! The core depends only on the [`EmbeddingApi`] and [`ChatApi`]
//! capability traits. Two variants exist:
//!
//! - [`OpenAiClient`] — direct HTTP client against an OpenAI-compatible
//!   endpoint.
//! - [`AuditEmbedding`] / [`AuditChat`] — wrap another client and write
//!   one structured audit record per call.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error};

use crate::error::RagError;

/// One chat message with an OpenAI-compatible role (`user`, `system`,
/// `assistant`).
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Capability: turn text into a fixed-dimension vector.
#[async_trait]
pub trait EmbeddingApi: Send + Sync {
    fn model(&self) -> &str;
    async fn embed(&self, text: &str, dimensions: usize) -> Result<Vec<f32>, RagError>;
}

/// Capability: one chat completion over a message list.
#[async_trait]
pub trait ChatApi: Send + Sync {
    fn model(&self) -> &str;
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, RagError>;
}

/// Plain HTTP client for an OpenAI-compatible endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, RagError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.post(format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }
}

#[async_trait]
impl EmbeddingApi for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str, dimensions: usize) -> Result<Vec<f32>, RagError> {
        let body = json!({
            "model": self.model,
            "input": text,
            "dimensions": dimensions,
            "encoding_format": "float",
        });

        let response = self.request("/embeddings").json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RagError::Upstream(format!(
                "embedding endpoint returned {status}: {detail}"
            )));
        }

        let payload: serde_json::Value = response.json().await?;
        let vector: Vec<f32> = payload
            .pointer("/data/0/embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                RagError::Upstream("embedding response is missing data[0].embedding".to_string())
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if vector.len() != dimensions {
            return Err(RagError::DimensionMismatch {
                expected: dimensions,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}

#[async_trait]
impl ChatApi for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, RagError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
        });

        let response = self.request("/chat/completions").json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RagError::Upstream(format!(
                "chat endpoint returned {status}: {detail}"
            )));
        }

        let payload: serde_json::Value = response.json().await?;
        payload
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| RagError::Upstream("no choices in chat completion".to_string()))
    }
}

/// One audit record per API call, written as pretty-printed JSON.
#[derive(Debug, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub api_type: String,
    pub model: String,
    pub request: serde_json::Value,
    pub response: serde_json::Value,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Writes audit records under a directory, one file per call.
/// Write failures are logged, never propagated.
pub struct AuditLogger {
    dir: PathBuf,
}

impl AuditLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn log(&self, record: AuditRecord) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            error!(error = %e, "failed to create audit log directory");
            return;
        }
        let nanos = record
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| record.timestamp.timestamp_millis());
        let path = self
            .dir
            .join(format!("api_call_{}_{}.json", record.api_type, nanos));
        match serde_json::to_string_pretty(&record) {
            Ok(data) => {
                if let Err(e) = std::fs::write(&path, data) {
                    error!(error = %e, path = %path.display(), "failed to write audit record");
                } else {
                    debug!(path = %path.display(), "audit record written");
                }
            }
            Err(e) => error!(error = %e, "failed to serialize audit record"),
        }
    }
}

/// Auditing wrapper over an [`EmbeddingApi`].
pub struct AuditEmbedding {
    inner: Arc<dyn EmbeddingApi>,
    logger: Arc<AuditLogger>,
}

impl AuditEmbedding {
    pub fn new(inner: Arc<dyn EmbeddingApi>, logger: Arc<AuditLogger>) -> Self {
        Self { inner, logger }
    }
}

#[async_trait]
impl EmbeddingApi for AuditEmbedding {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn embed(&self, text: &str, dimensions: usize) -> Result<Vec<f32>, RagError> {
        let start = Instant::now();
        let result = self.inner.embed(text, dimensions).await;
        let duration = start.elapsed();

        let response = match &result {
            Ok(vector) => json!({ "dimensions": vector.len() }),
            Err(_) => serde_json::Value::Null,
        };
        self.logger.log(AuditRecord {
            timestamp: Utc::now(),
            api_type: "embeddings".to_string(),
            model: self.inner.model().to_string(),
            request: json!({
                "model": self.inner.model(),
                "input": text,
                "dimensions": dimensions,
                "encoding_format": "float",
            }),
            response,
            duration_ms: duration.as_millis() as u64,
            error: result.as_ref().err().map(|e| e.to_string()),
            request_id: None,
        });
        result
    }
}

/// Auditing wrapper over a [`ChatApi`].
pub struct AuditChat {
    inner: Arc<dyn ChatApi>,
    logger: Arc<AuditLogger>,
}

impl AuditChat {
    pub fn new(inner: Arc<dyn ChatApi>, logger: Arc<AuditLogger>) -> Self {
        Self { inner, logger }
    }
}

#[async_trait]
impl ChatApi for AuditChat {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, RagError> {
        let start = Instant::now();
        let result = self.inner.chat(messages).await;
        let duration = start.elapsed();

        let response = match &result {
            Ok(content) => json!({ "content": content }),
            Err(_) => serde_json::Value::Null,
        };
        self.logger.log(AuditRecord {
            timestamp: Utc::now(),
            api_type: "chat".to_string(),
            model: self.inner.model().to_string(),
            request: json!({
                "model": self.inner.model(),
                "messages": messages,
            }),
            response,
            duration_ms: duration.as_millis() as u64,
            error: result.as_ref().err().map(|e| e.to_string()),
            request_id: None,
        });
        result
    }
}
