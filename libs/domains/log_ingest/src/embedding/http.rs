use std::time::Duration;

use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_optional, env_or_default, env_parse};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;
use crate::error::{IngestError, IngestResult};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";
const HEALTH_PROBE_TEXT: &str = "health check";

/// Configuration for an OpenAI-compatible `/embeddings` endpoint
#[derive(Debug, Clone)]
pub struct HttpEmbeddingConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimension: usize,
    /// Send `dimensions` with each request; servers without Matryoshka support reject it
    pub send_dimensions: bool,
    pub timeout: Duration,
}

impl HttpEmbeddingConfig {
    pub fn new(base_url: impl Into<String>, dimension: usize) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            dimension,
            send_dimensions: true,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_dimensions_param(mut self, send: bool) -> Self {
        self.send_dimensions = send;
        self
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }

    fn request<'a>(&'a self, text: &'a str) -> EmbeddingRequest<'a> {
        EmbeddingRequest {
            model: &self.model,
            input: [text],
            dimensions: self.send_dimensions.then_some(self.dimension),
        }
    }
}

impl FromEnv for HttpEmbeddingConfig {
    /// - EMBEDDING_URL: defaults to https://api.openai.com/v1
    /// - EMBEDDING_API_KEY: optional bearer token
    /// - EMBEDDING_MODEL: defaults to text-embedding-3-small
    /// - EMBEDDING_DIMENSION: defaults to 1536
    /// - EMBEDDING_SEND_DIMENSIONS: defaults to true
    /// - EMBEDDING_TIMEOUT_MS: defaults to 10000
    fn from_env() -> Result<Self, ConfigError> {
        let dimension: usize = env_parse("EMBEDDING_DIMENSION", 1536)?;
        if dimension == 0 {
            return Err(ConfigError::invalid("EMBEDDING_DIMENSION", "must be at least 1"));
        }

        let timeout_ms: u64 = env_parse("EMBEDDING_TIMEOUT_MS", 10_000)?;
        if timeout_ms == 0 {
            return Err(ConfigError::invalid("EMBEDDING_TIMEOUT_MS", "must be at least 1"));
        }

        Ok(Self {
            base_url: env_or_default("EMBEDDING_URL", DEFAULT_BASE_URL),
            api_key: env_optional("EMBEDDING_API_KEY"),
            model: env_or_default("EMBEDDING_MODEL", DEFAULT_MODEL),
            dimension,
            send_dimensions: env_parse("EMBEDDING_SEND_DIMENSIONS", true)?,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

/// Embedding provider speaking the OpenAI `POST /embeddings` protocol.
///
/// Works against OpenAI itself and compatible servers (vLLM, Ollama, TEI).
pub struct HttpEmbeddingProvider {
    client: Client,
    config: HttpEmbeddingConfig,
}

impl HttpEmbeddingProvider {
    pub fn new(config: HttpEmbeddingConfig) -> IngestResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| IngestError::Config(format!("embedding http client: {}", e)))?;

        Ok(Self { client, config })
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// 429 and 5xx are worth retrying; any other failure status is final.
fn classify_status(status: StatusCode, body: &str) -> IngestError {
    let message = format!("embedding API error ({}): {}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        IngestError::EmbeddingProvider(message)
    } else {
        IngestError::EmbeddingRejected(message)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    async fn embed(&self, text: &str) -> IngestResult<Vec<f32>> {
        let request = self.config.request(text);
        let mut builder = self.client.post(self.config.embeddings_url()).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text));
        }

        let body: EmbeddingResponse = response.json().await?;

        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| IngestError::EmbeddingRejected("no embedding returned".to_string()))
    }

    async fn health_check(&self) -> IngestResult<()> {
        self.embed(HEALTH_PROBE_TEXT).await.map(|_| ())
    }
}
