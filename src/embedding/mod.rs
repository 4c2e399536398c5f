//! Text embedding with a deterministic fallback.
//!
//! An [`EmbeddingProvider`] is the primary model: fastembed in-process
//! (`local`), the OpenAI API (`openai`), or an Ollama server (`ollama`).
//! [`Embedder`] wraps an optional provider and never fails: when the
//! provider is missing, errors, or returns a vector of the wrong length, it
//! substitutes [`fallback_embedding`] and flags the result as degraded.
//!
//! HTTP providers retry transient errors with exponential backoff:
//! 429 and 5xx responses and network errors are retried (1s, 2s, 4s ...
//! capped at 32s), other 4xx responses fail immediately.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

#[cfg(feature = "local-embeddings")]
const DEFAULT_LOCAL_MODEL: &str = "bge-small-en-v1.5";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn model_name(&self) -> &str;

    fn dims(&self) -> usize;
}

/// A vector plus whether it came from the fallback path.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub degraded: bool,
}

pub struct Embedder {
    primary: Option<Arc<dyn EmbeddingProvider>>,
    dims: usize,
    batch_size: usize,
}

impl Embedder {
    pub fn new(primary: Option<Arc<dyn EmbeddingProvider>>, dims: usize) -> Self {
        Self {
            primary,
            dims,
            batch_size: 64,
        }
    }

    /// An embedder with no model; every vector is a fallback vector.
    pub fn fallback_only(dims: usize) -> Self {
        Self::new(None, dims)
    }

    /// Build the configured provider. A provider that cannot be created
    /// (missing API key, model download failure) is logged and the
    /// embedder runs on fallback vectors only.
    pub async fn from_config(config: &EmbeddingConfig) -> Self {
        let primary = match create_provider(config).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(
                    provider = %config.provider,
                    error = %e,
                    "embedding model unavailable, using fallback vectors"
                );
                None
            }
        };
        Self {
            primary,
            dims: config.dims,
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    pub async fn embed(&self, text: &str) -> Embedding {
        let mut out = self.embed_batch(&[text.to_string()]).await;
        out.pop().unwrap_or_else(|| self.fallback(text))
    }

    /// Embed many texts, falling back per text where the model's answer is
    /// unusable. The output always has one entry per input.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Embedding> {
        let Some(primary) = &self.primary else {
            return texts.iter().map(|t| self.fallback(t)).collect();
        };

        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            match primary.embed_texts(batch).await {
                Ok(vectors) if vectors.len() == batch.len() => {
                    for (text, vector) in batch.iter().zip(vectors) {
                        if vector.len() == self.dims {
                            out.push(Embedding {
                                vector,
                                degraded: false,
                            });
                        } else {
                            tracing::warn!(
                                expected = self.dims,
                                got = vector.len(),
                                "embedding has wrong dimensionality, using fallback"
                            );
                            out.push(self.fallback(text));
                        }
                    }
                }
                Ok(vectors) => {
                    tracing::warn!(
                        expected = batch.len(),
                        got = vectors.len(),
                        "embedding model returned wrong number of vectors, using fallback"
                    );
                    out.extend(batch.iter().map(|t| self.fallback(t)));
                }
                Err(e) => {
                    tracing::warn!(
                        model = primary.model_name(),
                        error = %e,
                        "embedding failed, using fallback"
                    );
                    out.extend(batch.iter().map(|t| self.fallback(t)));
                }
            }
        }
        out
    }

    fn fallback(&self, text: &str) -> Embedding {
        Embedding {
            vector: fallback_embedding(text, self.dims),
            degraded: true,
        }
    }
}

/// Deterministic pseudo-embedding of `text` with `dims` components in `[0, 1)`.
///
/// SHA-256 in counter mode: block `n` hashes the text followed by `n` as a
/// little-endian `u32`. Each 4-byte little-endian word becomes one
/// component, keeping its top 24 bits so the value is exact in `f32`.
pub fn fallback_embedding(text: &str, dims: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dims);
    let mut counter: u32 = 0;
    while out.len() < dims {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(counter.to_le_bytes());
        let block = hasher.finalize();
        for word in block.chunks_exact(4) {
            if out.len() == dims {
                break;
            }
            let w = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            out.push((w >> 8) as f32 / (1u32 << 24) as f32);
        }
        counter = counter.wrapping_add(1);
    }
    out
}

// ============ OpenAI ============

pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(self.max_retries, "OpenAI", || {
            self.client
                .post("https://api.openai.com/v1/embeddings")
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;
        parse_openai_response(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, json_floats(embedding)));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/api/embed", self.url);
        let json = post_with_retry(self.max_retries, "Ollama", || {
            self.client.post(&endpoint).json(&body)
        })
        .await?;
        parse_ollama_response(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| {
            e.as_array()
                .map(|a| json_floats(a))
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

fn json_floats(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

/// Send a JSON request, retrying 429/5xx and network errors.
async fn post_with_retry<F>(max_retries: u32, label: &str, build: F) -> Result<serde_json::Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    tracing::debug!(attempt, %status, "{} embedding request will be retried", label);
                    last_err = Some(anyhow::anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} connection error: {}", label, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} embedding failed after retries", label)))
}

// ============ Local (fastembed) ============

/// In-process ONNX model. Loaded once; inference runs on a blocking thread.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
    model_name: String,
    dims: usize,
    batch_size: usize,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub async fn load(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
        let fastembed_model = config_to_fastembed_model(&model_name)?;

        let model = tokio::task::spawn_blocking(move || {
            fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
            )
            .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))
        })
        .await??;

        Ok(Self {
            model: Arc::new(std::sync::Mutex::new(model)),
            model_name,
            dims: config.dims,
            batch_size: config.batch_size.max(1),
        })
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        let batch_size = self.batch_size;

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

#[cfg(feature = "local-embeddings")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             multilingual-e5-small",
            other
        ),
    }
}

/// Instantiate the provider named by `config.provider`; `disabled` yields `None`.
pub async fn create_provider(
    config: &EmbeddingConfig,
) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "disabled" => return Ok(None),
        "openai" => Arc::new(OpenAIProvider::new(config)?),
        "ollama" => Arc::new(OllamaProvider::new(config)?),
        #[cfg(feature = "local-embeddings")]
        "local" => Arc::new(LocalProvider::load(config).await?),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    };
    Ok(Some(provider))
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty, mismatched, or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider {
        dims: usize,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                bail!("model offline");
            }
            Ok(texts.iter().map(|_| vec![0.5; self.dims]).collect())
        }
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.dims
        }
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let a = fallback_embedding("quarterly report", 384);
        let b = fallback_embedding("quarterly report", 384);
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
        assert!(a.iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn test_fallback_differs_for_different_text() {
        assert_ne!(
            fallback_embedding("listen", 16),
            fallback_embedding("silent", 16)
        );
        assert_ne!(fallback_embedding("a", 16), fallback_embedding("b", 16));
    }

    #[test]
    fn test_fallback_prefix_stable_across_dims() {
        let short = fallback_embedding("same text", 5);
        let long = fallback_embedding("same text", 20);
        assert_eq!(&long[..5], &short[..]);
    }

    #[tokio::test]
    async fn test_embedder_without_model_is_degraded() {
        let embedder = Embedder::fallback_only(8);
        let e = embedder.embed("hello").await;
        assert!(e.degraded);
        assert_eq!(e.vector, fallback_embedding("hello", 8));
    }

    #[tokio::test]
    async fn test_embedder_uses_primary() {
        let embedder = Embedder::new(Some(Arc::new(FixedProvider { dims: 4, fail: false })), 4);
        let e = embedder.embed("hello").await;
        assert!(!e.degraded);
        assert_eq!(e.vector, vec![0.5; 4]);
    }

    #[tokio::test]
    async fn test_embedder_falls_back_on_error() {
        let embedder = Embedder::new(Some(Arc::new(FixedProvider { dims: 4, fail: true })), 4);
        let out = embedder
            .embed_batch(&["one".to_string(), "two".to_string()])
            .await;
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|e| e.degraded));
        assert_eq!(out[1].vector, fallback_embedding("two", 4));
    }

    #[tokio::test]
    async fn test_embedder_falls_back_on_wrong_dims() {
        let embedder = Embedder::new(Some(Arc::new(FixedProvider { dims: 3, fail: false })), 4);
        let e = embedder.embed("hello").await;
        assert!(e.degraded);
        assert_eq!(e.vector.len(), 4);
    }

    #[tokio::test]
    async fn test_disabled_provider_is_none() {
        let config = EmbeddingConfig {
            provider: "disabled".to_string(),
            ..Default::default()
        };
        assert!(create_provider(&config).await.unwrap().is_none());
        let embedder = Embedder::from_config(&config).await;
        assert!(!embedder.has_primary());
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [2.0, 2.0]},
                {"index": 0, "embedding": [1.0, 1.0]}
            ]
        });
        let out = parse_openai_response(&json).unwrap();
        assert_eq!(out, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({"embeddings": [[0.25, 0.5]]});
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![vec![0.25, 0.5]]);
        assert!(parse_ollama_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
