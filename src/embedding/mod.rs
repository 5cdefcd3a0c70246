//! Embedding provider abstraction and implementations.
//!
//! Two realisations sit behind [`EmbeddingProvider`]:
//!
//! - **[`HttpEmbeddingGateway`]** — fans requests out over a pool of HTTP
//!   embedding replicas with round-robin selection, a health table with
//!   cooldown, per-request timeouts, and exponential backoff. This is the
//!   production path.
//! - **[`LocalEmbeddingProvider`]** — an in-process fallback used when no
//!   endpoint is configured. It is held as a lazily-initialised singleton
//!   behind a single-flight guard; the in-process model must never be
//!   loaded twice.
//!
//! Also provides vector utilities shared with the stores:
//! [`cosine_similarity`], [`vec_to_blob`], [`blob_to_vec`].
//!
//! # Retry strategy
//!
//! - HTTP 429 / 503 / 5xx and connect/timeout errors rotate to the next
//!   healthy endpoint; the failing one sits out a cooldown window.
//! - Once every endpoint has been tried, the gateway backs off
//!   exponentially (1s, 2s, 4s, ...) before the next round.
//! - Other 4xx responses fail immediately — they will not improve on retry.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use crate::config::EmbeddingConfig;
use crate::error::LexError;

/// Trait for embedding backends.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded with every chunk.
    fn model_name(&self) -> &str;
    /// Embedding dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts. Output preserves input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LexError>;
}

/// Embed a single query text.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    text: &str,
) -> Result<Vec<f32>, LexError> {
    let mut vectors = provider.embed_batch(&[text.to_string()]).await?;
    vectors
        .pop()
        .ok_or_else(|| LexError::internal("empty embedding response"))
}

/// Create the provider matching the configuration: HTTP gateway when
/// endpoints are configured, otherwise the in-process singleton.
pub async fn create_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, LexError> {
    if config.endpoints.is_empty() {
        Ok(local_provider(config).await)
    } else {
        Ok(Arc::new(HttpEmbeddingGateway::new(config)?))
    }
}

// ============ HTTP gateway ============

#[derive(Debug)]
struct EndpointHealth {
    cursor: usize,
    /// Per-endpoint cooldown deadline; `None` means healthy.
    unhealthy_until: Vec<Option<Instant>>,
}

/// HTTP fan-out over one or more embedding replicas.
#[derive(Debug)]
pub struct HttpEmbeddingGateway {
    endpoints: Vec<String>,
    client: reqwest::Client,
    model: String,
    dims: usize,
    max_batch: usize,
    max_retries: u32,
    cooldown: Duration,
    // The only shared mutable state; held for index arithmetic only.
    health: Mutex<EndpointHealth>,
}

impl HttpEmbeddingGateway {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, LexError> {
        if config.endpoints.is_empty() {
            return Err(LexError::invalid_input(
                "embedding gateway requires at least one endpoint",
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LexError::internal(format!("http client init failed: {}", e)))?;

        Ok(Self {
            endpoints: config.endpoints.clone(),
            client,
            model: config.model.clone(),
            dims: config.dims,
            max_batch: config.max_batch,
            max_retries: config.max_retries,
            cooldown: Duration::from_secs(config.cooldown_secs),
            health: Mutex::new(EndpointHealth {
                cursor: 0,
                unhealthy_until: vec![None; config.endpoints.len()],
            }),
        })
    }

    /// Round-robin over endpoints, skipping those in cooldown. Falls back
    /// to plain rotation when every endpoint is cooling down, so a stale
    /// health table cannot wedge the gateway.
    fn next_endpoint(&self) -> usize {
        let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let n = self.endpoints.len();
        for offset in 0..n {
            let index = (health.cursor + offset) % n;
            let healthy = match health.unhealthy_until[index] {
                Some(deadline) => now >= deadline,
                None => true,
            };
            if healthy {
                health.unhealthy_until[index] = None;
                health.cursor = (index + 1) % n;
                return index;
            }
        }
        let index = health.cursor % n;
        health.cursor = (index + 1) % n;
        index
    }

    fn mark_unhealthy(&self, index: usize) {
        let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        health.unhealthy_until[index] = Some(Instant::now() + self.cooldown);
    }

    async fn embed_sub_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LexError> {
        let rounds = (self.max_retries as usize + 1) * self.endpoints.len();
        let mut last_error = String::new();

        for attempt in 0..rounds {
            if attempt > 0 && attempt % self.endpoints.len() == 0 {
                // Every endpoint tried this round; back off before the next.
                let exponent = (attempt / self.endpoints.len()).min(5) as u32;
                tokio::time::sleep(Duration::from_secs(1 << (exponent - 1))).await;
            }

            let index = self.next_endpoint();
            let url = format!("{}/embed", self.endpoints[index]);
            let response = self
                .client
                .post(&url)
                .json(&serde_json::json!({ "inputs": texts, "truncate": true }))
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let vectors: Vec<Vec<f32>> = resp.json().await.map_err(|e| {
                        LexError::EmbeddingUnavailable {
                            message: format!("malformed embedding response: {}", e),
                        }
                    })?;
                    if vectors.len() != texts.len() {
                        return Err(LexError::EmbeddingUnavailable {
                            message: format!(
                                "endpoint returned {} vectors for {} inputs",
                                vectors.len(),
                                texts.len()
                            ),
                        });
                    }
                    return Ok(vectors);
                }
                Ok(resp) => {
                    let status = resp.status();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::debug!(endpoint = %self.endpoints[index], %status, "embedding endpoint overloaded");
                        self.mark_unhealthy(index);
                        last_error = format!("endpoint returned {}", status);
                        continue;
                    }
                    // Non-retryable client error.
                    return Err(LexError::EmbeddingUnavailable {
                        message: format!("endpoint rejected request with {}", status),
                    });
                }
                Err(e) => {
                    tracing::debug!(endpoint = %self.endpoints[index], error = %e, "embedding endpoint unreachable");
                    self.mark_unhealthy(index);
                    last_error = "connection failed".to_string();
                    continue;
                }
            }
        }

        Err(LexError::EmbeddingUnavailable {
            message: format!("all endpoints failed after {} attempts: {}", rounds, last_error),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingGateway {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LexError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut all = Vec::with_capacity(texts.len());
        for sub_batch in texts.chunks(self.max_batch) {
            let mut vectors = self.embed_sub_batch(sub_batch).await?;
            all.append(&mut vectors);
        }
        Ok(all)
    }
}

// ============ In-process fallback ============

/// Deterministic in-process embedder used when no endpoint is configured.
///
/// Stands in for the external model runtime behind the same interface: each
/// text maps to a reproducible L2-normalised vector derived from content
/// digests, so ingestion stays replayable and search stays exact-match
/// stable without network access.
pub struct LocalEmbeddingProvider {
    model: String,
    dims: usize,
}

impl LocalEmbeddingProvider {
    fn new(config: &EmbeddingConfig) -> Self {
        Self {
            model: format!("{}-local", config.model),
            dims: config.dims,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dims);
        let mut counter: u32 = 0;
        while vector.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(counter.to_le_bytes());
            hasher.update(text.as_bytes());
            let digest = hasher.finalize();
            for window in digest.chunks_exact(4) {
                if vector.len() >= self.dims {
                    break;
                }
                let raw = u32::from_le_bytes([window[0], window[1], window[2], window[3]]);
                vector.push((raw as f32 / u32::MAX as f32) * 2.0 - 1.0);
            }
            counter += 1;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LexError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

static LOCAL_PROVIDER: OnceCell<Arc<LocalEmbeddingProvider>> = OnceCell::const_new();

/// Singleton accessor for the in-process provider. Concurrent first callers
/// coalesce into one initialisation (single-flight).
pub async fn local_provider(config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    let provider = LOCAL_PROVIDER
        .get_or_init(|| async {
            tracing::info!("initialising in-process embedding fallback");
            Arc::new(LocalEmbeddingProvider::new(config))
        })
        .await;
    provider.clone()
}

// ============ Vector utilities ============

/// Cosine similarity clamped to `[0, 1]`, 1 is identical.
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
    (dot / denom).clamp(0.0, 1.0)
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
