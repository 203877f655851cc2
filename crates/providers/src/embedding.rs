use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use ragd_protocol::{ApiError, FullEmbedding, SparseVector};

pub type Result<T> = std::result::Result<T, ApiError>;

/// External embedding service contract.
///
/// The engine only ever sees this trait; which model server backs it is a
/// deployment concern.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text into a dense vector of `dimension()` floats.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch in one upstream call. Order is preserved.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Dense plus sparse representation, when the provider supports sparse.
    async fn embed_full(&self, text: &str) -> Result<FullEmbedding>;

    fn dimension(&self) -> usize;

    fn supports_sparse(&self) -> bool {
        false
    }
}

fn service_error(err: &reqwest::Error) -> ApiError {
    if let Some(status) = err.status() {
        if status.as_u16() == 429 {
            return ApiError::RateLimit {
                service: "embedding".into(),
                retry_after_secs: None,
            };
        }
    }
    ApiError::external("embedding", err.to_string())
}

// ---------------------------------------------------------------------------
// BGE-M3 serving container
// ---------------------------------------------------------------------------

/// Client for a BGE-M3 style embedding server exposing `POST /embed` with
/// `{texts, return_sparse}` and returning dense rows plus optional sparse
/// index/value pairs.
pub struct BgeM3Client {
    http: reqwest::Client,
    base_url: String,
    dimension: usize,
    sparse_enabled: bool,
}

#[derive(Deserialize)]
struct BgeEmbedResponse {
    dense: Vec<Vec<f32>>,
    #[serde(default)]
    sparse: Vec<SparseVector>,
}

impl BgeM3Client {
    pub fn new(base_url: impl Into<String>, dimension: usize, sparse_enabled: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            dimension,
            sparse_enabled,
        }
    }

    async fn request(&self, texts: &[String], return_sparse: bool) -> Result<BgeEmbedResponse> {
        let response = self
            .http
            .post(format!("{}/embed", self.base_url))
            .json(&serde_json::json!({
                "texts": texts,
                "return_sparse": return_sparse,
            }))
            .send()
            .await
            .map_err(|e| service_error(&e))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ApiError::RateLimit {
                service: "embedding".into(),
                retry_after_secs: response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok()),
            });
        }
        if !status.is_success() {
            return Err(ApiError::external(
                "embedding",
                format!("embed endpoint returned {status}"),
            ));
        }

        response
            .json::<BgeEmbedResponse>()
            .await
            .map_err(|e| ApiError::external("embedding", format!("invalid embed response: {e}")))
    }
}

#[async_trait]
impl EmbeddingProvider for BgeM3Client {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut response = self.request(&[text.to_string()], false).await?;
        response
            .dense
            .pop()
            .ok_or_else(|| ApiError::external("embedding", "empty dense response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.request(texts, false).await?;
        if response.dense.len() != texts.len() {
            return Err(ApiError::external(
                "embedding",
                format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    response.dense.len()
                ),
            ));
        }
        Ok(response.dense)
    }

    async fn embed_full(&self, text: &str) -> Result<FullEmbedding> {
        let mut response = self
            .request(&[text.to_string()], self.sparse_enabled)
            .await?;
        let dense = response
            .dense
            .pop()
            .ok_or_else(|| ApiError::external("embedding", "empty dense response"))?;
        Ok(FullEmbedding {
            dense,
            sparse: response.sparse.pop().filter(|s| !s.is_empty()),
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn supports_sparse(&self) -> bool {
        self.sparse_enabled
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

/// Client for Ollama's `/api/embeddings` endpoint. Dense only.
pub struct OllamaEmbedding {
    http: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedding {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .http
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": text,
            }))
            .send()
            .await
            .map_err(|e| service_error(&e))?;

        if !response.status().is_success() {
            return Err(ApiError::external(
                "embedding",
                format!("ollama returned {}", response.status()),
            ));
        }

        let body: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| ApiError::external("embedding", format!("invalid response: {e}")))?;
        Ok(body.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Ollama has no batch endpoint; issue sequential requests.
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    async fn embed_full(&self, text: &str) -> Result<FullEmbedding> {
        Ok(FullEmbedding {
            dense: self.embed(text).await?,
            sparse: None,
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ---------------------------------------------------------------------------
// Deterministic hash embedder
// ---------------------------------------------------------------------------

/// Deterministic token-hashing embedder.
///
/// Used by the test suites and as an offline fallback: texts sharing tokens
/// land close in cosine space, and the same text always produces the same
/// vector. No network, no model files.
pub struct HashEmbedder {
    dimension: usize,
    sparse_enabled: bool,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            sparse_enabled: false,
        }
    }

    pub fn with_sparse(dimension: usize) -> Self {
        Self {
            dimension,
            sparse_enabled: true,
        }
    }

    fn token_bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        let raw = u64::from_le_bytes(digest[..8].try_into().expect("8 bytes"));
        (raw % self.dimension as u64) as usize
    }

    fn dense(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.split(|c: char| !c.is_alphanumeric()) {
            if token.len() < 2 {
                continue;
            }
            vector[self.token_bucket(token)] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn sparse(&self, text: &str) -> SparseVector {
        let mut counts = std::collections::BTreeMap::new();
        for token in text.split(|c: char| !c.is_alphanumeric()) {
            if token.len() < 2 {
                continue;
            }
            *counts.entry(self.token_bucket(token) as u32).or_insert(0.0) += 1.0;
        }
        let (indices, values) = counts.into_iter().unzip();
        SparseVector { indices, values }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.dense(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.dense(t)).collect())
    }

    async fn embed_full(&self, text: &str) -> Result<FullEmbedding> {
        Ok(FullEmbedding {
            dense: self.dense(text),
            sparse: self.sparse_enabled.then(|| self.sparse(text)),
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn supports_sparse(&self) -> bool {
        self.sparse_enabled
    }
}
