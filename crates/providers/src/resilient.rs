use std::sync::Arc;

use async_trait::async_trait;

use ragd_protocol::FullEmbedding;
use ragd_reliability::{with_retry, CircuitBreaker, RetryPolicy};

use crate::embedding::{EmbeddingProvider, Result};
use crate::llm::{Completion, CompletionOptions, LlmProvider};

/// Breaker-wraps-retry decoration of an embedding provider.
///
/// The breaker counts one failure per exhausted retry sequence, so a single
/// network blip never trips it but a sustained outage does. When the breaker
/// is open, calls fail fast with `CIRCUIT_OPEN` without touching the wire.
pub struct ResilientEmbedding {
    inner: Arc<dyn EmbeddingProvider>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
}

impl ResilientEmbedding {
    pub fn new(
        inner: Arc<dyn EmbeddingProvider>,
        breaker: Arc<CircuitBreaker>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            inner,
            breaker,
            policy,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for ResilientEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let inner = Arc::clone(&self.inner);
        let policy = self.policy;
        self.breaker
            .call(|| async move {
                with_retry("embedding.embed", policy, || {
                    let inner = Arc::clone(&inner);
                    async move { inner.embed(text).await }
                })
                .await
            })
            .await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inner = Arc::clone(&self.inner);
        let policy = self.policy;
        self.breaker
            .call(|| async move {
                with_retry("embedding.embed_batch", policy, || {
                    let inner = Arc::clone(&inner);
                    async move { inner.embed_batch(texts).await }
                })
                .await
            })
            .await
    }

    async fn embed_full(&self, text: &str) -> Result<FullEmbedding> {
        let inner = Arc::clone(&self.inner);
        let policy = self.policy;
        self.breaker
            .call(|| async move {
                with_retry("embedding.embed_full", policy, || {
                    let inner = Arc::clone(&inner);
                    async move { inner.embed_full(text).await }
                })
                .await
            })
            .await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn supports_sparse(&self) -> bool {
        self.inner.supports_sparse()
    }
}

/// Breaker-wraps-retry decoration of an LLM provider.
pub struct ResilientLlm {
    inner: Arc<dyn LlmProvider>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
}

impl ResilientLlm {
    pub fn new(
        inner: Arc<dyn LlmProvider>,
        breaker: Arc<CircuitBreaker>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            inner,
            breaker,
            policy,
        }
    }
}

#[async_trait]
impl LlmProvider for ResilientLlm {
    async fn complete(&self, prompt: &str, opts: &CompletionOptions) -> Result<Completion> {
        let inner = Arc::clone(&self.inner);
        let policy = self.policy;
        self.breaker
            .call(|| async move {
                with_retry("llm.complete", policy, || {
                    let inner = Arc::clone(&inner);
                    async move { inner.complete(prompt, opts).await }
                })
                .await
            })
            .await
    }
}
