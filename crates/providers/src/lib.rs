//! External collaborators behind traits: the embedding service and the LLM.
//!
//! The engine consumes `EmbeddingProvider` and `LlmProvider`; concrete
//! clients here speak HTTP to a BGE-M3 style server or Ollama. The hash
//! embedder and static LLM keep every test hermetic.

pub mod embedding;
pub mod llm;
pub mod resilient;

pub use embedding::{BgeM3Client, EmbeddingProvider, HashEmbedder, OllamaEmbedding};
pub use llm::{Completion, CompletionOptions, LlmProvider, OllamaLlm, StaticLlm};
pub use resilient::{ResilientEmbedding, ResilientLlm};

use std::sync::Arc;

use ragd_protocol::ApiError;

/// Which embedding backend to construct.
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub provider: String,
    pub url: String,
    pub model: String,
    pub dimension: usize,
    pub sparse_enabled: bool,
}

/// Which LLM backend to construct.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: String,
    pub url: String,
    pub model: String,
}

/// Build the embedding provider named in the settings.
pub fn build_embedding(
    settings: &EmbeddingSettings,
) -> Result<Arc<dyn EmbeddingProvider>, ApiError> {
    match settings.provider.as_str() {
        "bge-m3" | "bge_m3" => Ok(Arc::new(BgeM3Client::new(
            &settings.url,
            settings.dimension,
            settings.sparse_enabled,
        ))),
        "ollama" => Ok(Arc::new(OllamaEmbedding::new(
            &settings.url,
            &settings.model,
            settings.dimension,
        ))),
        "hash" => Ok(Arc::new(if settings.sparse_enabled {
            HashEmbedder::with_sparse(settings.dimension)
        } else {
            HashEmbedder::new(settings.dimension)
        })),
        other => Err(ApiError::Configuration(format!(
            "unknown embedding provider '{other}' (expected bge-m3, ollama or hash)"
        ))),
    }
}

/// Build the LLM provider named in the settings.
pub fn build_llm(settings: &LlmSettings) -> Result<Arc<dyn LlmProvider>, ApiError> {
    match settings.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaLlm::new(&settings.url, &settings.model))),
        other => Err(ApiError::Configuration(format!(
            "unknown llm provider '{other}' (expected ollama)"
        ))),
    }
}
