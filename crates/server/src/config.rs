use ragd_protocol::{ApiError, Result};

/// Server configuration, resolved from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address to bind, e.g. `0.0.0.0:8080`.
    pub bind: String,
    /// Default project when `X-Project-Name` is absent.
    pub default_project: Option<String>,
    /// Default project path for the indexer.
    pub default_project_path: Option<String>,
    /// API keys; empty disables auth.
    pub api_keys: Vec<String>,

    pub embedding_provider: String,
    pub embedding_url: String,
    pub embedding_model: String,
    pub vector_size: usize,
    pub sparse_enabled: bool,

    pub llm_provider: String,
    pub llm_url: String,
    pub llm_model: String,

    /// `qdrant` (REST backend at `qdrant_url`) or `memory` (embedded).
    pub vector_backend: String,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,

    pub confluence_base_url: Option<String>,
    pub confluence_email: Option<String>,
    pub confluence_api_token: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let vector_size: usize = env_or("VECTOR_SIZE", "768")
            .parse()
            .map_err(|_| ApiError::Configuration("VECTOR_SIZE must be an integer".into()))?;
        if vector_size == 0 {
            return Err(ApiError::Configuration("VECTOR_SIZE must be positive".into()));
        }

        let embedding_provider = env_or("EMBEDDING_PROVIDER", "bge-m3");
        let embedding_url = match embedding_provider.as_str() {
            "ollama" => env_or("OLLAMA_URL", "http://localhost:11434"),
            _ => env_or("BGE_M3_URL", "http://localhost:8080"),
        };

        Ok(Self {
            bind: env_or("RAG_API_URL", "0.0.0.0:3333")
                .trim_start_matches("http://")
                .to_string(),
            default_project: env_opt("PROJECT_NAME"),
            default_project_path: env_opt("PROJECT_PATH"),
            api_keys: env_opt("RAGD_API_KEYS")
                .map(|raw| raw.split(',').map(|k| k.trim().to_string()).collect())
                .unwrap_or_default(),
            embedding_provider,
            embedding_url,
            embedding_model: env_or("EMBEDDING_MODEL", "bge-m3"),
            vector_size,
            sparse_enabled: env_or("SPARSE_VECTORS_ENABLED", "false") == "true",
            llm_provider: env_or("LLM_PROVIDER", "ollama"),
            llm_url: env_or("OLLAMA_URL", "http://localhost:11434"),
            llm_model: env_or("LLM_MODEL", "qwen2.5-coder:7b"),
            vector_backend: env_or("VECTOR_BACKEND", "qdrant"),
            qdrant_url: env_or("QDRANT_URL", "http://localhost:6333"),
            qdrant_api_key: env_opt("QDRANT_API_KEY"),
            confluence_base_url: env_opt("CONFLUENCE_BASE_URL"),
            confluence_email: env_opt("CONFLUENCE_EMAIL"),
            confluence_api_token: env_opt("CONFLUENCE_API_TOKEN"),
        })
    }

    /// Sanitized view for /health: no secrets.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "embeddingProvider": self.embedding_provider,
            "llmProvider": self.llm_provider,
            "vectorBackend": self.vector_backend,
            "vectorSize": self.vector_size,
            "sparseVectorsEnabled": self.sparse_enabled,
            "authEnabled": !self.api_keys.is_empty(),
            "confluenceConfigured": self.confluence_base_url.is_some(),
        })
    }
}
