use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Minimum number of non-whitespace characters for a chunk to be kept.
pub const MIN_CHUNK_CHARS: usize = 10;

/// Broad classification a file resolves to before parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Contract,
    Config,
    Docs,
    Code,
    Unknown,
}

impl FileKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FileKind::Contract => "contract",
            FileKind::Config => "config",
            FileKind::Docs => "docs",
            FileKind::Code => "code",
            FileKind::Unknown => "unknown",
        }
    }
}

/// The kind of content a parsed chunk carries, as stored in point payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Code,
    Config,
    Docs,
    Contract,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Code => "code",
            ChunkKind::Config => "config",
            ChunkKind::Docs => "docs",
            ChunkKind::Contract => "contract",
        }
    }
}

/// A semantically meaningful unit extracted from a file by a parser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParsedChunk {
    /// The text content of the chunk.
    pub content: String,

    /// Start line (1-indexed).
    pub start_line: usize,

    /// End line (1-indexed, inclusive).
    pub end_line: usize,

    /// Language tag ("typescript", "yaml", "markdown", ...).
    pub language: String,

    /// What kind of content this is.
    #[serde(rename = "type")]
    pub kind: ChunkKind,

    /// Symbols defined in this chunk (function names, heading text, env vars).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<String>,

    /// File-level imports; populated on the first chunk of a file only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,

    /// Free-form parser metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ParsedChunk {
    pub fn new(
        content: impl Into<String>,
        start_line: usize,
        end_line: usize,
        language: impl Into<String>,
        kind: ChunkKind,
    ) -> Self {
        Self {
            content: content.into(),
            start_line,
            end_line,
            language: language.into(),
            kind,
            symbols: Vec::new(),
            imports: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Chunks shorter than [`MIN_CHUNK_CHARS`] non-whitespace characters carry
    /// too little signal to embed and are dropped by every parser.
    pub fn is_substantial(&self) -> bool {
        self.content.chars().filter(|c| !c.is_whitespace()).count() >= MIN_CHUNK_CHARS
    }

    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// Rough token estimate (~4 chars per token for code).
    pub fn estimated_tokens(&self) -> usize {
        (self.content.len() / 4).max(1)
    }
}

/// Deterministic point id over `(project, file, start_line, end_line, content)`.
///
/// Re-indexing an unchanged chunk must produce the same id so the upsert is
/// idempotent at the vector layer.
pub fn point_id(project: &str, file: &str, chunk: &ParsedChunk) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project.as_bytes());
    hasher.update(b"\x00");
    hasher.update(file.as_bytes());
    hasher.update(b"\x00");
    hasher.update(chunk.start_line.to_le_bytes());
    hasher.update(chunk.end_line.to_le_bytes());
    hasher.update(Sha256::digest(chunk.content.as_bytes()));
    let digest = hasher.finalize();
    // First 16 bytes formatted as a UUID so any backend accepts it natively.
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        digest[0], digest[1], digest[2], digest[3],
        digest[4], digest[5], digest[6], digest[7],
        digest[8], digest[9], digest[10], digest[11],
        digest[12], digest[13], digest[14], digest[15],
    )
}
