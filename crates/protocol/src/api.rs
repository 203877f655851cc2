//! Request and response bodies shared between the HTTP surface, the eval
//! harness and the CLI.
//!
//! Handlers never see raw JSON: every request type derives `Validate` and is
//! checked before it reaches a service.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

use crate::memory::{Memory, MemoryType, TodoStatus};
use crate::session::SessionActivity;

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;
pub const DEFAULT_SEMANTIC_WEIGHT: f32 = 0.7;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;
pub const DEFAULT_TOKEN_BUDGET: usize = 4000;
pub const DEFAULT_MERGE_THRESHOLD: f32 = 0.9;

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_semantic_weight() -> f32 {
    DEFAULT_SEMANTIC_WEIGHT
}

fn default_similarity_threshold() -> f32 {
    DEFAULT_SIMILARITY_THRESHOLD
}

fn default_group_by() -> String {
    "file".to_string()
}

fn default_group_size() -> usize {
    3
}

fn default_hops() -> usize {
    1
}

fn default_token_budget() -> usize {
    DEFAULT_TOKEN_BUDGET
}

fn default_merge_threshold() -> f32 {
    DEFAULT_MERGE_THRESHOLD
}

fn default_merge_limit() -> usize {
    200
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub query: String,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: usize,
    /// Bare names are prefixed with `{project}_` by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub score_threshold: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HybridSearchRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub query: String,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: usize,
    #[serde(default = "default_semantic_weight")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub semantic_weight: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SimilarSearchRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub code: String,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: usize,
    #[serde(default = "default_similarity_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub score_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GroupedSearchRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub query: String,
    #[serde(default = "default_group_by")]
    pub group_by: String,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: usize,
    #[serde(default = "default_group_size")]
    #[validate(range(min = 1, max = 10))]
    pub group_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GraphSearchRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub query: String,
    #[serde(default = "default_hops")]
    #[validate(range(min = 1, max = 3))]
    pub hops: usize,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExplainRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// When set, up to 3 related chunks are pulled in for context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FindFeatureRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub feature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ContextPackRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub query: String,
    #[serde(default = "default_token_budget")]
    #[validate(range(min = 100, max = 128_000))]
    pub token_budget: usize,
    #[serde(default = "default_true")]
    pub include_memories: bool,
    #[serde(default = "default_true")]
    pub include_tests: bool,
    #[serde(default = "default_true")]
    pub include_graph: bool,
}

/// One ranked chunk as returned by the search family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    pub file: String,
    pub content: String,
    pub language: String,
    pub score: f32,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub query: String,
    pub count: usize,
    pub results: Vec<SearchResultItem>,
    /// `native-sparse` or `text-match-fusion` on hybrid responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedGroup {
    pub key: String,
    pub results: Vec<SearchResultItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedSearchResponse {
    pub query: String,
    pub groups: Vec<GroupedGroup>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSearchResponse {
    pub results: Vec<SearchResultItem>,
    pub graph_expanded: Vec<SearchResultItem>,
    pub expanded_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<LlmUsage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Structured output of `/api/explain`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    pub summary: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub key_components: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub potential_issues: Option<Vec<String>>,
}

impl Explanation {
    /// Fallback shape when the LLM output fails to parse as JSON.
    pub fn from_raw(raw: String) -> Self {
        Self {
            summary: raw,
            purpose: String::new(),
            key_components: Vec::new(),
            dependencies: Vec::new(),
            potential_issues: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindFeatureResponse {
    pub main_files: Vec<String>,
    pub related_files: Vec<String>,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextPackItem {
    /// Which facet contributed this entry: `semantic`, `memory`, `test`, `graph`.
    pub facet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub content: String,
    pub score: f32,
    pub tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPackResponse {
    pub items: Vec<ContextPackItem>,
    pub total_tokens: usize,
    pub token_budget: usize,
}

// ---------------------------------------------------------------------------
// Indexing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IndexRequest {
    /// Overrides the `X-Project-Path` header when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReindexRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RememberRequest {
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    #[validate(length(min = 1, message = "must not be empty"))]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RecallRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub query: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<MemoryType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MemoryListRequest {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<MemoryType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<MemoryType>,
    #[serde(default = "default_merge_threshold")]
    #[validate(range(min = 0.5, max = 1.0))]
    pub threshold: f32,
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default = "default_merge_limit")]
    #[validate(range(min = 1, max = 1000))]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BatchRememberRequest {
    #[validate(length(min = 1, message = "must not be empty"), nested)]
    pub items: Vec<RememberRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoUpdateRequest {
    pub status: TodoStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateMemoryRequest {
    pub validated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallHit {
    pub memory: Memory,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeCluster {
    pub count: usize,
    pub items: Vec<Memory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clusters: Option<Vec<MergeCluster>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRememberResponse {
    pub saved: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total: usize,
    pub by_type: HashMap<String, usize>,
}

// ---------------------------------------------------------------------------
// Sessions & usage analytics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_from: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

pub type ActivityRequest = SessionActivity;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TrackUsageRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_score: Option<f32>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SimilarQueriesRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub query: String,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: usize,
}

// ---------------------------------------------------------------------------
// Eval harness
// ---------------------------------------------------------------------------

/// A golden-query dataset, loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoldenFile {
    pub project_name: String,
    pub collection: String,
    pub api_url: String,
    pub queries: Vec<GoldenQuery>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoldenQuery {
    pub id: String,
    pub query: String,
    pub expected_files: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_limit")]
    pub k: usize,
}
