use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexPhase {
    Idle,
    Indexing,
    Completed,
    Error,
}

/// Process-local snapshot of a project's indexing job.
///
/// Lives for the life of the server; lost on restart. Only the indexer task
/// for the project mutates it, everyone else reads snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub project: String,
    pub status: IndexPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_files: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_files: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_count: Option<usize>,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Cooperative cancellation flag, checked between files.
    #[serde(default)]
    pub cancelled: bool,
}

impl IndexStatus {
    pub fn idle(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            status: IndexPhase::Idle,
            total_files: None,
            indexed_files: None,
            last_updated: None,
            vector_count: None,
            errors: Vec::new(),
            cancelled: false,
        }
    }
}

/// Aggregate counts for a project's indexed tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub file_count: usize,
    pub total_lines: usize,
    pub languages: HashMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_indexed: Option<DateTime<Utc>>,
}
