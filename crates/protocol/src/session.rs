use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// FIFO bound on the files a session tracks.
pub const MAX_SESSION_FILES: usize = 20;
/// FIFO bound on the queries a session tracks.
pub const MAX_SESSION_QUERIES: usize = 50;
/// How many trailing queries a resumed session inherits.
pub const RESUME_QUERY_CARRYOVER: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Ended,
}

/// Live working context of one agent/editor session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session_id: String,
    pub project: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(default)]
    pub current_files: Vec<String>,
    #[serde(default)]
    pub recent_queries: Vec<String>,
    #[serde(default)]
    pub active_features: Vec<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub pending_learnings: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SessionContext {
    pub fn new(session_id: String, project: String, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            project,
            started_at: now,
            last_activity_at: now,
            status: SessionStatus::Active,
            current_files: Vec::new(),
            recent_queries: Vec::new(),
            active_features: Vec::new(),
            tools_used: Vec::new(),
            pending_learnings: Vec::new(),
            decisions: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Track a file, deduplicating and truncating oldest-first.
    pub fn touch_file(&mut self, file: &str) {
        push_bounded(&mut self.current_files, file, MAX_SESSION_FILES);
    }

    /// Track a query, truncating oldest-first.
    pub fn record_query(&mut self, query: &str) {
        push_bounded(&mut self.recent_queries, query, MAX_SESSION_QUERIES);
    }

    pub fn record_tool(&mut self, tool: &str) {
        if !self.tools_used.iter().any(|t| t == tool) {
            self.tools_used.push(tool.to_string());
        }
    }
}

fn push_bounded(list: &mut Vec<String>, value: &str, cap: usize) {
    if let Some(pos) = list.iter().position(|v| v == value) {
        list.remove(pos);
    }
    list.push(value.to_string());
    while list.len() > cap {
        list.remove(0);
    }
}

/// One activity event recorded against a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionActivity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
}

/// Returned when a session is ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub project: String,
    pub duration_secs: i64,
    pub tools_used: Vec<String>,
    pub files_touched: Vec<String>,
    pub query_count: usize,
    pub learnings_saved: usize,
    pub decisions_saved: usize,
    pub summary: String,
}
