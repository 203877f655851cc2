use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ragd_protocol::SparseVector;

/// A vectorised record as stored in a collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse: Option<SparseVector>,
    pub payload: Map<String, Value>,
}

impl Point {
    pub fn new(id: impl Into<String>, vector: Vec<f32>, payload: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            vector,
            sparse: None,
            payload,
        }
    }

    pub fn with_sparse(mut self, sparse: Option<SparseVector>) -> Self {
        self.sparse = sparse;
        self
    }

    /// String payload field, when present and a string.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// A search hit: point id, similarity score and payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Map<String, Value>,
}

impl ScoredPoint {
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// One group from a grouped search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointGroup {
    pub key: String,
    pub hits: Vec<ScoredPoint>,
}

/// A page of points from a scroll.
#[derive(Debug, Clone, Default)]
pub struct ScrollResult {
    pub points: Vec<Point>,
    /// Offset token for the next page; `None` when exhausted.
    pub next_offset: Option<String>,
}

/// Collection metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub vector_count: usize,
    pub dimension: usize,
    pub sparse_enabled: bool,
}
