use serde::{Deserialize, Serialize};

/// Sparse vector in index/value pairs.
///
/// The layout is the wire format of the vector backend; nothing above the
/// vector-store contract interprets it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Dense embedding plus optional sparse companion.
#[derive(Debug, Clone, Default)]
pub struct FullEmbedding {
    pub dense: Vec<f32>,
    pub sparse: Option<SparseVector>,
}
