use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use ragd_protocol::{Result, SparseVector};

use crate::filter::Filter;
use crate::types::{CollectionInfo, Point, PointGroup, ScoredPoint, ScrollResult};

/// Payload fields that get a keyword index on every collection.
pub const PAYLOAD_INDEX_FIELDS: &[&str] = &["file", "language", "layer", "service", "type"];

/// Minimal, engine-agnostic vector backend contract.
///
/// Collection names given to any method may be aliases; the backend resolves
/// them. All operations are idempotent by point id.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if it does not exist yet.
    async fn ensure_collection(&self, name: &str, dimension: usize, sparse: bool) -> Result<()>;

    /// Batched insert/update, idempotent by id.
    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()>;

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>>;

    /// Group hits by a payload field, returning the top `group_size` per group.
    async fn search_groups(
        &self,
        collection: &str,
        vector: &[f32],
        group_by: &str,
        k: usize,
        group_size: usize,
        filter: Option<&Filter>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<PointGroup>>;

    /// Backend-native dense+sparse hybrid search.
    async fn search_hybrid(
        &self,
        collection: &str,
        dense: &[f32],
        sparse: &SparseVector,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredPoint>>;

    /// Recommend by example point ids.
    async fn recommend(
        &self,
        collection: &str,
        positive: &[String],
        negative: &[String],
        k: usize,
    ) -> Result<Vec<ScoredPoint>>;

    /// Paged listing, optionally filtered. No ranking.
    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
        offset: Option<String>,
    ) -> Result<ScrollResult>;

    /// Fetch specific points by id. Unknown ids are skipped.
    async fn retrieve(&self, collection: &str, ids: &[String]) -> Result<Vec<Point>>;

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<()>;

    /// Delete everything matching the filter; returns how many went away.
    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<usize>;

    /// Merge fields into one point's payload.
    async fn set_payload(
        &self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<()>;

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize>;

    /// Count points grouped by the string value of a payload field.
    async fn aggregate_by_field(
        &self,
        collection: &str,
        field: &str,
    ) -> Result<HashMap<String, usize>>;

    /// For each seed, its neighbourhood with similarity ≥ threshold.
    async fn find_clusters(
        &self,
        collection: &str,
        seed_ids: &[String],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<Vec<ScoredPoint>>>;

    /// Groups of near-identical points (pairwise similarity ≥ threshold).
    async fn find_duplicates(
        &self,
        collection: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<Vec<String>>>;

    // ---- Aliases ----

    async fn create_alias(&self, alias: &str, collection: &str) -> Result<()>;

    /// Atomically repoint an alias. Readers see the old or the new collection
    /// in full, never a partial union.
    async fn switch_alias(&self, alias: &str, new_collection: &str) -> Result<()>;

    async fn list_aliases(&self) -> Result<HashMap<String, String>>;

    /// Create keyword payload indexes over [`PAYLOAD_INDEX_FIELDS`].
    async fn ensure_payload_indexes(&self, collection: &str) -> Result<()>;

    // ---- Collection lifecycle ----

    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Remove all points, keep the collection.
    async fn clear_collection(&self, name: &str) -> Result<()>;

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo>;
}

/// Resolve which concrete collection an alias points at, if any.
pub async fn alias_target(store: &dyn VectorStore, alias: &str) -> Result<Option<String>> {
    Ok(store.list_aliases().await?.get(alias).cloned())
}
