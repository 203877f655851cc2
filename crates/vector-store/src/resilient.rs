use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use ragd_protocol::{Result, SparseVector};
use ragd_reliability::CircuitBreaker;

use crate::filter::Filter;
use crate::store::VectorStore;
use crate::types::{CollectionInfo, Point, PointGroup, ScoredPoint, ScrollResult};

/// Breaker-guarded decoration of a vector backend.
///
/// Every call goes through the `vector_store` circuit breaker: five
/// consecutive upstream failures fail the backend fast for fifteen seconds
/// instead of stacking timeouts on every request.
pub struct ResilientStore {
    inner: Arc<dyn VectorStore>,
    breaker: Arc<CircuitBreaker>,
}

impl ResilientStore {
    pub fn new(inner: Arc<dyn VectorStore>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }
}

#[async_trait]
impl VectorStore for ResilientStore {
    async fn ensure_collection(&self, name: &str, dimension: usize, sparse: bool) -> Result<()> {
        self.breaker
            .call(|| self.inner.ensure_collection(name, dimension, sparse))
            .await
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        self.breaker.call(|| self.inner.upsert(collection, points)).await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>> {
        self.breaker
            .call(|| self.inner.search(collection, vector, k, filter, score_threshold))
            .await
    }

    async fn search_groups(
        &self,
        collection: &str,
        vector: &[f32],
        group_by: &str,
        k: usize,
        group_size: usize,
        filter: Option<&Filter>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<PointGroup>> {
        self.breaker
            .call(|| {
                self.inner.search_groups(
                    collection,
                    vector,
                    group_by,
                    k,
                    group_size,
                    filter,
                    score_threshold,
                )
            })
            .await
    }

    async fn search_hybrid(
        &self,
        collection: &str,
        dense: &[f32],
        sparse: &SparseVector,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredPoint>> {
        self.breaker
            .call(|| self.inner.search_hybrid(collection, dense, sparse, k, filter))
            .await
    }

    async fn recommend(
        &self,
        collection: &str,
        positive: &[String],
        negative: &[String],
        k: usize,
    ) -> Result<Vec<ScoredPoint>> {
        self.breaker
            .call(|| self.inner.recommend(collection, positive, negative, k))
            .await
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
        offset: Option<String>,
    ) -> Result<ScrollResult> {
        self.breaker
            .call(|| self.inner.scroll(collection, filter, limit, offset))
            .await
    }

    async fn retrieve(&self, collection: &str, ids: &[String]) -> Result<Vec<Point>> {
        self.breaker.call(|| self.inner.retrieve(collection, ids)).await
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<()> {
        self.breaker.call(|| self.inner.delete_points(collection, ids)).await
    }

    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<usize> {
        self.breaker
            .call(|| self.inner.delete_by_filter(collection, filter))
            .await
    }

    async fn set_payload(
        &self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<()> {
        self.breaker
            .call(|| self.inner.set_payload(collection, id, patch))
            .await
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize> {
        self.breaker.call(|| self.inner.count(collection, filter)).await
    }

    async fn aggregate_by_field(
        &self,
        collection: &str,
        field: &str,
    ) -> Result<HashMap<String, usize>> {
        self.breaker
            .call(|| self.inner.aggregate_by_field(collection, field))
            .await
    }

    async fn find_clusters(
        &self,
        collection: &str,
        seed_ids: &[String],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<Vec<ScoredPoint>>> {
        self.breaker
            .call(|| self.inner.find_clusters(collection, seed_ids, k, threshold))
            .await
    }

    async fn find_duplicates(
        &self,
        collection: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<Vec<String>>> {
        self.breaker
            .call(|| self.inner.find_duplicates(collection, k, threshold))
            .await
    }

    async fn create_alias(&self, alias: &str, collection: &str) -> Result<()> {
        self.breaker.call(|| self.inner.create_alias(alias, collection)).await
    }

    async fn switch_alias(&self, alias: &str, new_collection: &str) -> Result<()> {
        self.breaker
            .call(|| self.inner.switch_alias(alias, new_collection))
            .await
    }

    async fn list_aliases(&self) -> Result<HashMap<String, String>> {
        self.breaker.call(|| self.inner.list_aliases()).await
    }

    async fn ensure_payload_indexes(&self, collection: &str) -> Result<()> {
        self.breaker
            .call(|| self.inner.ensure_payload_indexes(collection))
            .await
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.breaker.call(|| self.inner.list_collections()).await
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.breaker.call(|| self.inner.delete_collection(name)).await
    }

    async fn clear_collection(&self, name: &str) -> Result<()> {
        self.breaker.call(|| self.inner.clear_collection(name)).await
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        self.breaker.call(|| self.inner.collection_info(name)).await
    }
}
