use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};

use ragd_protocol::{ApiError, Result, SparseVector};

use crate::filter::Filter;
use crate::store::VectorStore;
use crate::types::{CollectionInfo, Point, PointGroup, ScoredPoint, ScrollResult};

/// RRF constant used when fusing dense and sparse rankings in hybrid search.
const HYBRID_RRF_K: f32 = 60.0;

struct Collection {
    dimension: usize,
    sparse_enabled: bool,
    /// BTreeMap keeps scroll order stable across calls.
    points: BTreeMap<String, Point>,
}

/// In-process vector backend.
///
/// Backs the test suites and small single-node deployments. Vectors are
/// normalised on insert so search is a dot product. Alias resolution and the
/// filter language behave exactly like the REST backend, which is what makes
/// the engine tests meaningful.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    aliases: RwLock<HashMap<String, String>>,
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn sparse_dot(a: &SparseVector, b: &SparseVector) -> f32 {
    let mut score = 0.0;
    let mut j = 0;
    for (i, &index) in a.indices.iter().enumerate() {
        while j < b.indices.len() && b.indices[j] < index {
            j += 1;
        }
        if j < b.indices.len() && b.indices[j] == index {
            score += a.values[i] * b.values[j];
        }
    }
    score
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
        }
    }

    fn resolve(&self, name: &str) -> String {
        let aliases = self.aliases.read().expect("alias lock");
        aliases.get(name).cloned().unwrap_or_else(|| name.to_string())
    }

    fn with_collection<T>(
        &self,
        name: &str,
        f: impl FnOnce(&Collection) -> T,
    ) -> Result<T> {
        let resolved = self.resolve(name);
        let collections = self.collections.read().expect("collection lock");
        let collection = collections
            .get(&resolved)
            .ok_or_else(|| ApiError::NotFound(format!("collection {resolved}")))?;
        Ok(f(collection))
    }

    fn ranked(
        &self,
        collection: &str,
        score_fn: impl Fn(&Point) -> f32,
        k: usize,
        filter: Option<&Filter>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>> {
        self.with_collection(collection, |col| {
            let mut hits: Vec<ScoredPoint> = col
                .points
                .values()
                .filter(|p| filter.map(|f| f.matches(&p.payload)).unwrap_or(true))
                .map(|p| ScoredPoint {
                    id: p.id.clone(),
                    score: score_fn(p),
                    payload: p.payload.clone(),
                })
                .filter(|hit| score_threshold.map(|t| hit.score >= t).unwrap_or(true))
                .collect();
            hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            hits.truncate(k);
            hits
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, name: &str, dimension: usize, sparse: bool) -> Result<()> {
        let mut collections = self.collections.write().expect("collection lock");
        collections.entry(name.to_string()).or_insert(Collection {
            dimension,
            sparse_enabled: sparse,
            points: BTreeMap::new(),
        });
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        let resolved = self.resolve(collection);
        let mut collections = self.collections.write().expect("collection lock");
        let col = collections
            .get_mut(&resolved)
            .ok_or_else(|| ApiError::NotFound(format!("collection {resolved}")))?;
        for mut point in points {
            if point.vector.len() != col.dimension {
                return Err(ApiError::validation(format!(
                    "vector dimension {} does not match collection dimension {}",
                    point.vector.len(),
                    col.dimension
                )));
            }
            point.vector = normalize(point.vector);
            col.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>> {
        let query = normalize(vector.to_vec());
        self.ranked(collection, |p| dot(&p.vector, &query), k, filter, score_threshold)
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
        // Over-fetch, then fold hits into per-key buckets.
        let hits = self
            .search(collection, vector, k * group_size * 4, filter, score_threshold)
            .await?;
        let mut groups: Vec<PointGroup> = Vec::new();
        for hit in hits {
            let Some(key) = hit.payload_str(group_by).map(str::to_string) else {
                continue;
            };
            if let Some(pos) = groups.iter().position(|g| g.key == key) {
                if groups[pos].hits.len() < group_size {
                    groups[pos].hits.push(hit);
                }
            } else if groups.len() < k {
                groups.push(PointGroup {
                    key,
                    hits: vec![hit],
                });
            }
        }
        Ok(groups)
    }

    async fn search_hybrid(
        &self,
        collection: &str,
        dense: &[f32],
        sparse: &SparseVector,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredPoint>> {
        let dense_hits = self.search(collection, dense, k * 2, filter, None).await?;
        let sparse_hits = self.ranked(
            collection,
            |p| p.sparse.as_ref().map(|s| sparse_dot(s, sparse)).unwrap_or(0.0),
            k * 2,
            filter,
            Some(f32::EPSILON),
        )?;

        // Reciprocal rank fusion across the two rankings.
        let mut fused: HashMap<String, (f32, Map<String, Value>)> = HashMap::new();
        for (rank, hit) in dense_hits.into_iter().enumerate() {
            let entry = fused.entry(hit.id).or_insert((0.0, hit.payload));
            entry.0 += 1.0 / (HYBRID_RRF_K + rank as f32 + 1.0);
        }
        for (rank, hit) in sparse_hits.into_iter().enumerate() {
            let entry = fused.entry(hit.id).or_insert((0.0, hit.payload));
            entry.0 += 1.0 / (HYBRID_RRF_K + rank as f32 + 1.0);
        }

        let mut hits: Vec<ScoredPoint> = fused
            .into_iter()
            .map(|(id, (score, payload))| ScoredPoint { id, score, payload })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn recommend(
        &self,
        collection: &str,
        positive: &[String],
        negative: &[String],
        k: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let target = self.with_collection(collection, |col| {
            let mut target = vec![0.0f32; col.dimension];
            let mut found = 0usize;
            for id in positive {
                if let Some(point) = col.points.get(id) {
                    for (t, v) in target.iter_mut().zip(&point.vector) {
                        *t += v;
                    }
                    found += 1;
                }
            }
            for id in negative {
                if let Some(point) = col.points.get(id) {
                    for (t, v) in target.iter_mut().zip(&point.vector) {
                        *t -= v;
                    }
                }
            }
            (found > 0).then_some(target)
        })?;

        let Some(target) = target else {
            return Err(ApiError::NotFound("no positive example points".into()));
        };

        let exclude: Vec<&String> = positive.iter().chain(negative).collect();
        let mut hits = self.search(collection, &target, k + exclude.len(), None, None).await?;
        hits.retain(|hit| !exclude.iter().any(|id| **id == hit.id));
        hits.truncate(k);
        Ok(hits)
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
        offset: Option<String>,
    ) -> Result<ScrollResult> {
        self.with_collection(collection, |col| {
            let mut points: Vec<Point> = col
                .points
                .range(offset.clone().unwrap_or_default()..)
                .filter(|(id, _)| offset.as_deref() != Some(id.as_str()))
                .filter(|(_, p)| filter.map(|f| f.matches(&p.payload)).unwrap_or(true))
                .map(|(_, p)| p.clone())
                .collect();
            let next_offset = if points.len() > limit {
                points.truncate(limit);
                points.last().map(|p| p.id.clone())
            } else {
                None
            };
            ScrollResult { points, next_offset }
        })
    }

    async fn retrieve(&self, collection: &str, ids: &[String]) -> Result<Vec<Point>> {
        self.with_collection(collection, |col| {
            ids.iter()
                .filter_map(|id| col.points.get(id).cloned())
                .collect()
        })
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<()> {
        let resolved = self.resolve(collection);
        let mut collections = self.collections.write().expect("collection lock");
        let col = collections
            .get_mut(&resolved)
            .ok_or_else(|| ApiError::NotFound(format!("collection {resolved}")))?;
        for id in ids {
            col.points.remove(id);
        }
        Ok(())
    }

    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let resolved = self.resolve(collection);
        let mut collections = self.collections.write().expect("collection lock");
        let col = collections
            .get_mut(&resolved)
            .ok_or_else(|| ApiError::NotFound(format!("collection {resolved}")))?;
        let before = col.points.len();
        col.points.retain(|_, p| !filter.matches(&p.payload));
        Ok(before - col.points.len())
    }

    async fn set_payload(
        &self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<()> {
        let resolved = self.resolve(collection);
        let mut collections = self.collections.write().expect("collection lock");
        let col = collections
            .get_mut(&resolved)
            .ok_or_else(|| ApiError::NotFound(format!("collection {resolved}")))?;
        let point = col
            .points
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("point {id}")))?;
        for (key, value) in patch {
            if value.is_null() {
                point.payload.remove(&key);
            } else {
                point.payload.insert(key, value);
            }
        }
        Ok(())
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize> {
        self.with_collection(collection, |col| {
            col.points
                .values()
                .filter(|p| filter.map(|f| f.matches(&p.payload)).unwrap_or(true))
                .count()
        })
    }

    async fn aggregate_by_field(
        &self,
        collection: &str,
        field: &str,
    ) -> Result<HashMap<String, usize>> {
        self.with_collection(collection, |col| {
            let mut counts = HashMap::new();
            for point in col.points.values() {
                if let Some(value) = point.payload_str(field) {
                    *counts.entry(value.to_string()).or_insert(0) += 1;
                }
            }
            counts
        })
    }

    async fn find_clusters(
        &self,
        collection: &str,
        seed_ids: &[String],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<Vec<ScoredPoint>>> {
        let mut clusters = Vec::new();
        for seed in seed_ids {
            let seed_vector = self.with_collection(collection, |col| {
                col.points.get(seed).map(|p| p.vector.clone())
            })?;
            let Some(vector) = seed_vector else {
                continue;
            };
            let hits = self
                .search(collection, &vector, k, None, Some(threshold))
                .await?;
            if !hits.is_empty() {
                clusters.push(hits);
            }
        }
        Ok(clusters)
    }

    async fn find_duplicates(
        &self,
        collection: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<Vec<String>>> {
        let ids: Vec<String> =
            self.with_collection(collection, |col| col.points.keys().cloned().collect())?;

        let mut assigned: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Vec<String>> = Vec::new();

        for id in &ids {
            if assigned.contains_key(id) {
                continue;
            }
            let vector = self
                .with_collection(collection, |col| col.points.get(id).map(|p| p.vector.clone()))?;
            let Some(vector) = vector else { continue };
            let hits = self
                .search(collection, &vector, k, None, Some(threshold))
                .await?;
            let members: Vec<String> = hits
                .into_iter()
                .map(|h| h.id)
                .filter(|m| !assigned.contains_key(m))
                .collect();
            if members.len() > 1 {
                let group_idx = groups.len();
                for member in &members {
                    assigned.insert(member.clone(), group_idx);
                }
                groups.push(members);
            }
        }
        Ok(groups)
    }

    async fn create_alias(&self, alias: &str, collection: &str) -> Result<()> {
        let mut aliases = self.aliases.write().expect("alias lock");
        aliases.insert(alias.to_string(), collection.to_string());
        Ok(())
    }

    async fn switch_alias(&self, alias: &str, new_collection: &str) -> Result<()> {
        let mut aliases = self.aliases.write().expect("alias lock");
        aliases.insert(alias.to_string(), new_collection.to_string());
        Ok(())
    }

    async fn list_aliases(&self) -> Result<HashMap<String, String>> {
        Ok(self.aliases.read().expect("alias lock").clone())
    }

    async fn ensure_payload_indexes(&self, _collection: &str) -> Result<()> {
        // Payload filtering here is a full scan; nothing to build.
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let collections = self.collections.read().expect("collection lock");
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let resolved = self.resolve(name);
        let mut collections = self.collections.write().expect("collection lock");
        collections
            .remove(&resolved)
            .ok_or_else(|| ApiError::NotFound(format!("collection {resolved}")))?;
        drop(collections);
        let mut aliases = self.aliases.write().expect("alias lock");
        aliases.retain(|_, target| *target != resolved);
        Ok(())
    }

    async fn clear_collection(&self, name: &str) -> Result<()> {
        let resolved = self.resolve(name);
        let mut collections = self.collections.write().expect("collection lock");
        let col = collections
            .get_mut(&resolved)
            .ok_or_else(|| ApiError::NotFound(format!("collection {resolved}")))?;
        col.points.clear();
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let resolved = self.resolve(name);
        self.with_collection(&resolved, |col| CollectionInfo {
            name: resolved.clone(),
            vector_count: col.points.len(),
            dimension: col.dimension,
            sparse_enabled: col.sparse_enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Condition;
    use serde_json::json;

    fn payload(file: &str, chunk_type: &str) -> Map<String, Value> {
        json!({ "file": file, "chunkType": chunk_type })
            .as_object()
            .unwrap()
            .clone()
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.ensure_collection("demo_codebase", 3, false).await.unwrap();
        store
            .upsert(
                "demo_codebase",
                vec![
                    Point::new("a", vec![1.0, 0.0, 0.0], payload("src/a.ts", "code")),
                    Point::new("b", vec![0.9, 0.1, 0.0], payload("src/b.ts", "code")),
                    Point::new("c", vec![0.0, 1.0, 0.0], payload("docs/c.md", "docs")),
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_search_ranks_by_cosine() {
        let store = seeded().await;
        let hits = store
            .search("demo_codebase", &[1.0, 0.0, 0.0], 3, None, None)
            .await
            .unwrap();
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "b");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_search_with_filter_and_threshold() {
        let store = seeded().await;
        let filter = Filter::new().must(Condition::value("chunkType", "docs"));
        let hits = store
            .search("demo_codebase", &[0.0, 1.0, 0.0], 5, Some(&filter), Some(0.5))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "c");
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_by_id() {
        let store = seeded().await;
        store
            .upsert(
                "demo_codebase",
                vec![Point::new("a", vec![1.0, 0.0, 0.0], payload("src/a.ts", "code"))],
            )
            .await
            .unwrap();
        assert_eq!(store.count("demo_codebase", None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_alias_resolution_and_switch() {
        let store = seeded().await;
        store.ensure_collection("demo_codebase_v2", 3, false).await.unwrap();
        store
            .upsert(
                "demo_codebase_v2",
                vec![Point::new("z", vec![0.0, 0.0, 1.0], payload("src/z.ts", "code"))],
            )
            .await
            .unwrap();

        store.create_alias("demo_live", "demo_codebase").await.unwrap();
        assert_eq!(store.count("demo_live", None).await.unwrap(), 3);

        store.switch_alias("demo_live", "demo_codebase_v2").await.unwrap();
        assert_eq!(store.count("demo_live", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_grouped_search_bounds_groups() {
        let store = seeded().await;
        store
            .upsert(
                "demo_codebase",
                vec![Point::new("a2", vec![0.95, 0.05, 0.0], payload("src/a.ts", "code"))],
            )
            .await
            .unwrap();
        let groups = store
            .search_groups("demo_codebase", &[1.0, 0.0, 0.0], "file", 2, 1, None, None)
            .await
            .unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, "src/a.ts");
        assert_eq!(groups[0].hits.len(), 1);
    }

    #[tokio::test]
    async fn test_recommend_excludes_examples() {
        let store = seeded().await;
        let hits = store
            .recommend("demo_codebase", &["a".to_string()], &[], 2)
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.id != "a"));
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn test_scroll_pages_through_everything() {
        let store = seeded().await;
        let page1 = store.scroll("demo_codebase", None, 2, None).await.unwrap();
        assert_eq!(page1.points.len(), 2);
        let offset = page1.next_offset.clone().unwrap();
        let page2 = store
            .scroll("demo_codebase", None, 2, Some(offset))
            .await
            .unwrap();
        assert_eq!(page2.points.len(), 1);
        assert!(page2.next_offset.is_none());
    }

    #[tokio::test]
    async fn test_aggregate_by_field() {
        let store = seeded().await;
        let counts = store
            .aggregate_by_field("demo_codebase", "chunkType")
            .await
            .unwrap();
        assert_eq!(counts["code"], 2);
        assert_eq!(counts["docs"], 1);
    }

    #[tokio::test]
    async fn test_find_duplicates_groups_near_identical() {
        let store = MemoryStore::new();
        store.ensure_collection("dups", 2, false).await.unwrap();
        store
            .upsert(
                "dups",
                vec![
                    Point::new("m1", vec![1.0, 0.0], payload("m1", "memory")),
                    Point::new("m2", vec![0.999, 0.001], payload("m2", "memory")),
                    Point::new("m3", vec![0.0, 1.0], payload("m3", "memory")),
                ],
            )
            .await
            .unwrap();
        let groups = store.find_duplicates("dups", 10, 0.95).await.unwrap();
        assert_eq!(groups.len(), 1);
        let mut members = groups[0].clone();
        members.sort();
        assert_eq!(members, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_set_payload_merges_and_removes() {
        let store = seeded().await;
        let mut patch = Map::new();
        patch.insert("supersededBy".into(), json!("b"));
        store.set_payload("demo_codebase", "a", patch).await.unwrap();
        let points = store.retrieve("demo_codebase", &["a".to_string()]).await.unwrap();
        assert_eq!(points[0].payload_str("supersededBy"), Some("b"));

        let mut patch = Map::new();
        patch.insert("supersededBy".into(), Value::Null);
        store.set_payload("demo_codebase", "a", patch).await.unwrap();
        let points = store.retrieve("demo_codebase", &["a".to_string()]).await.unwrap();
        assert!(points[0].payload.get("supersededBy").is_none());
    }

    #[tokio::test]
    async fn test_hybrid_prefers_points_in_both_rankings() {
        let store = MemoryStore::new();
        store.ensure_collection("hybrid", 2, true).await.unwrap();
        let sparse = |indices: Vec<u32>, values: Vec<f32>| SparseVector { indices, values };
        store
            .upsert(
                "hybrid",
                vec![
                    Point::new("both", vec![0.9, 0.1], payload("both.ts", "code"))
                        .with_sparse(Some(sparse(vec![1, 5], vec![1.0, 1.0]))),
                    Point::new("dense-only", vec![1.0, 0.0], payload("dense.ts", "code")),
                    Point::new("sparse-only", vec![0.0, 1.0], payload("sparse.ts", "code"))
                        .with_sparse(Some(sparse(vec![1], vec![2.0]))),
                ],
            )
            .await
            .unwrap();
        let hits = store
            .search_hybrid(
                "hybrid",
                &[1.0, 0.0],
                &sparse(vec![1], vec![1.0]),
                3,
                None,
            )
            .await
            .unwrap();
        assert_eq!(hits[0].id, "both");
    }
}
