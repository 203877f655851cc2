use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use ragd_protocol::{ApiError, Result, SparseVector};

use crate::filter::Filter;
use crate::store::{VectorStore, PAYLOAD_INDEX_FIELDS};
use crate::types::{CollectionInfo, Point, PointGroup, ScoredPoint, ScrollResult};

/// Named vector slots used on every collection.
const DENSE_VECTOR: &str = "dense";
const SPARSE_VECTOR: &str = "sparse";

/// Hard cap on how many points a client-side duplicate sweep will pull.
const DUPLICATE_SCAN_CAP: usize = 10_000;

/// REST client for a Qdrant-compatible vector database.
///
/// Everything goes through the JSON API; no generated client, so the backend
/// only needs to be wire-compatible, not version-identical.
pub struct QdrantStore {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value> {
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::external("vector_store", e.to_string()))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if status.as_u16() == 404 {
            let detail = body["status"]["error"]
                .as_str()
                .unwrap_or("resource not found");
            return Err(ApiError::NotFound(detail.to_string()));
        }
        if status.as_u16() == 429 {
            return Err(ApiError::RateLimit {
                service: "vector_store".into(),
                retry_after_secs: None,
            });
        }
        if !status.is_success() {
            let detail = body["status"]["error"].as_str().unwrap_or("request failed");
            return Err(ApiError::external(
                "vector_store",
                format!("{status}: {detail}"),
            ));
        }
        Ok(body)
    }

    fn parse_scored(result: &Value) -> Vec<ScoredPoint> {
        result
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|hit| {
                Some(ScoredPoint {
                    id: point_id_string(&hit["id"])?,
                    score: hit["score"].as_f64().unwrap_or(0.0) as f32,
                    payload: hit["payload"].as_object().cloned().unwrap_or_default(),
                })
            })
            .collect()
    }

    fn parse_points(result: &Value) -> Vec<Point> {
        result
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|raw| {
                let vector = raw["vector"][DENSE_VECTOR]
                    .as_array()
                    .or_else(|| raw["vector"].as_array())
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect()
                    })
                    .unwrap_or_default();
                Some(Point {
                    id: point_id_string(&raw["id"])?,
                    vector,
                    sparse: serde_json::from_value(raw["vector"][SPARSE_VECTOR].clone()).ok(),
                    payload: raw["payload"].as_object().cloned().unwrap_or_default(),
                })
            })
            .collect()
    }
}

fn point_id_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn point_body(point: &Point) -> Value {
    let mut vector = json!({ DENSE_VECTOR: point.vector });
    if let Some(sparse) = &point.sparse {
        vector[SPARSE_VECTOR] = json!({
            "indices": sparse.indices,
            "values": sparse.values,
        });
    }
    json!({
        "id": point.id,
        "vector": vector,
        "payload": point.payload,
    })
}

fn filter_body(filter: Option<&Filter>) -> Option<Value> {
    filter
        .filter(|f| !f.is_empty())
        .and_then(|f| serde_json::to_value(f).ok())
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, name: &str, dimension: usize, sparse: bool) -> Result<()> {
        let exists = self
            .send(self.request(reqwest::Method::GET, &format!("/collections/{name}")))
            .await;
        if exists.is_ok() {
            return Ok(());
        }

        let mut body = json!({
            "vectors": {
                DENSE_VECTOR: { "size": dimension, "distance": "Cosine" },
            },
        });
        if sparse {
            body["sparse_vectors"] = json!({ SPARSE_VECTOR: {} });
        }
        self.send(
            self.request(reqwest::Method::PUT, &format!("/collections/{name}"))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = json!({
            "points": points.iter().map(point_body).collect::<Vec<_>>(),
        });
        self.send(
            self.request(
                reqwest::Method::PUT,
                &format!("/collections/{collection}/points?wait=true"),
            )
            .json(&body),
        )
        .await?;
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
        let mut body = json!({
            "vector": { "name": DENSE_VECTOR, "vector": vector },
            "limit": k,
            "with_payload": true,
        });
        if let Some(filter) = filter_body(filter) {
            body["filter"] = filter;
        }
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = json!(threshold);
        }
        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{collection}/points/search"),
                )
                .json(&body),
            )
            .await?;
        Ok(Self::parse_scored(&response["result"]))
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
        let mut body = json!({
            "vector": { "name": DENSE_VECTOR, "vector": vector },
            "group_by": group_by,
            "limit": k,
            "group_size": group_size,
            "with_payload": true,
        });
        if let Some(filter) = filter_body(filter) {
            body["filter"] = filter;
        }
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = json!(threshold);
        }
        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{collection}/points/search/groups"),
                )
                .json(&body),
            )
            .await?;

        let groups = response["result"]["groups"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        Ok(groups
            .iter()
            .filter_map(|group| {
                Some(PointGroup {
                    key: point_id_string(&group["id"])?,
                    hits: Self::parse_scored(&group["hits"]),
                })
            })
            .collect())
    }

    async fn search_hybrid(
        &self,
        collection: &str,
        dense: &[f32],
        sparse: &SparseVector,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({
            "prefetch": [
                { "query": dense, "using": DENSE_VECTOR, "limit": k * 2 },
                {
                    "query": { "indices": sparse.indices, "values": sparse.values },
                    "using": SPARSE_VECTOR,
                    "limit": k * 2,
                },
            ],
            "query": { "fusion": "rrf" },
            "limit": k,
            "with_payload": true,
        });
        if let Some(filter) = filter_body(filter) {
            body["filter"] = filter;
        }
        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{collection}/points/query"),
                )
                .json(&body),
            )
            .await?;
        Ok(Self::parse_scored(&response["result"]["points"]))
    }

    async fn recommend(
        &self,
        collection: &str,
        positive: &[String],
        negative: &[String],
        k: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let body = json!({
            "positive": positive,
            "negative": negative,
            "limit": k,
            "using": DENSE_VECTOR,
            "with_payload": true,
        });
        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{collection}/points/recommend"),
                )
                .json(&body),
            )
            .await?;
        Ok(Self::parse_scored(&response["result"]))
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
        offset: Option<String>,
    ) -> Result<ScrollResult> {
        let mut body = json!({
            "limit": limit,
            "with_payload": true,
            "with_vector": true,
        });
        if let Some(filter) = filter_body(filter) {
            body["filter"] = filter;
        }
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{collection}/points/scroll"),
                )
                .json(&body),
            )
            .await?;
        Ok(ScrollResult {
            points: Self::parse_points(&response["result"]["points"]),
            next_offset: response["result"]["next_page_offset"]
                .as_str()
                .map(str::to_string),
        })
    }

    async fn retrieve(&self, collection: &str, ids: &[String]) -> Result<Vec<Point>> {
        let body = json!({
            "ids": ids,
            "with_payload": true,
            "with_vector": true,
        });
        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{collection}/points"),
                )
                .json(&body),
            )
            .await?;
        Ok(Self::parse_points(&response["result"]))
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<()> {
        self.send(
            self.request(
                reqwest::Method::POST,
                &format!("/collections/{collection}/points/delete?wait=true"),
            )
            .json(&json!({ "points": ids })),
        )
        .await?;
        Ok(())
    }

    async fn delete_by_filter(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let affected = self.count(collection, Some(filter)).await?;
        self.send(
            self.request(
                reqwest::Method::POST,
                &format!("/collections/{collection}/points/delete?wait=true"),
            )
            .json(&json!({ "filter": filter })),
        )
        .await?;
        Ok(affected)
    }

    async fn set_payload(
        &self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<()> {
        let (removals, updates): (Vec<_>, Vec<_>) =
            patch.into_iter().partition(|(_, value)| value.is_null());

        if !updates.is_empty() {
            let payload: Map<String, Value> = updates.into_iter().collect();
            self.send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{collection}/points/payload?wait=true"),
                )
                .json(&json!({ "payload": payload, "points": [id] })),
            )
            .await?;
        }
        if !removals.is_empty() {
            let keys: Vec<String> = removals.into_iter().map(|(key, _)| key).collect();
            self.send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{collection}/points/payload/delete?wait=true"),
                )
                .json(&json!({ "keys": keys, "points": [id] })),
            )
            .await?;
        }
        Ok(())
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<usize> {
        let mut body = json!({ "exact": true });
        if let Some(filter) = filter_body(filter) {
            body["filter"] = filter;
        }
        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{collection}/points/count"),
                )
                .json(&body),
            )
            .await?;
        Ok(response["result"]["count"].as_u64().unwrap_or(0) as usize)
    }

    async fn aggregate_by_field(
        &self,
        collection: &str,
        field: &str,
    ) -> Result<HashMap<String, usize>> {
        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{collection}/facet"),
                )
                .json(&json!({ "key": field, "limit": 1000, "exact": true })),
            )
            .await?;
        let mut counts = HashMap::new();
        for hit in response["result"]["hits"].as_array().into_iter().flatten() {
            if let (Some(value), Some(count)) = (hit["value"].as_str(), hit["count"].as_u64()) {
                counts.insert(value.to_string(), count as usize);
            }
        }
        Ok(counts)
    }

    async fn find_clusters(
        &self,
        collection: &str,
        seed_ids: &[String],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<Vec<ScoredPoint>>> {
        let seeds = self.retrieve(collection, seed_ids).await?;
        let mut clusters = Vec::new();
        for seed in seeds {
            let hits = self
                .search(collection, &seed.vector, k, None, Some(threshold))
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
        // Pull the collection (capped) and group client-side; one pass of
        // nearest-neighbour calls per ungrouped point.
        let mut points = Vec::new();
        let mut offset = None;
        loop {
            let page = self.scroll(collection, None, 256, offset).await?;
            points.extend(page.points);
            offset = page.next_offset;
            if offset.is_none() || points.len() >= DUPLICATE_SCAN_CAP {
                break;
            }
        }

        let mut assigned: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Vec<String>> = Vec::new();
        for point in &points {
            if assigned.contains_key(&point.id) {
                continue;
            }
            let hits = self
                .search(collection, &point.vector, k, None, Some(threshold))
                .await?;
            let members: Vec<String> = hits
                .into_iter()
                .map(|h| h.id)
                .filter(|id| !assigned.contains_key(id))
                .collect();
            if members.len() > 1 {
                let idx = groups.len();
                for member in &members {
                    assigned.insert(member.clone(), idx);
                }
                groups.push(members);
            }
        }
        Ok(groups)
    }

    async fn create_alias(&self, alias: &str, collection: &str) -> Result<()> {
        self.send(
            self.request(reqwest::Method::POST, "/collections/aliases").json(&json!({
                "actions": [
                    { "create_alias": { "collection_name": collection, "alias_name": alias } },
                ],
            })),
        )
        .await?;
        Ok(())
    }

    async fn switch_alias(&self, alias: &str, new_collection: &str) -> Result<()> {
        // Delete + create in one actions batch: the backend applies them
        // atomically, which is what makes zero-downtime reindex safe.
        self.send(
            self.request(reqwest::Method::POST, "/collections/aliases").json(&json!({
                "actions": [
                    { "delete_alias": { "alias_name": alias } },
                    { "create_alias": { "collection_name": new_collection, "alias_name": alias } },
                ],
            })),
        )
        .await?;
        Ok(())
    }

    async fn list_aliases(&self) -> Result<HashMap<String, String>> {
        let response = self
            .send(self.request(reqwest::Method::GET, "/aliases"))
            .await?;
        let mut aliases = HashMap::new();
        for entry in response["result"]["aliases"].as_array().into_iter().flatten() {
            if let (Some(alias), Some(collection)) = (
                entry["alias_name"].as_str(),
                entry["collection_name"].as_str(),
            ) {
                aliases.insert(alias.to_string(), collection.to_string());
            }
        }
        Ok(aliases)
    }

    async fn ensure_payload_indexes(&self, collection: &str) -> Result<()> {
        for field in PAYLOAD_INDEX_FIELDS {
            let result = self
                .send(
                    self.request(
                        reqwest::Method::PUT,
                        &format!("/collections/{collection}/index?wait=true"),
                    )
                    .json(&json!({ "field_name": field, "field_schema": "keyword" })),
                )
                .await;
            // An index that already exists is fine.
            if let Err(err) = result {
                if !err.to_string().contains("already exists") {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let response = self
            .send(self.request(reqwest::Method::GET, "/collections"))
            .await?;
        Ok(response["result"]["collections"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|c| c["name"].as_str().map(str::to_string))
            .collect())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.send(self.request(reqwest::Method::DELETE, &format!("/collections/{name}")))
            .await?;
        Ok(())
    }

    async fn clear_collection(&self, name: &str) -> Result<()> {
        self.send(
            self.request(
                reqwest::Method::POST,
                &format!("/collections/{name}/points/delete?wait=true"),
            )
            .json(&json!({ "filter": { "must": [] } })),
        )
        .await?;
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let response = self
            .send(self.request(reqwest::Method::GET, &format!("/collections/{name}")))
            .await?;
        let result = &response["result"];
        Ok(CollectionInfo {
            name: name.to_string(),
            vector_count: result["points_count"].as_u64().unwrap_or(0) as usize,
            dimension: result["config"]["params"]["vectors"][DENSE_VECTOR]["size"]
                .as_u64()
                .unwrap_or(0) as usize,
            sparse_enabled: result["config"]["params"]["sparse_vectors"].is_object(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_body_includes_named_vectors() {
        let point = Point::new("p-1", vec![0.1, 0.2], Map::new()).with_sparse(Some(SparseVector {
            indices: vec![3],
            values: vec![1.5],
        }));
        let body = point_body(&point);
        assert_eq!(body["vector"][DENSE_VECTOR][1], 0.2);
        assert_eq!(body["vector"][SPARSE_VECTOR]["indices"][0], 3);
    }

    #[test]
    fn test_empty_filter_is_omitted() {
        assert!(filter_body(Some(&Filter::new())).is_none());
        assert!(filter_body(None).is_none());
    }

    #[test]
    fn test_point_id_string_accepts_numbers() {
        assert_eq!(point_id_string(&json!(7)).as_deref(), Some("7"));
        assert_eq!(point_id_string(&json!("abc")).as_deref(), Some("abc"));
        assert!(point_id_string(&json!(null)).is_none());
    }
}
