//! Typed, tagged, aging-aware memory store over the vector backend.
//!
//! Memories live in `{project}_agent_memory`, embedded as `"{type}: {content}"`.
//! Retiring a memory never deletes it: supersession points forward to the
//! replacement and recall filters retired entries out.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use ragd_protocol::api::{
    BatchRememberResponse, MemoryListRequest, MemoryStats, MergeCluster, MergeRequest,
    MergeResponse, RecallHit, RecallRequest, RememberRequest,
};
use ragd_protocol::{aging_decay, ApiError, Memory, MemoryType, Result, StatusChange, TodoStatus};
use ragd_providers::EmbeddingProvider;
use ragd_vector_store::{Condition, Filter, Point, VectorStore};

/// Similarity floor for best-effort relationship detection on store.
const RELATED_THRESHOLD: f32 = 0.85;
/// Recall over-fetches by this factor before supersession filtering.
const RECALL_FETCH_MULTIPLIER: usize = 2;

pub struct MemoryService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    /// Advisory per-project merge locks; a second concurrent merge gets
    /// `CONFLICT` instead of interleaving cluster updates.
    merge_locks: Mutex<HashSet<String>>,
}

impl MemoryService {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            merge_locks: Mutex::new(HashSet::new()),
        }
    }

    fn collection(project: &str) -> String {
        ragd_protocol::collections::agent_memory(project)
    }

    async fn ensure_collection(&self, project: &str) -> Result<()> {
        self.store
            .ensure_collection(
                &Self::collection(project),
                self.embedder.dimension(),
                self.embedder.supports_sparse(),
            )
            .await
    }

    fn to_payload(memory: &Memory) -> Result<Map<String, Value>> {
        match serde_json::to_value(memory)? {
            Value::Object(map) => Ok(map),
            _ => Err(ApiError::Unknown("memory did not serialize to an object".into())),
        }
    }

    fn from_payload(payload: &Map<String, Value>) -> Option<Memory> {
        serde_json::from_value(Value::Object(payload.clone())).ok()
    }

    fn build_memory(project: &str, request: RememberRequest) -> Memory {
        let now = Utc::now();
        let is_todo = request.memory_type == MemoryType::Todo;
        Memory {
            id: Uuid::new_v4().to_string(),
            project: project.to_string(),
            memory_type: request.memory_type,
            content: request.content,
            tags: request.tags,
            related_to: request.related_to,
            created_at: now,
            updated_at: now,
            validated: request.validated,
            superseded_by: None,
            source: request.source,
            confidence: request.confidence,
            metadata: request.metadata,
            status: is_todo.then_some(TodoStatus::Pending),
            status_history: if is_todo {
                vec![StatusChange {
                    status: TodoStatus::Pending,
                    note: None,
                    at: now,
                }]
            } else {
                Vec::new()
            },
        }
    }

    /// Store one memory. Relationship detection is best-effort: a failed
    /// neighbour search never fails the write.
    pub async fn remember(&self, project: &str, request: RememberRequest) -> Result<Memory> {
        self.ensure_collection(project).await?;
        let mut memory = Self::build_memory(project, request);
        let vector = self.embedder.embed(&memory.embedding_text()).await?;

        if memory.related_to.is_none() {
            match self
                .store
                .search(&Self::collection(project), &vector, 1, None, Some(RELATED_THRESHOLD))
                .await
            {
                Ok(hits) => memory.related_to = hits.first().map(|hit| hit.id.clone()),
                Err(err) => log::debug!("relationship detection skipped: {err}"),
            }
        }

        let point = Point::new(memory.id.clone(), vector, Self::to_payload(&memory)?);
        self.store.upsert(&Self::collection(project), vec![point]).await?;
        Ok(memory)
    }

    /// Semantic recall with supersession filtering and aging decay.
    pub async fn recall(&self, project: &str, request: RecallRequest) -> Result<Vec<RecallHit>> {
        self.ensure_collection(project).await?;
        let vector = self.embedder.embed(&request.query).await?;

        let mut filter = Filter::new();
        if let Some(memory_type) = request.memory_type {
            filter = filter.must(Condition::value("type", memory_type.as_str()));
        }
        if let Some(tag) = &request.tag {
            filter = filter.must(Condition::value("tags", tag.as_str()));
        }
        let filter = (!filter.is_empty()).then_some(filter);

        let hits = self
            .store
            .search(
                &Self::collection(project),
                &vector,
                request.limit * RECALL_FETCH_MULTIPLIER,
                filter.as_ref(),
                None,
            )
            .await?;

        let now = Utc::now();
        let mut scored: Vec<RecallHit> = hits
            .iter()
            .filter_map(|hit| {
                let memory = Self::from_payload(&hit.payload)?;
                if !memory.is_active() {
                    return None;
                }
                let age_days = (now - memory.created_at).num_days();
                let score = hit.score * aging_decay(age_days, memory.is_validated());
                Some(RecallHit { memory, score })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(request.limit);
        Ok(scored)
    }

    /// Active memories, unranked.
    pub async fn list(&self, project: &str, request: MemoryListRequest) -> Result<Vec<Memory>> {
        self.ensure_collection(project).await?;
        let mut filter = Filter::new();
        if let Some(memory_type) = request.memory_type {
            filter = filter.must(Condition::value("type", memory_type.as_str()));
        }
        if let Some(tag) = &request.tag {
            filter = filter.must(Condition::value("tags", tag.as_str()));
        }
        let filter = (!filter.is_empty()).then_some(filter);

        let mut memories = Vec::new();
        let mut offset = None;
        loop {
            let page = self
                .store
                .scroll(&Self::collection(project), filter.as_ref(), 128, offset)
                .await?;
            for point in &page.points {
                if let Some(memory) = Self::from_payload(&point.payload) {
                    if memory.is_active() {
                        memories.push(memory);
                    }
                }
            }
            offset = page.next_offset;
            if offset.is_none() || memories.len() >= request.limit {
                break;
            }
        }
        memories.truncate(request.limit);
        Ok(memories)
    }

    pub async fn get(&self, project: &str, id: &str) -> Result<Memory> {
        let points = self
            .store
            .retrieve(&Self::collection(project), &[id.to_string()])
            .await?;
        points
            .first()
            .and_then(|p| Self::from_payload(&p.payload))
            .ok_or_else(|| ApiError::NotFound(format!("memory {id}")))
    }

    /// Hard delete. Backend errors are swallowed into `false`.
    pub async fn forget(&self, project: &str, id: &str) -> bool {
        let collection = Self::collection(project);
        let existed = match self.store.retrieve(&collection, &[id.to_string()]).await {
            Ok(points) => !points.is_empty(),
            Err(err) => {
                log::warn!("forget({id}): lookup failed: {err}");
                return false;
            }
        };
        if !existed {
            return false;
        }
        match self.store.delete_points(&collection, &[id.to_string()]).await {
            Ok(()) => true,
            Err(err) => {
                log::warn!("forget({id}): delete failed: {err}");
                false
            }
        }
    }

    pub async fn forget_by_type(&self, project: &str, memory_type: MemoryType) -> Result<usize> {
        let filter = Filter::new().must(Condition::value("type", memory_type.as_str()));
        self.store
            .delete_by_filter(&Self::collection(project), &filter)
            .await
    }

    /// Drive the todo state machine; illegal transitions are validation
    /// errors, re-applying the current status is a no-op update.
    pub async fn update_todo_status(
        &self,
        project: &str,
        id: &str,
        status: TodoStatus,
        note: Option<String>,
    ) -> Result<Memory> {
        let mut memory = self.get(project, id).await?;
        memory.transition_todo(status, note, Utc::now())?;

        let mut patch = Map::new();
        patch.insert("status".into(), json!(memory.status));
        patch.insert("statusHistory".into(), serde_json::to_value(&memory.status_history)?);
        patch.insert("updatedAt".into(), json!(memory.updated_at));
        self.store
            .set_payload(&Self::collection(project), id, patch)
            .await?;
        Ok(memory)
    }

    /// Cluster near-duplicates and retire all but one per cluster.
    ///
    /// Holds the project's advisory merge lock; a concurrent merge returns
    /// `CONFLICT`. Superseded memories are never hard-deleted here.
    pub async fn merge_memories(&self, project: &str, request: MergeRequest) -> Result<MergeResponse> {
        {
            let mut locks = self.merge_locks.lock().expect("merge lock");
            if !locks.insert(project.to_string()) {
                return Err(ApiError::Conflict(format!(
                    "a merge is already running for project {project}"
                )));
            }
        }
        let result = self.merge_inner(project, request).await;
        self.merge_locks
            .lock()
            .expect("merge lock")
            .remove(project);
        result
    }

    async fn merge_inner(&self, project: &str, request: MergeRequest) -> Result<MergeResponse> {
        self.ensure_collection(project).await?;
        let collection = Self::collection(project);

        let filter = request
            .memory_type
            .map(|t| Filter::new().must(Condition::value("type", t.as_str())));

        // Candidate pool: active memories, capped by the request limit.
        let mut candidates: Vec<Memory> = Vec::new();
        let mut offset = None;
        loop {
            let page = self
                .store
                .scroll(&collection, filter.as_ref(), 128, offset)
                .await?;
            candidates.extend(
                page.points
                    .iter()
                    .filter_map(|p| Self::from_payload(&p.payload))
                    .filter(Memory::is_active),
            );
            offset = page.next_offset;
            if offset.is_none() || candidates.len() >= request.limit {
                break;
            }
        }
        candidates.truncate(request.limit);

        let mut clustered: HashSet<String> = HashSet::new();
        let mut clusters: Vec<Vec<Memory>> = Vec::new();

        for candidate in &candidates {
            if clustered.contains(&candidate.id) {
                continue;
            }
            let neighbours = self
                .store
                .recommend(&collection, &[candidate.id.clone()], &[], 10)
                .await?;
            let mut cluster = vec![candidate.clone()];
            for neighbour in neighbours {
                if neighbour.score < request.threshold || clustered.contains(&neighbour.id) {
                    continue;
                }
                if let Some(memory) = Self::from_payload(&neighbour.payload) {
                    if memory.is_active() && memory.id != candidate.id {
                        cluster.push(memory);
                    }
                }
            }
            if cluster.len() > 1 {
                for member in &cluster {
                    clustered.insert(member.id.clone());
                }
                clusters.push(cluster);
            }
        }

        if request.dry_run {
            return Ok(MergeResponse {
                dry_run: true,
                clusters: Some(
                    clusters
                        .into_iter()
                        .map(|items| MergeCluster {
                            count: items.len(),
                            items,
                        })
                        .collect(),
                ),
                merged: None,
            });
        }

        let mut merged = 0usize;
        for cluster in clusters {
            // Canonical member: newest updated_at survives.
            let canonical = cluster
                .iter()
                .max_by_key(|m| m.updated_at)
                .expect("non-empty cluster")
                .clone();
            for member in cluster {
                if member.id == canonical.id {
                    continue;
                }
                let mut patch = Map::new();
                patch.insert("supersededBy".into(), json!(canonical.id));
                patch.insert("updatedAt".into(), json!(Utc::now()));
                self.store.set_payload(&collection, &member.id, patch).await?;
                merged += 1;
            }
        }

        Ok(MergeResponse {
            dry_run: false,
            clusters: None,
            merged: Some(merged),
        })
    }

    /// One batch embedding call, one upsert; per-item failures collect into
    /// the response instead of aborting the batch.
    pub async fn batch_remember(
        &self,
        project: &str,
        items: Vec<RememberRequest>,
    ) -> Result<BatchRememberResponse> {
        self.ensure_collection(project).await?;

        let mut errors = Vec::new();
        let mut memories = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            if item.content.trim().is_empty() {
                errors.push(format!("items[{index}]: content must not be empty"));
                continue;
            }
            memories.push(Self::build_memory(project, item));
        }

        let texts: Vec<String> = memories.iter().map(Memory::embedding_text).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let mut points = Vec::new();
        for (memory, vector) in memories.iter().zip(vectors) {
            match Self::to_payload(memory) {
                Ok(payload) => points.push(Point::new(memory.id.clone(), vector, payload)),
                Err(err) => errors.push(format!("{}: {err}", memory.id)),
            }
        }

        let saved = points.len();
        self.store.upsert(&Self::collection(project), points).await?;
        Ok(BatchRememberResponse { saved, errors })
    }

    pub async fn validate_memory(&self, project: &str, id: &str, validated: bool) -> Result<Memory> {
        // Existence check first so a bad id is a 404, not a silent patch.
        self.get(project, id).await?;
        let mut patch = Map::new();
        patch.insert("validated".into(), json!(validated));
        patch.insert("updatedAt".into(), json!(Utc::now()));
        self.store
            .set_payload(&Self::collection(project), id, patch)
            .await?;
        self.get(project, id).await
    }

    /// Candidates for human review: active memories never validated.
    pub async fn get_unvalidated(&self, project: &str, limit: usize) -> Result<Vec<Memory>> {
        self.ensure_collection(project).await?;
        let filter = Filter::new().must_not(Condition::value("validated", true));
        let mut memories = Vec::new();
        let mut offset = None;
        loop {
            let page = self
                .store
                .scroll(&Self::collection(project), Some(&filter), 128, offset)
                .await?;
            memories.extend(
                page.points
                    .iter()
                    .filter_map(|p| Self::from_payload(&p.payload))
                    .filter(Memory::is_active),
            );
            offset = page.next_offset;
            if offset.is_none() || memories.len() >= limit {
                break;
            }
        }
        memories.truncate(limit);
        Ok(memories)
    }

    pub async fn get_stats(&self, project: &str) -> Result<MemoryStats> {
        self.ensure_collection(project).await?;
        let by_type = self
            .store
            .aggregate_by_field(&Self::collection(project), "type")
            .await?;
        Ok(MemoryStats {
            total: by_type.values().sum(),
            by_type,
        })
    }
}
