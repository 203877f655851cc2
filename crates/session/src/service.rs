use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use ragd_cache::{CacheScope, CacheService, SESSION_TTL};
use ragd_memory::MemoryService;
use ragd_protocol::api::{EndSessionRequest, RememberRequest, StartSessionRequest};
use ragd_protocol::{
    collections, ApiError, MemoryType, Result, SessionActivity, SessionContext, SessionStatus,
    SessionSummary, RESUME_QUERY_CARRYOVER,
};
use ragd_providers::EmbeddingProvider;
use ragd_vector_store::{Point, VectorStore};

/// Session lifecycle and activity stream.
///
/// The cache is the authoritative read path while a session is active; the
/// vector store record in `{project}_sessions` is a durable mirror refreshed
/// on every update.
pub struct SessionService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    memory: Arc<MemoryService>,
    cache: Arc<CacheService>,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        memory: Arc<MemoryService>,
        cache: Arc<CacheService>,
    ) -> Self {
        Self {
            store,
            embedder,
            memory,
            cache,
        }
    }

    fn collection(project: &str) -> String {
        collections::sessions(project)
    }

    async fn ensure_collection(&self, project: &str) -> Result<()> {
        self.store
            .ensure_collection(&Self::collection(project), self.embedder.dimension(), false)
            .await
    }

    /// Descriptor embedded for the session record; lets similar sessions be
    /// found by vector search later.
    fn descriptor(context: &SessionContext) -> String {
        format!(
            "session in {}: queries {}; files {}",
            context.project,
            context.recent_queries.join(", "),
            context.current_files.join(", "),
        )
    }

    async fn persist(&self, context: &SessionContext) -> Result<()> {
        let key = CacheService::session_key(&context.project, &context.session_id);
        self.cache
            .set(
                CacheScope::Session,
                &key,
                serde_json::to_value(context)?,
                SESSION_TTL,
            )
            .await;

        let vector = self.embedder.embed(&Self::descriptor(context)).await?;
        let payload = match serde_json::to_value(context)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.store
            .upsert(
                &Self::collection(&context.project),
                vec![Point::new(context.session_id.clone(), vector, payload)],
            )
            .await
    }

    pub async fn start_session(
        &self,
        project: &str,
        request: &StartSessionRequest,
    ) -> Result<SessionContext> {
        self.ensure_collection(project).await?;

        let mut context =
            SessionContext::new(Uuid::new_v4().to_string(), project.to_string(), Utc::now());
        context.metadata = request.metadata.clone();

        if let Some(previous_id) = &request.resume_from {
            match self.get_session(project, previous_id).await {
                Ok(previous) => {
                    context.current_files = previous.current_files;
                    context.recent_queries = previous
                        .recent_queries
                        .iter()
                        .rev()
                        .take(RESUME_QUERY_CARRYOVER)
                        .rev()
                        .cloned()
                        .collect();
                    context.decisions = previous.decisions;
                    context
                        .metadata
                        .insert("resumedFrom".into(), Value::String(previous_id.clone()));
                }
                Err(err) => {
                    log::warn!("resume from {previous_id} failed, starting fresh: {err}");
                }
            }
        }

        self.persist(&context).await?;
        Ok(context)
    }

    /// Cache read-through; falls back to the durable mirror.
    pub async fn get_session(&self, project: &str, session_id: &str) -> Result<SessionContext> {
        let key = CacheService::session_key(project, session_id);
        if let Some(cached) = self.cache.get(CacheScope::Session, &key).await {
            if let Ok(context) = serde_json::from_value::<SessionContext>((*cached).clone()) {
                return Ok(context);
            }
        }

        let points = self
            .store
            .retrieve(&Self::collection(project), &[session_id.to_string()])
            .await?;
        points
            .first()
            .and_then(|p| serde_json::from_value(Value::Object(p.payload.clone())).ok())
            .ok_or_else(|| ApiError::NotFound(format!("session {session_id}")))
    }

    /// Single-writer per session: each activity re-reads, mutates, persists.
    pub async fn record_activity(
        &self,
        project: &str,
        session_id: &str,
        activity: &SessionActivity,
    ) -> Result<SessionContext> {
        let mut context = self.get_session(project, session_id).await?;
        if context.status == SessionStatus::Ended {
            return Err(ApiError::Conflict(format!(
                "session {session_id} has already ended"
            )));
        }

        if let Some(file) = &activity.file {
            context.touch_file(file);
        }
        if let Some(query) = &activity.query {
            context.record_query(query);
        }
        if let Some(tool) = &activity.tool {
            context.record_tool(tool);
        }
        if let Some(feature) = &activity.feature {
            if !context.active_features.contains(feature) {
                context.active_features.push(feature.clone());
            }
        }
        if let Some(learning) = &activity.learning {
            context.pending_learnings.push(learning.clone());
        }
        if let Some(decision) = &activity.decision {
            context.decisions.push(decision.clone());
        }
        context.last_activity_at = Utc::now();

        self.persist(&context).await?;
        Ok(context)
    }

    /// End the session: pending learnings and decisions materialise as
    /// memories, tagged with the session prefix.
    pub async fn end_session(
        &self,
        project: &str,
        session_id: &str,
        request: &EndSessionRequest,
    ) -> Result<SessionSummary> {
        let mut context = self.get_session(project, session_id).await?;
        if context.status == SessionStatus::Ended {
            return Err(ApiError::Conflict(format!(
                "session {session_id} has already ended"
            )));
        }

        let session_tag = session_id.chars().take(8).collect::<String>();
        let mut learnings_saved = 0usize;
        let mut decisions_saved = 0usize;

        for (content, memory_type) in context
            .pending_learnings
            .iter()
            .map(|l| (l, MemoryType::Insight))
            .chain(context.decisions.iter().map(|d| (d, MemoryType::Decision)))
        {
            let mut metadata = std::collections::HashMap::new();
            metadata.insert("sessionId".to_string(), Value::String(session_id.to_string()));
            let request = RememberRequest {
                memory_type,
                content: content.clone(),
                tags: vec!["session".to_string(), session_tag.clone()],
                related_to: None,
                validated: None,
                source: Some("session".to_string()),
                confidence: None,
                metadata,
            };
            match self.memory.remember(project, request).await {
                Ok(_) => match memory_type {
                    MemoryType::Insight => learnings_saved += 1,
                    _ => decisions_saved += 1,
                },
                Err(err) => log::warn!("materialising session memory failed: {err}"),
            }
        }

        let duration_secs = (Utc::now() - context.started_at).num_seconds();
        let summary_text = request.summary.clone().unwrap_or_else(|| {
            format!(
                "Touched {} files, ran {} queries, used {}.",
                context.current_files.len(),
                context.recent_queries.len(),
                if context.tools_used.is_empty() {
                    "no tools".to_string()
                } else {
                    context.tools_used.join(", ")
                }
            )
        });

        context.status = SessionStatus::Ended;
        context.last_activity_at = Utc::now();
        self.persist(&context).await?;

        Ok(SessionSummary {
            session_id: session_id.to_string(),
            project: project.to_string(),
            duration_secs,
            tools_used: context.tools_used.clone(),
            files_touched: context.current_files.clone(),
            query_count: context.recent_queries.len(),
            learnings_saved,
            decisions_saved,
            summary: summary_text,
        })
    }

    pub async fn list_sessions(&self, project: &str) -> Result<Vec<SessionContext>> {
        self.ensure_collection(project).await?;
        let mut sessions = Vec::new();
        let mut offset = None;
        loop {
            let page = self
                .store
                .scroll(&Self::collection(project), None, 128, offset)
                .await?;
            sessions.extend(
                page.points
                    .iter()
                    .filter_map(|p| serde_json::from_value(Value::Object(p.payload.clone())).ok()),
            );
            offset = page.next_offset;
            if offset.is_none() {
                break;
            }
        }
        Ok(sessions)
    }
}
