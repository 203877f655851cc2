use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};

use ragd_graph::GraphStore;
use ragd_parsers::{extract_edges, language_for, ParserRegistry};
use ragd_protocol::api::{IndexRequest, ReindexRequest};
use ragd_protocol::{
    collections, point_id, ApiError, GraphEdge, IndexStatus, ParsedChunk, ProjectStats, Result,
};
use ragd_providers::EmbeddingProvider;
use ragd_vector_store::{alias_target, Point, VectorStore};

use crate::scanner::FileScanner;
use crate::status::StatusMap;

/// Unknown files are skipped by the indexer before any counter sees them.
fn indexable(files: Vec<std::path::PathBuf>) -> Vec<std::path::PathBuf> {
    files
        .into_iter()
        .filter(|file| {
            ParserRegistry::classify(&file.to_string_lossy()) != ragd_protocol::FileKind::Unknown
        })
        .collect()
}

/// Architectural layer guess from path segments; indexed for faceted search.
fn derive_layer(file: &str) -> Option<&'static str> {
    let lowered = file.to_lowercase();
    let has = |needle: &str| {
        lowered
            .split(['/', '.', '_', '-'])
            .any(|segment| segment == needle)
    };
    if has("test") || has("tests") || has("spec") {
        Some("test")
    } else if has("controller") || has("controllers") || has("routes") || has("handlers") || has("api") {
        Some("api")
    } else if has("service") || has("services") || has("usecases") {
        Some("service")
    } else if has("repository") || has("repositories") || has("store") || has("db") || has("dao") {
        Some("data")
    } else if has("model") || has("models") || has("entities") || has("types") || has("domain") {
        Some("domain")
    } else if has("util") || has("utils") || has("helpers") || has("common") {
        Some("shared")
    } else {
        None
    }
}

/// Owning service/package: the first meaningful directory segment.
fn derive_service(file: &str) -> Option<String> {
    let mut segments = file.split('/');
    let first = segments.next()?;
    if segments.next().is_none() {
        return None; // top-level file, no owning directory
    }
    match first {
        "src" | "lib" | "app" | "pkg" => {
            // One level deeper when the root is a generic source dir.
            let path = std::path::Path::new(file);
            let mut components = path.components().skip(1);
            let second = components.next()?.as_os_str().to_str()?;
            if components.next().is_none() {
                None
            } else {
                Some(second.to_string())
            }
        }
        other => Some(other.to_string()),
    }
}


/// Embedding requests are batched up to this size.
const EMBED_BATCH: usize = 64;
/// How long the previous collection keeps serving in-flight readers after an
/// alias swap before it is deleted.
const DRAIN_WINDOW: Duration = Duration::from_secs(30);

/// Outcome of one indexing job.
#[derive(Debug, Clone, Default)]
pub struct IndexOutcome {
    pub files_indexed: usize,
    pub chunks_indexed: usize,
    pub errors: Vec<String>,
}

/// Walks a project, parses and embeds its files and commits them to the
/// project's codebase collection behind an alias.
///
/// The alias exists from the very first index: `{project}_codebase` always
/// points at a versioned concrete collection, which is what makes the
/// zero-downtime reindex a single alias swap.
pub struct ProjectIndexer {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    graph: Arc<GraphStore>,
    status: Arc<StatusMap>,
}

struct PendingChunk {
    id: String,
    text: String,
    payload: Map<String, Value>,
}

impl ProjectIndexer {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        graph: Arc<GraphStore>,
        status: Arc<StatusMap>,
    ) -> Self {
        Self {
            store,
            embedder,
            graph,
            status,
        }
    }

    pub fn status(&self, project: &str) -> IndexStatus {
        self.status.snapshot(project)
    }

    pub fn project_stats(&self, project: &str) -> ProjectStats {
        self.status.project_stats(project)
    }

    pub fn cancel(&self, project: &str) {
        self.status.cancel(project);
    }

    pub fn status_map(&self) -> Arc<StatusMap> {
        Arc::clone(&self.status)
    }

    /// Resolve (or create) the concrete collection behind the project alias.
    async fn ensure_alias_target(&self, project: &str) -> Result<String> {
        let alias = collections::codebase(project);
        if let Some(target) = alias_target(self.store.as_ref(), &alias).await? {
            return Ok(target);
        }
        let target = collections::codebase_version(project, 1);
        self.store
            .ensure_collection(
                &target,
                self.embedder.dimension(),
                self.embedder.supports_sparse(),
            )
            .await?;
        self.store.ensure_payload_indexes(&target).await?;
        self.store.create_alias(&alias, &target).await?;
        Ok(target)
    }

    fn next_version(&self, project: &str, existing: &[String]) -> u32 {
        let prefix = format!("{}_v", collections::codebase(project));
        existing
            .iter()
            .filter_map(|name| name.strip_prefix(&prefix))
            .filter_map(|version| version.parse::<u32>().ok())
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Index the whole project into its live collection. Rejects with
    /// `CONFLICT` while another job is running for the same project.
    pub async fn index_project(
        &self,
        project: &str,
        root: &Path,
        request: &IndexRequest,
    ) -> Result<IndexOutcome> {
        let scanner = FileScanner::new(root, &request.patterns, &request.exclude_patterns)?;
        let files = indexable(scanner.scan()?);
        self.status.begin(project, files.len())?;

        let result = async {
            let collection = self.ensure_alias_target(project).await?;
            if request.force {
                self.store.clear_collection(&collection).await?;
            }
            self.index_files_into(project, &collection, root, &files).await
        }
        .await;

        self.finish(project, &collections::codebase(project), result).await
    }

    /// Build `{project}_codebase_v{n+1}`, populate it, swap the alias in one
    /// backend operation, and delete the old version after a drain window.
    pub async fn reindex_zero_downtime(
        &self,
        project: &str,
        root: &Path,
        request: &ReindexRequest,
    ) -> Result<IndexOutcome> {
        let scanner = FileScanner::new(root, &request.patterns, &request.exclude_patterns)?;
        let files = indexable(scanner.scan()?);
        self.status.begin(project, files.len())?;

        let alias = request
            .alias_name
            .clone()
            .unwrap_or_else(|| collections::codebase(project));

        let result = async {
            let existing = self.store.list_collections().await?;
            let next = collections::codebase_version(project, self.next_version(project, &existing));
            self.store
                .ensure_collection(
                    &next,
                    self.embedder.dimension(),
                    self.embedder.supports_sparse(),
                )
                .await?;
            self.store.ensure_payload_indexes(&next).await?;

            let outcome = self.index_files_into(project, &next, root, &files).await?;

            let previous = alias_target(self.store.as_ref(), &alias).await?;
            match previous {
                Some(_) => self.store.switch_alias(&alias, &next).await?,
                None => self.store.create_alias(&alias, &next).await?,
            }

            if let Some(previous) = previous {
                if previous != next {
                    let store = Arc::clone(&self.store);
                    tokio::spawn(async move {
                        tokio::time::sleep(DRAIN_WINDOW).await;
                        if let Err(err) = store.delete_collection(&previous).await {
                            log::warn!("drain delete of {previous} failed: {err}");
                        }
                    });
                }
            }
            Ok(outcome)
        }
        .await;

        self.finish(project, &alias, result).await
    }

    async fn finish(
        &self,
        project: &str,
        count_collection: &str,
        result: Result<IndexOutcome>,
    ) -> Result<IndexOutcome> {
        match result {
            Ok(outcome) => {
                let vector_count = self
                    .store
                    .count(count_collection, None)
                    .await
                    .unwrap_or_default();
                self.status.complete(project, vector_count);
                Ok(outcome)
            }
            Err(err) => {
                self.status.fail(project, err.to_string());
                Err(err)
            }
        }
    }

    /// Re-index a specific set of files in place (used by the watcher).
    pub async fn index_files(
        &self,
        project: &str,
        root: &Path,
        files: &[std::path::PathBuf],
    ) -> Result<usize> {
        let collection = self.ensure_alias_target(project).await?;
        let outcome = self.index_files_into(project, &collection, root, files).await?;
        Ok(outcome.chunks_indexed)
    }

    async fn index_files_into(
        &self,
        project: &str,
        collection: &str,
        root: &Path,
        files: &[std::path::PathBuf],
    ) -> Result<IndexOutcome> {
        let mut outcome = IndexOutcome::default();
        let mut edges: Vec<GraphEdge> = Vec::new();
        let mut pending: Vec<PendingChunk> = Vec::new();
        let mut stats = ProjectStats::default();

        for file in files {
            if self.status.is_cancelled(project) {
                log::info!("indexing of {project} cancelled after {} files", outcome.files_indexed);
                break;
            }

            let relative = file.to_string_lossy().replace('\\', "/");
            let absolute = root.join(file);

            let file_error = match tokio::fs::read_to_string(&absolute).await {
                Ok(content) => {
                    stats.total_lines += content.lines().count();
                    *stats
                        .languages
                        .entry(language_for(&relative).to_string())
                        .or_insert(0) += 1;

                    match ParserRegistry::parse(&relative, &content) {
                        Ok(chunks) => {
                            edges.extend(extract_edges(&content, &relative));
                            for chunk in chunks {
                                pending.push(self.pending_chunk(project, &relative, chunk)?);
                                outcome.chunks_indexed += 1;
                            }
                            None
                        }
                        Err(err) => Some(format!("{relative}: {err}")),
                    }
                }
                Err(err) => Some(format!("{relative}: {err}")),
            };

            if pending.len() >= EMBED_BATCH {
                if let Some(error) = self.flush(collection, &mut pending).await? {
                    outcome.errors.push(error);
                }
            }

            outcome.files_indexed += 1;
            if let Some(error) = &file_error {
                log::warn!("indexing: {error}");
                outcome.errors.push(error.clone());
            }
            self.status.record_file(project, file_error);

            // Keep the API responsive while long jobs run.
            tokio::task::yield_now().await;
        }

        if let Some(error) = self.flush(collection, &mut pending).await? {
            outcome.errors.push(error);
        }

        self.graph.replace_project(project, edges);

        stats.file_count = outcome.files_indexed;
        stats.last_indexed = Some(Utc::now());
        self.status.set_stats(project, stats);

        Ok(outcome)
    }

    fn pending_chunk(&self, project: &str, file: &str, chunk: ParsedChunk) -> Result<PendingChunk> {
        let id = point_id(project, file, &chunk);
        let mut payload = match serde_json::to_value(&chunk)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        payload.insert("project".into(), json!(project));
        payload.insert("file".into(), json!(file));
        payload.insert("chunkType".into(), json!(chunk.kind.as_str()));
        payload.insert("language".into(), json!(chunk.language));
        if let Some(layer) = derive_layer(file) {
            payload.insert("layer".into(), json!(layer));
        }
        if let Some(service) = derive_service(file) {
            payload.insert("service".into(), json!(service));
        }
        Ok(PendingChunk {
            id,
            text: chunk.content,
            payload,
        })
    }

    /// Embed and upsert the pending batch.
    ///
    /// Circuit-open and configuration failures abort the job; other upstream
    /// errors degrade to a collected error so the job can continue.
    async fn flush(
        &self,
        collection: &str,
        pending: &mut Vec<PendingChunk>,
    ) -> Result<Option<String>> {
        if pending.is_empty() {
            return Ok(None);
        }
        let batch: Vec<PendingChunk> = pending.drain(..).collect();
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

        let vectors = match self.embedder.embed_batch(&texts).await {
            Ok(vectors) => vectors,
            Err(err @ (ApiError::CircuitOpen(_) | ApiError::Configuration(_))) => return Err(err),
            Err(err) => return Ok(Some(format!("embedding batch failed: {err}"))),
        };

        let mut points = Vec::with_capacity(batch.len());
        for (chunk, vector) in batch.into_iter().zip(vectors) {
            let sparse = if self.embedder.supports_sparse() {
                self.embedder.embed_full(&chunk.text).await.ok().and_then(|f| f.sparse)
            } else {
                None
            };
            points.push(Point::new(chunk.id, vector, chunk.payload).with_sparse(sparse));
        }

        match self.store.upsert(collection, points).await {
            Ok(()) => Ok(None),
            Err(err @ (ApiError::CircuitOpen(_) | ApiError::Configuration(_))) => Err(err),
            Err(err) => Ok(Some(format!("upsert failed: {err}"))),
        }
    }
}
