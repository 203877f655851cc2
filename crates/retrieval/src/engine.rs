use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use ragd_cache::{CacheScope, CacheService, EMBED_TTL, SEARCH_TTL};
use ragd_graph::GraphStore;
use ragd_protocol::api::{
    AskRequest, AskResponse, ContextPackItem, ContextPackRequest, ContextPackResponse,
    Explanation, ExplainRequest, FindFeatureRequest, FindFeatureResponse, GraphSearchRequest,
    GraphSearchResponse, GroupedGroup, GroupedSearchRequest, GroupedSearchResponse,
    HybridSearchRequest, SearchRequest, SearchResponse, SearchResultItem, SimilarSearchRequest,
};
use ragd_protocol::{collections, ApiError, Result};
use ragd_providers::{CompletionOptions, EmbeddingProvider, LlmProvider};
use ragd_vector_store::{Condition, Filter, ScoredPoint, VectorStore};

/// Multiplicative score bonus for chunks typed as code.
pub const CODE_BOOST: f32 = 1.05;
/// Over-fetch factor that keeps `k` results alive through dedup.
const OVERFETCH: usize = 3;
/// Over-fetch factor for the fusion fallback's semantic leg.
const FUSION_OVERFETCH: usize = 2;
/// Keyword tokens shorter than this carry no signal.
const MIN_KEYWORD_LEN: usize = 2;

const ASK_FETCH: usize = 24;
const ASK_KEEP: usize = 8;
const EXPLAIN_RELATED: usize = 3;
const FEATURE_FETCH: usize = 10;
const GRAPH_MAX_FILES: usize = 10;
const GRAPH_CHUNKS_PER_FILE: usize = 2;

const ASK_SYSTEM_PROMPT: &str = "You are a codebase assistant. Answer strictly from the \
provided context chunks. Cite file paths for every claim. If the context does not contain \
the answer, say so instead of guessing.";

/// Retrieval engine: every search endpoint, plus LLM-backed answering.
pub struct SearchEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    graph: Arc<GraphStore>,
    cache: Option<Arc<CacheService>>,
}

impl SearchEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        graph: Arc<GraphStore>,
        cache: Option<Arc<CacheService>>,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            graph,
            cache,
        }
    }

    fn collection(project: &str, requested: Option<&str>) -> String {
        match requested {
            Some(name) => collections::qualify(project, name),
            None => collections::codebase(project),
        }
    }

    /// Embed with the 24h embedding cache in front.
    async fn embed_cached(&self, text: &str) -> Result<Vec<f32>> {
        let key = CacheService::embed_key(text);
        if let Some(cache) = &self.cache {
            if let Some(value) = cache.get(CacheScope::Global, &key).await {
                if let Ok(vector) = serde_json::from_value::<Vec<f32>>((*value).clone()) {
                    return Ok(vector);
                }
            }
        }
        let vector = self.embedder.embed(text).await?;
        if let Some(cache) = &self.cache {
            cache
                .set(CacheScope::Global, &key, json!(vector), EMBED_TTL)
                .await;
        }
        Ok(vector)
    }

    // ---- Ranking primitives -----------------------------------------------

    /// Code-boost then dedup-by-file: the highest-scored chunk per file wins,
    /// chunks without a `file` payload are retained individually.
    fn boost_and_dedup(mut hits: Vec<ScoredPoint>, k: usize) -> Vec<ScoredPoint> {
        for hit in &mut hits {
            if hit.payload_str("chunkType") == Some("code") {
                hit.score *= CODE_BOOST;
            }
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut seen_files: HashSet<String> = HashSet::new();
        let mut deduped = Vec::with_capacity(k);
        for hit in hits {
            match hit.payload_str("file") {
                Some(file) => {
                    if seen_files.insert(file.to_string()) {
                        deduped.push(hit);
                    }
                }
                None => deduped.push(hit),
            }
            if deduped.len() >= k {
                break;
            }
        }
        deduped
    }

    fn to_items(hits: &[ScoredPoint]) -> Vec<SearchResultItem> {
        hits.iter()
            .map(|hit| SearchResultItem {
                file: hit.payload_str("file").unwrap_or_default().to_string(),
                content: hit.payload_str("content").unwrap_or_default().to_string(),
                language: hit.payload_str("language").unwrap_or_default().to_string(),
                score: hit.score,
                start_line: hit.payload.get("startLine").and_then(|v| v.as_u64()).unwrap_or(0)
                    as usize,
                end_line: hit.payload.get("endLine").and_then(|v| v.as_u64()).unwrap_or(0)
                    as usize,
                chunk_type: hit.payload_str("chunkType").map(str::to_string),
            })
            .collect()
    }

    // ---- /search ----------------------------------------------------------

    pub async fn search(&self, project: &str, request: &SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        let collection = Self::collection(project, request.collection.as_deref());

        let cache_key = CacheService::search_key(
            &collection,
            &request.query,
            &format!("k={};t={:?}", request.limit, request.score_threshold),
        );
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(CacheScope::Project, &cache_key).await {
                if let Ok(mut response) = serde_json::from_value::<SearchResponse>((*cached).clone())
                {
                    response.elapsed_ms = started.elapsed().as_millis() as u64;
                    return Ok(response);
                }
            }
        }

        let vector = self.embed_cached(&request.query).await?;
        let hits = self
            .store
            .search(
                &collection,
                &vector,
                request.limit * OVERFETCH,
                None,
                request.score_threshold,
            )
            .await?;
        let deduped = Self::boost_and_dedup(hits, request.limit);

        let response = SearchResponse {
            query: request.query.clone(),
            count: deduped.len(),
            results: Self::to_items(&deduped),
            mode: None,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        if let Some(cache) = &self.cache {
            cache
                .set(
                    CacheScope::Project,
                    &cache_key,
                    serde_json::to_value(&response)?,
                    SEARCH_TTL,
                )
                .await;
        }
        Ok(response)
    }

    // ---- /search-hybrid ---------------------------------------------------

    pub async fn search_hybrid(
        &self,
        project: &str,
        request: &HybridSearchRequest,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let collection = Self::collection(project, request.collection.as_deref());

        if self.embedder.supports_sparse() {
            let full = self.embedder.embed_full(&request.query).await?;
            if let Some(sparse) = &full.sparse {
                let hits = self
                    .store
                    .search_hybrid(
                        &collection,
                        &full.dense,
                        sparse,
                        request.limit * OVERFETCH,
                        None,
                    )
                    .await?;
                let deduped = Self::boost_and_dedup(hits, request.limit);
                return Ok(SearchResponse {
                    query: request.query.clone(),
                    count: deduped.len(),
                    results: Self::to_items(&deduped),
                    mode: Some("native-sparse".to_string()),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
        }

        // Keyword-fusion fallback.
        let vector = self.embed_cached(&request.query).await?;
        let semantic_hits = self
            .store
            .search(
                &collection,
                &vector,
                request.limit * FUSION_OVERFETCH,
                None,
                None,
            )
            .await?;

        let keywords: Vec<String> = request
            .query
            .split_whitespace()
            .filter(|token| token.len() > MIN_KEYWORD_LEN)
            .map(str::to_lowercase)
            .collect();

        let keyword_hits = if keywords.is_empty() {
            Vec::new()
        } else {
            let mut filter = Filter::new();
            for keyword in &keywords {
                filter = filter.should(Condition::text("content", keyword.clone()));
            }
            self.store
                .search(
                    &collection,
                    &vector,
                    request.limit * FUSION_OVERFETCH,
                    Some(&filter),
                    None,
                )
                .await?
        };

        let semantic_scores: HashMap<String, f32> = semantic_hits
            .iter()
            .map(|hit| (hit.id.clone(), hit.score))
            .collect();

        // Union of both result sets, fused by weighted sum.
        let mut pool: HashMap<String, ScoredPoint> = HashMap::new();
        for hit in semantic_hits.into_iter().chain(keyword_hits) {
            pool.entry(hit.id.clone()).or_insert(hit);
        }

        let weight = request.semantic_weight;
        let fused: Vec<ScoredPoint> = pool
            .into_values()
            .map(|mut hit| {
                let semantic = semantic_scores.get(&hit.id).copied().unwrap_or(hit.score);
                let keyword = keyword_ratio(hit.payload_str("content").unwrap_or(""), &keywords);
                hit.score = weight * semantic + (1.0 - weight) * keyword;
                hit
            })
            .collect();

        let deduped = Self::boost_and_dedup(fused, request.limit);
        Ok(SearchResponse {
            query: request.query.clone(),
            count: deduped.len(),
            results: Self::to_items(&deduped),
            mode: Some("text-match-fusion".to_string()),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    // ---- /search-grouped --------------------------------------------------

    pub async fn search_grouped(
        &self,
        project: &str,
        request: &GroupedSearchRequest,
    ) -> Result<GroupedSearchResponse> {
        let started = Instant::now();
        let vector = self.embed_cached(&request.query).await?;
        let groups = self
            .store
            .search_groups(
                &collections::codebase(project),
                &vector,
                &request.group_by,
                request.limit,
                request.group_size,
                None,
                None,
            )
            .await?;

        Ok(GroupedSearchResponse {
            query: request.query.clone(),
            groups: groups
                .into_iter()
                .map(|group| GroupedGroup {
                    key: group.key,
                    results: Self::to_items(&group.hits),
                })
                .collect(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    // ---- /search-similar --------------------------------------------------

    pub async fn search_similar(
        &self,
        project: &str,
        request: &SimilarSearchRequest,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let vector = self.embedder.embed(&request.code).await?;
        // No boost, no dedup: similar-code lookups want raw neighbours.
        let hits = self
            .store
            .search(
                &collections::codebase(project),
                &vector,
                request.limit,
                None,
                Some(request.score_threshold),
            )
            .await?;

        Ok(SearchResponse {
            query: String::new(),
            count: hits.len(),
            results: Self::to_items(&hits),
            mode: None,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    // ---- /search-graph ----------------------------------------------------

    pub async fn search_graph(
        &self,
        project: &str,
        request: &GraphSearchRequest,
    ) -> Result<GraphSearchResponse> {
        let collection = collections::codebase(project);
        let vector = self.embed_cached(&request.query).await?;
        let hits = self
            .store
            .search(&collection, &vector, request.limit * OVERFETCH, None, None)
            .await?;
        let seeds = Self::boost_and_dedup(hits, request.limit);

        let seed_files: Vec<String> = seeds
            .iter()
            .filter_map(|hit| hit.payload_str("file").map(str::to_string))
            .collect();

        let expanded_files: Vec<String> = self
            .graph
            .expand(project, &seed_files, request.hops)
            .into_iter()
            .take(GRAPH_MAX_FILES)
            .collect();

        let mut graph_hits = Vec::new();
        for file in &expanded_files {
            let filter = Filter::new().must(Condition::value("file", file.as_str()));
            let mut hits = self
                .store
                .search(
                    &collection,
                    &vector,
                    GRAPH_CHUNKS_PER_FILE,
                    Some(&filter),
                    None,
                )
                .await?;
            graph_hits.append(&mut hits);
        }

        Ok(GraphSearchResponse {
            results: Self::to_items(&seeds),
            graph_expanded: Self::to_items(&graph_hits),
            expanded_files,
        })
    }

    // ---- /ask -------------------------------------------------------------

    pub async fn ask(&self, project: &str, request: &AskRequest) -> Result<AskResponse> {
        let collection = collections::codebase(project);
        let vector = self.embed_cached(&request.question).await?;
        let hits = self
            .store
            .search(&collection, &vector, ASK_FETCH, None, None)
            .await?;
        let context = Self::boost_and_dedup(hits, ASK_KEEP);
        if context.is_empty() {
            return Err(ApiError::NotFound(format!(
                "no indexed content for project {project}"
            )));
        }

        let mut prompt = String::new();
        let mut sources = Vec::new();
        for hit in &context {
            let file = hit.payload_str("file").unwrap_or("unknown");
            prompt.push_str(&format!(
                "File: {file}\n{}\n\n",
                hit.payload_str("content").unwrap_or_default()
            ));
            sources.push(file.to_string());
        }
        prompt.push_str(&format!("Question: {}\n", request.question));

        let completion = self
            .llm
            .complete(
                &prompt,
                &CompletionOptions {
                    system: Some(ASK_SYSTEM_PROMPT.to_string()),
                    temperature: 0.3,
                    max_tokens: 2048,
                },
            )
            .await?;

        Ok(AskResponse {
            answer: completion.text,
            sources,
            usage: Some(completion.usage),
        })
    }

    // ---- /explain ---------------------------------------------------------

    pub async fn explain(&self, project: &str, request: &ExplainRequest) -> Result<Explanation> {
        let mut related = String::new();
        if let Some(collection) = &request.collection {
            let collection = collections::qualify(project, collection);
            let vector = self.embedder.embed(&request.code).await?;
            if let Ok(hits) = self
                .store
                .search(&collection, &vector, EXPLAIN_RELATED, None, None)
                .await
            {
                for hit in hits {
                    related.push_str(&format!(
                        "Related ({}):\n{}\n\n",
                        hit.payload_str("file").unwrap_or("unknown"),
                        hit.payload_str("content").unwrap_or_default(),
                    ));
                }
            }
        }

        let language = request.language.as_deref().unwrap_or("unknown");
        let prompt = format!(
            "Explain this {language} code. Respond with JSON only, shaped as \
{{\"summary\": string, \"purpose\": string, \"keyComponents\": string[], \
\"dependencies\": string[], \"potentialIssues\": string[]}}.\n\n{related}Code:\n{}",
            request.code
        );

        let completion = self.llm.complete(&prompt, &CompletionOptions::default()).await?;
        let raw = completion.text.trim();
        // Models often wrap JSON in a fence; strip it before parsing.
        let stripped = raw
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        Ok(serde_json::from_str::<Explanation>(stripped)
            .unwrap_or_else(|_| Explanation::from_raw(raw.to_string())))
    }

    // ---- /find-feature ----------------------------------------------------

    pub async fn find_feature(
        &self,
        project: &str,
        request: &FindFeatureRequest,
    ) -> Result<FindFeatureResponse> {
        let collection = collections::codebase(project);
        let vector = self.embed_cached(&request.feature).await?;
        let hits = self
            .store
            .search(&collection, &vector, FEATURE_FETCH, None, None)
            .await?;

        // Group by file, keep each file's best score and chunks.
        let mut order: Vec<String> = Vec::new();
        let mut chunks_by_file: HashMap<String, Vec<String>> = HashMap::new();
        for hit in &hits {
            let Some(file) = hit.payload_str("file").map(str::to_string) else {
                continue;
            };
            if !order.contains(&file) {
                order.push(file.clone());
            }
            chunks_by_file
                .entry(file)
                .or_default()
                .push(hit.payload_str("content").unwrap_or_default().to_string());
        }

        let main_files: Vec<String> = order.iter().take(3).cloned().collect();
        let related_files: Vec<String> = order.iter().skip(3).take(3).cloned().collect();

        let mut context = String::new();
        for file in order.iter().take(5) {
            context.push_str(&format!(
                "File: {file}\n{}\n\n",
                chunks_by_file.get(file).map(|c| c.join("\n")).unwrap_or_default()
            ));
        }
        let prompt = format!(
            "Explain where the feature \"{}\" is implemented, based on these files:\n\n{context}",
            request.feature
        );
        let completion = self.llm.complete(&prompt, &CompletionOptions::default()).await?;

        Ok(FindFeatureResponse {
            main_files,
            related_files,
            explanation: completion.text,
        })
    }

    // ---- /context-pack ----------------------------------------------------

    pub async fn context_pack(
        &self,
        project: &str,
        request: &ContextPackRequest,
    ) -> Result<ContextPackResponse> {
        let collection = collections::codebase(project);
        let vector = self.embed_cached(&request.query).await?;

        let mut candidates: Vec<ContextPackItem> = Vec::new();

        let semantic_hits = self
            .store
            .search(&collection, &vector, 20, None, None)
            .await?;
        let semantic = Self::boost_and_dedup(semantic_hits, 20);
        for hit in &semantic {
            candidates.push(pack_item("semantic", hit));
        }

        if request.include_memories {
            let filter = Filter::new().must(Condition::value("type", "decision"));
            match self
                .store
                .search(
                    &collections::agent_memory(project),
                    &vector,
                    10,
                    Some(&filter),
                    None,
                )
                .await
            {
                Ok(hits) => {
                    for hit in &hits {
                        candidates.push(ContextPackItem {
                            facet: "memory".to_string(),
                            file: None,
                            content: hit.payload_str("content").unwrap_or_default().to_string(),
                            score: hit.score,
                            tokens: estimate_tokens(hit.payload_str("content").unwrap_or("")),
                        });
                    }
                }
                Err(err) => log::debug!("context-pack memory facet skipped: {err}"),
            }
        }

        if request.include_tests {
            let filter = Filter::new().should(Condition::text("file", "test"));
            let hits = self
                .store
                .search(&collection, &vector, 10, Some(&filter), None)
                .await?;
            for hit in &Self::boost_and_dedup(hits, 10) {
                candidates.push(pack_item("test", hit));
            }
        }

        if request.include_graph {
            let seed_files: Vec<String> = semantic
                .iter()
                .take(5)
                .filter_map(|hit| hit.payload_str("file").map(str::to_string))
                .collect();
            for file in self.graph.expand(project, &seed_files, 1).into_iter().take(5) {
                let filter = Filter::new().must(Condition::value("file", file.as_str()));
                let hits = self
                    .store
                    .search(&collection, &vector, 1, Some(&filter), None)
                    .await?;
                for hit in &hits {
                    candidates.push(pack_item("graph", hit));
                }
            }
        }

        // Greedy pack, highest score first, until the token budget is met.
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let mut items = Vec::new();
        let mut total_tokens = 0usize;
        let mut seen: HashSet<(Option<String>, String)> = HashSet::new();
        for item in candidates {
            if total_tokens + item.tokens > request.token_budget {
                continue;
            }
            let key = (item.file.clone(), item.content.clone());
            if !seen.insert(key) {
                continue;
            }
            total_tokens += item.tokens;
            items.push(item);
        }

        Ok(ContextPackResponse {
            items,
            total_tokens,
            token_budget: request.token_budget,
        })
    }
}

fn keyword_ratio(content: &str, keywords: &[String]) -> f32 {
    if keywords.is_empty() {
        return 0.0;
    }
    let content = content.to_lowercase();
    let matched = keywords.iter().filter(|kw| content.contains(kw.as_str())).count();
    matched as f32 / keywords.len() as f32
}

fn estimate_tokens(content: &str) -> usize {
    (content.len() / 4).max(1)
}

fn pack_item(facet: &str, hit: &ScoredPoint) -> ContextPackItem {
    let content = hit.payload_str("content").unwrap_or_default().to_string();
    ContextPackItem {
        facet: facet.to_string(),
        file: hit.payload_str("file").map(str::to_string),
        tokens: estimate_tokens(&content),
        score: hit.score,
        content,
    }
}
