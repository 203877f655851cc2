use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use ragd_protocol::api::TrackUsageRequest;
use ragd_protocol::Result;
use ragd_providers::EmbeddingProvider;

/// Queries scoring below this are treated as knowledge gaps.
const GAP_SCORE_THRESHOLD: f32 = 0.35;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub tool: String,
    pub query: Option<String>,
    pub result_count: Option<usize>,
    pub top_score: Option<f32>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAnalytics {
    pub tool: String,
    pub calls: usize,
    pub avg_result_count: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeGap {
    pub query: String,
    pub top_score: Option<f32>,
    pub result_count: Option<usize>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarQuery {
    pub query: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsagePatterns {
    pub top_tools: Vec<ToolAnalytics>,
    pub top_queries: Vec<String>,
}

/// In-process usage tracking: tool calls, low-signal queries, query
/// similarity. Process-local by design, like the index status map.
pub struct UsageTracker {
    events: RwLock<HashMap<String, Vec<UsageEvent>>>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl UsageTracker {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            embedder,
        }
    }

    pub fn track(&self, project: &str, request: &TrackUsageRequest) {
        let mut events = self.events.write().expect("usage lock");
        events.entry(project.to_string()).or_default().push(UsageEvent {
            tool: request.tool.clone(),
            query: request.query.clone(),
            result_count: request.result_count,
            top_score: request.top_score,
            at: Utc::now(),
        });
    }

    pub fn tool_analytics(&self, project: &str) -> Vec<ToolAnalytics> {
        let events = self.events.read().expect("usage lock");
        let mut by_tool: HashMap<&str, (usize, usize)> = HashMap::new();
        for event in events.get(project).into_iter().flatten() {
            let entry = by_tool.entry(event.tool.as_str()).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += event.result_count.unwrap_or(0);
        }
        let mut analytics: Vec<ToolAnalytics> = by_tool
            .into_iter()
            .map(|(tool, (calls, results))| ToolAnalytics {
                tool: tool.to_string(),
                calls,
                avg_result_count: if calls == 0 {
                    0.0
                } else {
                    results as f64 / calls as f64
                },
            })
            .collect();
        analytics.sort_by(|a, b| b.calls.cmp(&a.calls));
        analytics
    }

    /// Queries the corpus answered poorly: empty results or a weak top score.
    pub fn knowledge_gaps(&self, project: &str) -> Vec<KnowledgeGap> {
        let events = self.events.read().expect("usage lock");
        events
            .get(project)
            .into_iter()
            .flatten()
            .filter(|event| {
                event.query.is_some()
                    && (event.result_count == Some(0)
                        || event.top_score.map(|s| s < GAP_SCORE_THRESHOLD).unwrap_or(false))
            })
            .map(|event| KnowledgeGap {
                query: event.query.clone().unwrap_or_default(),
                top_score: event.top_score,
                result_count: event.result_count,
                at: event.at,
            })
            .collect()
    }

    /// Past queries closest to the given one, by embedding cosine.
    pub async fn similar_queries(
        &self,
        project: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SimilarQuery>> {
        let recorded: Vec<String> = {
            let events = self.events.read().expect("usage lock");
            let mut seen = std::collections::HashSet::new();
            events
                .get(project)
                .into_iter()
                .flatten()
                .filter_map(|e| e.query.clone())
                .filter(|q| q != query && seen.insert(q.clone()))
                .collect()
        };
        if recorded.is_empty() {
            return Ok(Vec::new());
        }

        let target = normalize(self.embedder.embed(query).await?);
        let vectors = self.embedder.embed_batch(&recorded).await?;

        let mut similar: Vec<SimilarQuery> = recorded
            .into_iter()
            .zip(vectors)
            .map(|(query, vector)| SimilarQuery {
                query,
                score: dot(&target, &normalize(vector)),
            })
            .collect();
        similar.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        similar.truncate(limit);
        Ok(similar)
    }

    pub fn patterns(&self, project: &str) -> UsagePatterns {
        let events = self.events.read().expect("usage lock");
        let mut query_counts: HashMap<&str, usize> = HashMap::new();
        for event in events.get(project).into_iter().flatten() {
            if let Some(query) = &event.query {
                *query_counts.entry(query.as_str()).or_insert(0) += 1;
            }
        }
        let mut top_queries: Vec<(String, usize)> = query_counts
            .into_iter()
            .map(|(q, c)| (q.to_string(), c))
            .collect();
        top_queries.sort_by(|a, b| b.1.cmp(&a.1));
        drop(events);

        UsagePatterns {
            top_tools: self.tool_analytics(project).into_iter().take(5).collect(),
            top_queries: top_queries.into_iter().take(5).map(|(q, _)| q).collect(),
        }
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use ragd_providers::HashEmbedder;

    fn tracker() -> UsageTracker {
        UsageTracker::new(Arc::new(HashEmbedder::new(64)))
    }

    fn usage(tool: &str, query: Option<&str>, results: Option<usize>, score: Option<f32>) -> TrackUsageRequest {
        TrackUsageRequest {
            tool: tool.to_string(),
            query: query.map(str::to_string),
            result_count: results,
            top_score: score,
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_tool_analytics_aggregates_calls() {
        let tracker = tracker();
        tracker.track("demo", &usage("search", Some("a"), Some(10), Some(0.8)));
        tracker.track("demo", &usage("search", Some("b"), Some(4), Some(0.6)));
        tracker.track("demo", &usage("ask", Some("c"), Some(1), Some(0.9)));

        let analytics = tracker.tool_analytics("demo");
        assert_eq!(analytics[0].tool, "search");
        assert_eq!(analytics[0].calls, 2);
        assert!((analytics[0].avg_result_count - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_knowledge_gaps_catch_weak_queries() {
        let tracker = tracker();
        tracker.track("demo", &usage("search", Some("well answered"), Some(10), Some(0.9)));
        tracker.track("demo", &usage("search", Some("nothing found"), Some(0), None));
        tracker.track("demo", &usage("search", Some("weak match"), Some(3), Some(0.2)));

        let gaps = tracker.knowledge_gaps("demo");
        let queries: Vec<&str> = gaps.iter().map(|g| g.query.as_str()).collect();
        assert_eq!(queries, vec!["nothing found", "weak match"]);
    }

    #[tokio::test]
    async fn test_similar_queries_rank_by_overlap() {
        let tracker = tracker();
        tracker.track("demo", &usage("search", Some("token validation middleware"), Some(5), Some(0.8)));
        tracker.track("demo", &usage("search", Some("chart rendering colors"), Some(5), Some(0.8)));

        let similar = tracker
            .similar_queries("demo", "middleware token checks", 2)
            .await
            .unwrap();
        assert_eq!(similar[0].query, "token validation middleware");
        assert!(similar[0].score > similar[1].score);
    }
}
