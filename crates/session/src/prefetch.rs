use std::sync::Arc;

use ragd_protocol::api::SearchRequest;
use ragd_protocol::SessionContext;
use ragd_retrieval::SearchEngine;

/// How many derived queries a prefetch round warms.
const PREFETCH_QUERIES: usize = 3;

/// Background predictive loader.
///
/// Derives the queries a session is likely to run next from its activity and
/// warms the embedding and search caches. Fire-and-forget: failures are
/// swallowed with a debug log, the caller never waits.
pub struct PredictiveLoader {
    engine: Arc<SearchEngine>,
}

impl PredictiveLoader {
    pub fn new(engine: Arc<SearchEngine>) -> Self {
        Self { engine }
    }

    /// Likely-next queries: trailing queries first, then active features,
    /// then stems of recently touched files.
    fn candidate_queries(context: &SessionContext) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::new();
        for query in context.recent_queries.iter().rev().take(PREFETCH_QUERIES) {
            candidates.push(query.clone());
        }
        for feature in &context.active_features {
            candidates.push(feature.clone());
        }
        for file in context.current_files.iter().rev().take(PREFETCH_QUERIES) {
            if let Some(stem) = std::path::Path::new(file)
                .file_stem()
                .and_then(|s| s.to_str())
            {
                candidates.push(stem.replace(['_', '-'], " "));
            }
        }
        candidates.dedup();
        candidates.truncate(PREFETCH_QUERIES);
        candidates
    }

    /// Spawn-and-drop cache warming for one session snapshot.
    pub fn spawn(&self, context: SessionContext) {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let project = context.project.clone();
            for query in Self::candidate_queries(&context) {
                let request = SearchRequest {
                    query: query.clone(),
                    limit: 10,
                    collection: None,
                    score_threshold: None,
                };
                if let Err(err) = engine.search(&project, &request).await {
                    log::debug!("prefetch '{query}' skipped: {err}");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_candidate_queries_prefer_recent_activity() {
        let mut context = SessionContext::new("s".into(), "demo".into(), Utc::now());
        context.record_query("how does auth work");
        context.record_query("token refresh flow");
        context.touch_file("src/token_store.ts");

        let candidates = PredictiveLoader::candidate_queries(&context);
        assert_eq!(candidates[0], "token refresh flow");
        assert!(candidates.contains(&"how does auth work".to_string()));
        assert!(candidates.len() <= PREFETCH_QUERIES);
    }

    #[test]
    fn test_file_stems_become_queries() {
        let mut context = SessionContext::new("s".into(), "demo".into(), Utc::now());
        context.touch_file("src/token_store.ts");

        let candidates = PredictiveLoader::candidate_queries(&context);
        assert_eq!(candidates, vec!["token store"]);
    }
}
