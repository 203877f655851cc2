use std::sync::Arc;

use serde_json::{json, Map, Value};

use ragd_parsers::docs::DocsParser;
use ragd_protocol::{collections, point_id, ApiError, Result};
use ragd_providers::EmbeddingProvider;
use ragd_vector_store::{Point, VectorStore};

/// Thin Confluence Cloud REST client plus space indexing.
///
/// Pages are flattened to text, split by the docs parser and committed to
/// `{project}_confluence`. Unconfigured deployments get a clean error rather
/// than a connection failure.
pub struct ConfluenceBridge {
    http: reqwest::Client,
    base_url: String,
    email: String,
    api_token: String,
}

impl ConfluenceBridge {
    pub fn new(base_url: &str, email: &str, api_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            email: email.to_string(),
            api_token: api_token.to_string(),
        }
    }

    pub fn from_config(config: &crate::config::AppConfig) -> Option<Self> {
        match (
            &config.confluence_base_url,
            &config.confluence_email,
            &config.confluence_api_token,
        ) {
            (Some(url), Some(email), Some(token)) => Some(Self::new(url, email, token)),
            _ => None,
        }
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .basic_auth(&self.email, Some(&self.api_token))
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::external("confluence", e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ApiError::Auth("confluence credentials rejected".into()));
        }
        if !status.is_success() {
            return Err(ApiError::external(
                "confluence",
                format!("request returned {status}"),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| ApiError::external("confluence", format!("invalid response: {e}")))
    }

    pub async fn status(&self) -> Result<Value> {
        let spaces = self.get("/wiki/rest/api/space", &[("limit", "1")]).await?;
        Ok(json!({
            "configured": true,
            "reachable": true,
            "spacesVisible": spaces["size"].as_u64().unwrap_or(0),
        }))
    }

    pub async fn spaces(&self) -> Result<Vec<Value>> {
        let response = self.get("/wiki/rest/api/space", &[("limit", "50")]).await?;
        Ok(response["results"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|space| {
                json!({
                    "key": space["key"],
                    "name": space["name"],
                })
            })
            .collect())
    }

    /// CQL text search across pages.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<Value>> {
        let cql = format!("type=page and text ~ \"{}\"", query.replace('"', ""));
        let limit = limit.to_string();
        let response = self
            .get(
                "/wiki/rest/api/content/search",
                &[("cql", cql.as_str()), ("limit", limit.as_str())],
            )
            .await?;
        Ok(response["results"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|page| {
                json!({
                    "id": page["id"],
                    "title": page["title"],
                    "url": page["_links"]["webui"],
                })
            })
            .collect())
    }

    /// Fetch a space's pages and index them into `{project}_confluence`.
    pub async fn index_space(
        &self,
        project: &str,
        space_key: &str,
        store: &Arc<dyn VectorStore>,
        embedder: &Arc<dyn EmbeddingProvider>,
    ) -> Result<usize> {
        let collection = collections::confluence(project);
        store
            .ensure_collection(&collection, embedder.dimension(), false)
            .await?;

        let response = self
            .get(
                "/wiki/rest/api/content",
                &[
                    ("spaceKey", space_key),
                    ("type", "page"),
                    ("expand", "body.storage"),
                    ("limit", "100"),
                ],
            )
            .await?;

        let mut indexed = 0usize;
        for page in response["results"].as_array().into_iter().flatten() {
            let title = page["title"].as_str().unwrap_or("untitled");
            let body = page["body"]["storage"]["value"].as_str().unwrap_or("");
            let text = strip_tags(body);
            if text.trim().is_empty() {
                continue;
            }

            // Render as markdown-ish so the docs parser can section it.
            let document = format!("# {title}\n\n{text}");
            let pseudo_path = format!("confluence/{space_key}/{title}.md");
            let chunks = match DocsParser::parse(&pseudo_path, &document) {
                Ok(chunks) => chunks,
                Err(err) => {
                    log::warn!("confluence page '{title}' skipped: {err}");
                    continue;
                }
            };

            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let vectors = embedder.embed_batch(&texts).await?;

            let mut points = Vec::new();
            for (chunk, vector) in chunks.iter().zip(vectors) {
                let id = point_id(project, &pseudo_path, chunk);
                let mut payload = match serde_json::to_value(chunk)? {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                payload.insert("project".into(), json!(project));
                payload.insert("file".into(), json!(pseudo_path));
                payload.insert("chunkType".into(), json!("docs"));
                payload.insert("language".into(), json!("confluence"));
                payload.insert("space".into(), json!(space_key));
                payload.insert("pageId".into(), page["id"].clone());
                points.push(Point::new(id, vector, payload));
            }
            indexed += points.len();
            store.upsert(&collection, points).await?;
        }
        Ok(indexed)
    }
}

/// Good-enough storage-format flattening: drop tags, keep text.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
