use once_cell::sync::Lazy;
use regex::Regex;

use ragd_protocol::{ChunkKind, ParsedChunk};

use crate::classify::language_for;
use crate::error::{ParserError, Result};

static PROTO_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(message|service|enum|rpc)\s+(\w+)").expect("static regex"));
static GRAPHQL_BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(type|input|enum|interface|union|scalar|query|mutation|subscription)\s+(\w+)?",
    )
    .expect("static regex")
});
static OPENAPI_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s{2}(/[^\s:]*):").expect("static regex"));

/// Splits API contracts (proto, GraphQL, OpenAPI) into per-definition chunks.
pub struct ContractParser;

impl ContractParser {
    pub fn parse(path: &str, content: &str) -> Result<Vec<ParsedChunk>> {
        if content.trim().is_empty() {
            return Err(ParserError::EmptyContent);
        }
        let language = language_for(path);
        let mut chunks = match language {
            "proto" => Self::split_at(content, &PROTO_BOUNDARY, "proto"),
            "graphql" => Self::split_at(content, &GRAPHQL_BOUNDARY, "graphql"),
            // OpenAPI documents (yaml/json basenames routed here by classify).
            _ if Self::looks_like_openapi(content) => Self::split_openapi(content, language),
            _ => Self::split_at(content, &GRAPHQL_BOUNDARY, language),
        };
        chunks.retain(ParsedChunk::is_substantial);
        Ok(chunks)
    }

    fn looks_like_openapi(content: &str) -> bool {
        content.contains("openapi:")
            || content.contains("swagger:")
            || content.contains("\"openapi\"")
            || content.contains("\"swagger\"")
    }

    fn split_at(content: &str, boundary: &Regex, language: &str) -> Vec<ParsedChunk> {
        let lines: Vec<&str> = content.lines().collect();
        let boundaries: Vec<(usize, String)> = lines
            .iter()
            .enumerate()
            .filter_map(|(idx, line)| {
                boundary
                    .captures(line)
                    .map(|c| (idx, c.get(2).map(|m| m.as_str().to_string()).unwrap_or_default()))
            })
            .collect();

        if boundaries.is_empty() {
            return vec![whole_file(content, language)];
        }

        let mut chunks = Vec::new();
        if boundaries[0].0 > 0 {
            chunks.push(section(&lines, 0, boundaries[0].0 - 1, language, None));
        }
        for (i, (start, name)) in boundaries.iter().enumerate() {
            let end = boundaries
                .get(i + 1)
                .map(|(next, _)| next - 1)
                .unwrap_or(lines.len() - 1);
            let symbol = (!name.is_empty()).then(|| name.clone());
            chunks.push(section(&lines, *start, end, language, symbol));
        }
        chunks
    }

    /// Split at top-level path entries under `paths:`.
    fn split_openapi(content: &str, language: &str) -> Vec<ParsedChunk> {
        let lines: Vec<&str> = content.lines().collect();
        let boundaries: Vec<(usize, String)> = lines
            .iter()
            .enumerate()
            .filter_map(|(idx, line)| {
                OPENAPI_PATH
                    .captures(line)
                    .map(|c| (idx, c[1].to_string()))
            })
            .collect();

        if boundaries.is_empty() {
            return vec![whole_file(content, language)];
        }

        let mut chunks = Vec::new();
        // Everything above the first path (info, servers, components header).
        if boundaries[0].0 > 0 {
            chunks.push(section(&lines, 0, boundaries[0].0 - 1, language, None));
        }
        for (i, (start, path)) in boundaries.iter().enumerate() {
            let end = boundaries
                .get(i + 1)
                .map(|(next, _)| next - 1)
                .unwrap_or(lines.len() - 1);
            chunks.push(section(&lines, *start, end, language, Some(path.clone())));
        }
        chunks
    }
}

fn whole_file(content: &str, language: &str) -> ParsedChunk {
    ParsedChunk::new(
        content,
        1,
        content.lines().count().max(1),
        language,
        ChunkKind::Contract,
    )
}

fn section(
    lines: &[&str],
    start: usize,
    end: usize,
    language: &str,
    symbol: Option<String>,
) -> ParsedChunk {
    let mut chunk = ParsedChunk::new(
        lines[start..=end].join("\n"),
        start + 1,
        end + 1,
        language,
        ChunkKind::Contract,
    );
    if let Some(symbol) = symbol {
        chunk.symbols.push(symbol);
    }
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proto_splits_at_messages_and_services() {
        let content = "syntax = \"proto3\";\n\nmessage SearchRequest {\n  string query = 1;\n}\n\nmessage SearchResponse {\n  repeated string files = 1;\n}\n\nservice Retrieval {\n  rpc Search(SearchRequest) returns (SearchResponse);\n}\n";
        let chunks = ContractParser::parse("api/retrieval.proto", content).unwrap();
        let symbols: Vec<&str> = chunks
            .iter()
            .filter_map(|c| c.symbols.first())
            .map(String::as_str)
            .collect();
        assert!(symbols.contains(&"SearchRequest"));
        assert!(symbols.contains(&"SearchResponse"));
        assert!(symbols.contains(&"Retrieval"));
    }

    #[test]
    fn test_graphql_type_boundaries() {
        let content = "type Memory {\n  id: ID!\n  content: String!\n}\n\ninput RememberInput {\n  content: String!\n}\n\nenum MemoryType {\n  DECISION\n  INSIGHT\n}\n";
        let chunks = ContractParser::parse("schema.graphql", content).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].symbols[0], "Memory");
        assert_eq!(chunks[1].symbols[0], "RememberInput");
        assert_eq!(chunks[2].symbols[0], "MemoryType");
    }

    #[test]
    fn test_openapi_splits_per_path() {
        let content = "openapi: 3.0.0\ninfo:\n  title: ragd\npaths:\n  /api/search:\n    post:\n      summary: semantic search\n  /api/memory:\n    post:\n      summary: store a memory\n";
        let chunks = ContractParser::parse("openapi.yaml", content).unwrap();
        let paths: Vec<&str> = chunks
            .iter()
            .filter_map(|c| c.symbols.first())
            .map(String::as_str)
            .collect();
        assert_eq!(paths, vec!["/api/search", "/api/memory"]);
    }
}
