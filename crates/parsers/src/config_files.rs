use once_cell::sync::Lazy;
use regex::Regex;

use ragd_protocol::{ChunkKind, ParsedChunk};

use crate::classify::language_for;
use crate::error::{ParserError, Result};

static YAML_TOP_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][\w.-]*\s*:").expect("static regex"));
static ENV_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^([A-Z][A-Z0-9_]*)=").expect("static regex"));

/// Splits configuration files into one chunk per logical section.
pub struct ConfigParser;

impl ConfigParser {
    pub fn parse(path: &str, content: &str) -> Result<Vec<ParsedChunk>> {
        if content.trim().is_empty() {
            return Err(ParserError::EmptyContent);
        }
        let language = language_for(path);
        let basename = std::path::Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("");

        let mut chunks = if basename.starts_with(".env") || language == "env" {
            Self::parse_env(content)
        } else {
            match language {
                "json" => Self::parse_json(content),
                "yaml" => Self::parse_yaml(content),
                // TOML, INI, HCL, CFG: one language-tagged chunk.
                _ => vec![single_chunk(content, language)],
            }
        };

        chunks.retain(ParsedChunk::is_substantial);
        Ok(chunks)
    }

    /// One chunk per top-level key. Line spans come from scanning the raw
    /// text for the key at nesting depth 1.
    fn parse_json(content: &str) -> Vec<ParsedChunk> {
        let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(content)
        else {
            return vec![single_chunk(content, "json")];
        };

        let lines: Vec<&str> = content.lines().collect();
        let mut chunks = Vec::new();
        for (key, value) in &map {
            let rendered = format!(
                "\"{}\": {}",
                key,
                serde_json::to_string_pretty(value).unwrap_or_default()
            );
            let start_line = lines
                .iter()
                .position(|line| line.trim_start().starts_with(&format!("\"{key}\"")))
                .map(|idx| idx + 1)
                .unwrap_or(1);
            let end_line = start_line + rendered.lines().count().saturating_sub(1);
            let mut chunk =
                ParsedChunk::new(rendered, start_line, end_line, "json", ChunkKind::Config);
            chunk.symbols.push(key.clone());
            chunks.push(chunk);
        }
        if chunks.is_empty() {
            chunks.push(single_chunk(content, "json"));
        }
        chunks
    }

    /// Split at zero-indented keys.
    fn parse_yaml(content: &str) -> Vec<ParsedChunk> {
        let lines: Vec<&str> = content.lines().collect();
        let boundaries: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| YAML_TOP_KEY.is_match(line))
            .map(|(idx, _)| idx)
            .collect();

        if boundaries.len() < 2 {
            return vec![single_chunk(content, "yaml")];
        }

        let mut chunks = Vec::new();
        for (i, &start) in boundaries.iter().enumerate() {
            let end = boundaries
                .get(i + 1)
                .map(|&next| next - 1)
                .unwrap_or(lines.len() - 1);
            let mut chunk = ParsedChunk::new(
                lines[start..=end].join("\n"),
                start + 1,
                end + 1,
                "yaml",
                ChunkKind::Config,
            );
            if let Some(key) = lines[start].split(':').next() {
                chunk.symbols.push(key.trim().to_string());
            }
            chunks.push(chunk);
        }
        chunks
    }

    /// Group by blank-line-separated blocks; variable names become symbols.
    fn parse_env(content: &str) -> Vec<ParsedChunk> {
        let lines: Vec<&str> = content.lines().collect();
        let mut chunks = Vec::new();
        let mut block_start: Option<usize> = None;

        let flush = |start: usize, end: usize, chunks: &mut Vec<ParsedChunk>| {
            let text = lines[start..=end].join("\n");
            let mut chunk = ParsedChunk::new(text, start + 1, end + 1, "env", ChunkKind::Config);
            for capture in ENV_VAR.captures_iter(&chunk.content) {
                chunk.symbols.push(capture[1].to_string());
            }
            chunks.push(chunk);
        };

        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                if let Some(start) = block_start.take() {
                    flush(start, idx - 1, &mut chunks);
                }
            } else if block_start.is_none() {
                block_start = Some(idx);
            }
        }
        if let Some(start) = block_start {
            flush(start, lines.len() - 1, &mut chunks);
        }
        chunks
    }
}

fn single_chunk(content: &str, language: &str) -> ParsedChunk {
    ParsedChunk::new(
        content,
        1,
        content.lines().count().max(1),
        language,
        ChunkKind::Config,
    )
}
