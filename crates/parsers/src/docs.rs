use once_cell::sync::Lazy;
use regex::Regex;

use ragd_protocol::{ChunkKind, ParsedChunk};

use crate::classify::language_for;
use crate::error::{ParserError, Result};

static ATX_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*$").expect("static regex"));
static RST_UNDERLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^[=\-~^"'`#*+]{3,}\s*$"#).expect("static regex"));

/// Splits documentation at headings; the heading text becomes `symbols[0]`.
pub struct DocsParser;

impl DocsParser {
    pub fn parse(path: &str, content: &str) -> Result<Vec<ParsedChunk>> {
        if content.trim().is_empty() {
            return Err(ParserError::EmptyContent);
        }
        let mut chunks = match language_for(path) {
            "rst" => Self::parse_rst(content),
            _ => Self::parse_markdown(content),
        };
        chunks.retain(ParsedChunk::is_substantial);
        Ok(chunks)
    }

    fn parse_markdown(content: &str) -> Vec<ParsedChunk> {
        let lines: Vec<&str> = content.lines().collect();
        let mut sections: Vec<(usize, Option<String>)> = Vec::new();
        let mut in_code_fence = false;

        for (idx, line) in lines.iter().enumerate() {
            if line.trim_start().starts_with("```") {
                in_code_fence = !in_code_fence;
                continue;
            }
            if in_code_fence {
                continue;
            }
            if let Some(capture) = ATX_HEADING.captures(line) {
                sections.push((idx, Some(capture[2].to_string())));
            }
        }

        if sections.is_empty() {
            return vec![doc_chunk(&lines, 0, lines.len() - 1, "markdown", None)];
        }

        let mut chunks = Vec::new();
        // Preamble before the first heading.
        if sections[0].0 > 0 {
            chunks.push(doc_chunk(&lines, 0, sections[0].0 - 1, "markdown", None));
        }
        for (i, (start, heading)) in sections.iter().enumerate() {
            let end = sections
                .get(i + 1)
                .map(|(next, _)| next - 1)
                .unwrap_or(lines.len() - 1);
            chunks.push(doc_chunk(&lines, *start, end, "markdown", heading.clone()));
        }
        chunks
    }

    /// RST titles are a text line underlined by punctuation of at least the
    /// same length.
    fn parse_rst(content: &str) -> Vec<ParsedChunk> {
        let lines: Vec<&str> = content.lines().collect();
        let mut sections: Vec<(usize, String)> = Vec::new();

        for idx in 1..lines.len() {
            let title = lines[idx - 1].trim();
            if !title.is_empty()
                && RST_UNDERLINE.is_match(lines[idx])
                && lines[idx].trim_end().len() >= title.len()
            {
                sections.push((idx - 1, title.to_string()));
            }
        }

        if sections.is_empty() {
            return vec![doc_chunk(&lines, 0, lines.len() - 1, "rst", None)];
        }

        let mut chunks = Vec::new();
        if sections[0].0 > 0 {
            chunks.push(doc_chunk(&lines, 0, sections[0].0 - 1, "rst", None));
        }
        for (i, (start, title)) in sections.iter().enumerate() {
            let end = sections
                .get(i + 1)
                .map(|(next, _)| next - 1)
                .unwrap_or(lines.len() - 1);
            chunks.push(doc_chunk(&lines, *start, end, "rst", Some(title.clone())));
        }
        chunks
    }
}

fn doc_chunk(
    lines: &[&str],
    start: usize,
    end: usize,
    language: &str,
    heading: Option<String>,
) -> ParsedChunk {
    let mut chunk = ParsedChunk::new(
        lines[start..=end].join("\n"),
        start + 1,
        end + 1,
        language,
        ChunkKind::Docs,
    );
    if let Some(heading) = heading {
        chunk.symbols.push(heading);
    }
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKDOWN: &str = "Intro paragraph before any heading.\n\n# Getting Started\n\nInstall the service and run it.\n\n## Configuration\n\nSet the environment variables listed below.\n\n```md\n# not a heading\n```\n\n## Deployment\n\nShip it behind a reverse proxy.\n";

    #[test]
    fn test_markdown_splits_at_atx_headings() {
        let chunks = DocsParser::parse("README.md", MARKDOWN).unwrap();
        let headings: Vec<&str> = chunks
            .iter()
            .filter_map(|c| c.symbols.first())
            .map(String::as_str)
            .collect();
        assert_eq!(headings, vec!["Getting Started", "Configuration", "Deployment"]);
    }

    #[test]
    fn test_markdown_preamble_has_no_symbol() {
        let chunks = DocsParser::parse("README.md", MARKDOWN).unwrap();
        assert!(chunks[0].symbols.is_empty());
        assert!(chunks[0].content.starts_with("Intro paragraph"));
    }

    #[test]
    fn test_fenced_headings_are_ignored() {
        let chunks = DocsParser::parse("README.md", MARKDOWN).unwrap();
        assert!(!chunks
            .iter()
            .any(|c| c.symbols.first().map(String::as_str) == Some("not a heading")));
    }

    #[test]
    fn test_rst_underlined_titles() {
        let content = "Overview\n========\n\nThe retrieval engine in short.\n\nArchitecture\n------------\n\nFour subsystems working together.\n";
        let chunks = DocsParser::parse("docs/index.rst", content).unwrap();
        let titles: Vec<&str> = chunks
            .iter()
            .filter_map(|c| c.symbols.first())
            .map(String::as_str)
            .collect();
        assert_eq!(titles, vec!["Overview", "Architecture"]);
    }
}
