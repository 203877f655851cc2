use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::{Node, Parser};

use ragd_protocol::{ChunkKind, ParsedChunk};

use crate::classify::language_for;
use crate::error::{ParserError, Result};

/// Fallback bucket size when no structural boundaries are found.
const MAX_BUCKET_CHARS: usize = 1000;

/// Variable declarations shorter than this (and without a function body) are
/// not worth their own chunk.
const SIGNIFICANT_DECL_CHARS: usize = 60;

/// Safety-net symbol extraction, applied to every chunk regardless of how it
/// was produced.
static SYMBOL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)\b(?:fn|def|func|function|class|struct|interface|trait|enum|impl|module|object|type)\s+([A-Za-z_][A-Za-z0-9_]*)",
    )
    .expect("static regex")
});

static IMPORT_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?m)^\s*import\s+.*?from\s+['"]([^'"]+)['"]"#,
        r#"(?m)^\s*import\s+['"]([^'"]+)['"]"#,
        r#"require\(\s*['"]([^'"]+)['"]\s*\)"#,
        r"(?m)^\s*from\s+([\w.]+)\s+import",
        r"(?m)^\s*import\s+([\w.]+)\s*$",
        r"(?m)^\s*use\s+([A-Za-z_][\w:]*)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

static PY_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:async\s+)?def\s+\w+|^class\s+\w+").expect("static regex"));
static GO_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^func\s|^type\s+\w+\s+(?:struct|interface)").expect("static regex"));
static RUST_BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:pub(?:\([^)]*\))?\s+)?(?:fn|struct|enum|trait|impl|mod)\s").expect("static regex")
});
static RUBY_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:def|class|module)\s+\w+").expect("static regex"));
static BRACE_BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s{0,4}(?:(?:public|private|protected|internal|static|final|abstract|virtual|override|inline|extern|fun|func)\s+)*(?:class|struct|interface|enum|namespace|object)\s+\w+|^\s{0,4}(?:(?:public|private|protected|internal|static|final|abstract|virtual|override)\s+)+[\w<>\[\]*&:,\s]+\([^;]*\)\s*\{?\s*$",
    )
    .expect("static regex")
});

/// Parses source files into chunks: an AST pass for TS/JS, a regex boundary
/// pass for every other language.
pub struct CodeParser;

impl CodeParser {
    pub fn parse(path: &str, content: &str) -> Result<Vec<ParsedChunk>> {
        if content.trim().is_empty() {
            return Err(ParserError::EmptyContent);
        }
        let language = language_for(path);

        let mut chunks = match language {
            "typescript" | "javascript" => match Self::parse_ast(path, content, language) {
                Ok(chunks) if !chunks.is_empty() => chunks,
                Ok(_) => Self::parse_regex(content, language),
                Err(err) => {
                    log::warn!("AST parse failed for {path}, falling back to regex: {err}");
                    Self::parse_regex(content, language)
                }
            },
            _ => Self::parse_regex(content, language),
        };

        chunks.retain(ParsedChunk::is_substantial);
        Self::apply_safety_nets(content, &mut chunks);
        Ok(chunks)
    }

    // -- AST pass (TS/JS) ---------------------------------------------------

    fn ts_language(path: &str, language: &str) -> tree_sitter::Language {
        if language == "javascript" {
            tree_sitter_javascript::LANGUAGE.into()
        } else if path.ends_with(".tsx") {
            tree_sitter_typescript::LANGUAGE_TSX.into()
        } else {
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
        }
    }

    fn parse_ast(path: &str, content: &str, language: &str) -> Result<Vec<ParsedChunk>> {
        let mut parser = Parser::new();
        parser
            .set_language(&Self::ts_language(path, language))
            .map_err(|e| ParserError::TreeSitter(e.to_string()))?;
        let tree = parser
            .parse(content, None)
            .ok_or_else(|| ParserError::Parse("tree-sitter returned no tree".into()))?;

        let root = tree.root_node();
        let mut chunks = Vec::new();
        let mut imports = Vec::new();

        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            // `export default class X {}` wraps the declaration.
            let node = if child.kind() == "export_statement" {
                child
                    .child_by_field_name("declaration")
                    .or_else(|| declaration_child(child))
                    .unwrap_or(child)
            } else {
                child
            };

            if child.kind() == "import_statement" {
                if let Some(source) = node_import_source(content, child) {
                    imports.push(source);
                }
                continue;
            }

            let significant = match node.kind() {
                "class_declaration" | "abstract_class_declaration" => true,
                "function_declaration" | "generator_function_declaration" => true,
                "interface_declaration" | "type_alias_declaration" | "enum_declaration" => true,
                "lexical_declaration" | "variable_declaration" => {
                    let text = node_text(content, &child);
                    text.contains("=>")
                        || text.contains("function")
                        || text.len() >= SIGNIFICANT_DECL_CHARS
                }
                _ => false,
            };
            if !significant {
                continue;
            }

            // Keep the export wrapper in the chunk text so the content reads
            // like the source does.
            let mut chunk = node_to_chunk(content, &child, language);
            if let Some(name) = declaration_name(content, node) {
                chunk.symbols.push(name);
            }
            chunks.push(chunk);
        }

        if let Some(first) = chunks.first_mut() {
            first.imports = imports;
        }
        Ok(chunks)
    }

    // -- Regex pass (all other languages) -----------------------------------

    fn boundary_regex(language: &str) -> Option<&'static Regex> {
        match language {
            "python" => Some(&PY_BOUNDARY),
            "go" => Some(&GO_BOUNDARY),
            "rust" => Some(&RUST_BOUNDARY),
            "ruby" => Some(&RUBY_BOUNDARY),
            "java" | "c" | "cpp" | "csharp" | "php" | "swift" | "kotlin" | "scala"
            | "typescript" | "javascript" => Some(&BRACE_BOUNDARY),
            _ => None,
        }
    }

    fn parse_regex(content: &str, language: &str) -> Vec<ParsedChunk> {
        let lines: Vec<&str> = content.lines().collect();
        let boundaries: Vec<usize> = Self::boundary_regex(language)
            .map(|re| {
                lines
                    .iter()
                    .enumerate()
                    .filter(|(_, line)| re.is_match(line))
                    .map(|(idx, _)| idx)
                    .collect()
            })
            .unwrap_or_default();

        if boundaries.len() >= 2 {
            Self::chunk_between_boundaries(&lines, &boundaries, language)
        } else {
            Self::chunk_buckets(&lines, language)
        }
    }

    fn chunk_between_boundaries(
        lines: &[&str],
        boundaries: &[usize],
        language: &str,
    ) -> Vec<ParsedChunk> {
        let mut chunks = Vec::new();

        // Preamble (imports, module docs) before the first boundary.
        if boundaries[0] > 0 {
            chunks.push(lines_to_chunk(lines, 0, boundaries[0] - 1, language));
        }

        for (i, &start) in boundaries.iter().enumerate() {
            let end = boundaries
                .get(i + 1)
                .map(|&next| next - 1)
                .unwrap_or(lines.len() - 1);
            chunks.push(lines_to_chunk(lines, start, end, language));
        }
        chunks
    }

    fn chunk_buckets(lines: &[&str], language: &str) -> Vec<ParsedChunk> {
        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut size = 0usize;

        for (idx, line) in lines.iter().enumerate() {
            size += line.len() + 1;
            if size >= MAX_BUCKET_CHARS {
                chunks.push(lines_to_chunk(lines, start, idx, language));
                start = idx + 1;
                size = 0;
            }
        }
        if start < lines.len() {
            chunks.push(lines_to_chunk(lines, start, lines.len() - 1, language));
        }
        chunks
    }

    // -- Safety nets --------------------------------------------------------

    fn apply_safety_nets(content: &str, chunks: &mut [ParsedChunk]) {
        for chunk in chunks.iter_mut() {
            for capture in SYMBOL_RE.captures_iter(&chunk.content) {
                let symbol = capture[1].to_string();
                if !chunk.symbols.contains(&symbol) {
                    chunk.symbols.push(symbol);
                }
            }
        }

        if let Some(first) = chunks.first_mut() {
            if first.imports.is_empty() {
                for re in IMPORT_RES.iter() {
                    for capture in re.captures_iter(content) {
                        let import = capture[1].to_string();
                        if !first.imports.contains(&import) {
                            first.imports.push(import);
                        }
                    }
                }
            }
        }
    }
}

fn node_text<'a>(content: &'a str, node: &Node) -> &'a str {
    &content[node.start_byte()..node.end_byte()]
}

fn node_to_chunk(content: &str, node: &Node, language: &str) -> ParsedChunk {
    ParsedChunk::new(
        node_text(content, node),
        node.start_position().row + 1,
        node.end_position().row + 1,
        language,
        ChunkKind::Code,
    )
}

fn declaration_child(node: Node) -> Option<Node> {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).find(|child| {
        matches!(
            child.kind(),
            "class_declaration"
                | "abstract_class_declaration"
                | "function_declaration"
                | "generator_function_declaration"
                | "interface_declaration"
                | "type_alias_declaration"
                | "enum_declaration"
                | "lexical_declaration"
                | "variable_declaration"
        )
    });
    found
}

fn declaration_name(content: &str, node: Node) -> Option<String> {
    if let Some(name) = node.child_by_field_name("name") {
        return Some(node_text(content, &name).to_string());
    }
    // Variable declarations: name sits on the declarator.
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "variable_declarator" {
            if let Some(name) = child.child_by_field_name("name") {
                return Some(node_text(content, &name).to_string());
            }
        }
    }
    None
}

fn node_import_source(content: &str, node: Node) -> Option<String> {
    let source = node.child_by_field_name("source")?;
    Some(node_text(content, &source).trim_matches(['"', '\'']).to_string())
}

fn lines_to_chunk(lines: &[&str], start: usize, end: usize, language: &str) -> ParsedChunk {
    ParsedChunk::new(
        lines[start..=end].join("\n"),
        start + 1,
        end + 1,
        language,
        ChunkKind::Code,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TS_SOURCE: &str = r#"import { Router } from 'express';
import cache from './cache';

export interface TokenClaims {
    sub: string;
    exp: number;
}

export class AuthService {
    validate(header: string): TokenClaims {
        return decode(header);
    }
}

export function middleware(req: Request, res: Response) {
    return auth.validate(req.headers.authorization);
}

const ROUTES = buildRouter({ prefix: '/api', handlers: [middleware] });
"#;

    #[test]
    fn test_ts_ast_one_chunk_per_declaration() {
        let chunks = CodeParser::parse("src/auth.ts", TS_SOURCE).unwrap();
        let symbols: Vec<&str> = chunks
            .iter()
            .filter_map(|c| c.symbols.first())
            .map(String::as_str)
            .collect();
        assert!(symbols.contains(&"TokenClaims"));
        assert!(symbols.contains(&"AuthService"));
        assert!(symbols.contains(&"middleware"));
        assert!(symbols.contains(&"ROUTES"));
    }

    #[test]
    fn test_ts_imports_on_first_chunk_only() {
        let chunks = CodeParser::parse("src/auth.ts", TS_SOURCE).unwrap();
        assert_eq!(chunks[0].imports, vec!["express", "./cache"]);
        for chunk in &chunks[1..] {
            assert!(chunk.imports.is_empty());
        }
    }

    #[test]
    fn test_line_spans_are_one_indexed_and_ordered() {
        let chunks = CodeParser::parse("src/auth.ts", TS_SOURCE).unwrap();
        for chunk in &chunks {
            assert!(chunk.start_line >= 1);
            assert!(chunk.start_line <= chunk.end_line);
        }
    }

    #[test]
    fn test_python_regex_boundaries() {
        let source = "import os\n\nclass Store:\n    def get(self):\n        return 1\n\ndef main():\n    run(Store())\n";
        let chunks = CodeParser::parse("app/store.py", source).unwrap();
        assert!(chunks.len() >= 2);
        let all_symbols: Vec<String> = chunks.iter().flat_map(|c| c.symbols.clone()).collect();
        assert!(all_symbols.contains(&"Store".to_string()));
        assert!(all_symbols.contains(&"main".to_string()));
        assert_eq!(chunks[0].imports, vec!["os"]);
    }

    #[test]
    fn test_bucket_fallback_for_boundaryless_content() {
        let line = "x = compute(1, 2, 3)  # some expression\n";
        let source = line.repeat(60);
        let chunks = CodeParser::parse("script.py", &source).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.len() <= MAX_BUCKET_CHARS + line.len());
        }
    }

    #[test]
    fn test_tiny_chunks_are_dropped() {
        let source = "export const A = 1;\n";
        // A single short declaration ends up below the substantial threshold
        // only if under 10 non-whitespace chars; this one survives.
        let chunks = CodeParser::parse("src/a.ts", source).unwrap();
        for chunk in &chunks {
            assert!(chunk.is_substantial());
        }
    }

    #[test]
    fn test_go_boundaries() {
        let source = "package main\n\nimport \"fmt\"\n\nfunc Handler(w http.ResponseWriter) {\n\tfmt.Println(\"ok\")\n}\n\ntype Server struct {\n\tAddr string\n}\n";
        let chunks = CodeParser::parse("cmd/server.go", source).unwrap();
        let symbols: Vec<String> = chunks.iter().flat_map(|c| c.symbols.clone()).collect();
        assert!(symbols.contains(&"Handler".to_string()));
        assert!(symbols.contains(&"Server".to_string()));
    }
}
