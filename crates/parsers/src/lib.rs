//! Parser registry: routes files to the contract, config, docs or code
//! parser and extracts dependency edges.
//!
//! A parse failure never aborts indexing; the indexer logs and skips the
//! file. Unknown files classify as `Unknown` and produce no chunks.

pub mod classify;
pub mod code;
pub mod config_files;
pub mod contract;
pub mod docs;
pub mod edges;
pub mod error;

pub use classify::{classify_file, language_for};
pub use edges::extract_edges;
pub use error::{ParserError, Result};

use ragd_protocol::{FileKind, ParsedChunk};

/// Facade over the per-kind parsers.
pub struct ParserRegistry;

impl ParserRegistry {
    /// Route by extension/basename, priority contract → config → docs → code.
    pub fn classify(path: &str) -> FileKind {
        classify_file(path)
    }

    /// Parse a file into chunks. Unknown files yield an empty set.
    pub fn parse(path: &str, content: &str) -> Result<Vec<ParsedChunk>> {
        match classify_file(path) {
            FileKind::Contract => contract::ContractParser::parse(path, content),
            FileKind::Config => config_files::ConfigParser::parse(path, content),
            FileKind::Docs => docs::DocsParser::parse(path, content),
            FileKind::Code => code::CodeParser::parse(path, content),
            FileKind::Unknown => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragd_protocol::ChunkKind;

    #[test]
    fn test_registry_routes_by_kind() {
        let chunks = ParserRegistry::parse("README.md", "# Title\n\nSome body text here.\n").unwrap();
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::Docs));

        let chunks = ParserRegistry::parse(
            "src/main.py",
            "def main():\n    print('hello')\n\ndef other():\n    pass\n",
        )
        .unwrap();
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::Code));
    }

    #[test]
    fn test_unknown_files_produce_nothing() {
        let chunks = ParserRegistry::parse("assets/logo.svg", "<svg></svg>").unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_every_chunk_honours_invariants() {
        let sources: &[(&str, &str)] = &[
            ("src/a.ts", "export function parse(s: string) { return s.trim(); }\n"),
            ("config.yaml", "server:\n  port: 1\n\nlogging:\n  level: info\n"),
            ("README.md", "# One\n\ncontent body\n\n# Two\n\nmore content\n"),
            ("api.proto", "message A {\n  string q = 1;\n}\nmessage B {\n  string r = 1;\n}\n"),
        ];
        for (path, source) in sources {
            for chunk in ParserRegistry::parse(path, source).unwrap() {
                assert!(chunk.start_line <= chunk.end_line, "{path}");
                assert!(chunk.is_substantial(), "{path}");
            }
        }
    }
}
