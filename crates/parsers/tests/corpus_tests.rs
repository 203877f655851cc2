//! Cross-parser invariants over a small polyglot corpus.

use ragd_protocol::{point_id, ChunkKind, FileKind};
use ragd_parsers::{classify_file, extract_edges, ParserRegistry};

const CORPUS: &[(&str, &str)] = &[
    (
        "src/api/routes.ts",
        "import { Router } from 'express';\nimport { recall } from '../memory/service';\n\nexport function registerRoutes(router: Router) {\n    router.post('/api/memory/recall', recall);\n}\n\nexport class RouteTable {\n    routes: string[] = [];\n}\n",
    ),
    (
        "app/workers/tasks.py",
        "from celery import shared_task\n\n@shared_task\ndef reindex_project(project_id):\n    run_reindex(project_id)\n\nclass TaskRouter(BaseRouter):\n    def route(self, name):\n        return name\n",
    ),
    (
        "cmd/server/main.go",
        "package main\n\nimport (\n\t\"net/http\"\n)\n\nfunc main() {\n\thttp.ListenAndServe(\":8080\", nil)\n}\n\ntype Config struct {\n\tAddr string\n}\n",
    ),
    (
        "deploy/config.yaml",
        "server:\n  port: 8080\n\nembedding:\n  provider: bge-m3\n  url: http://embeddings:8080\n",
    ),
    (
        "docs/architecture.md",
        "# Architecture\n\nFour subsystems share one vector backend.\n\n## Retrieval\n\nSearch fans out and fuses.\n",
    ),
    (
        "api/schema.graphql",
        "type Query {\n  recall(query: String!): [Memory!]!\n}\n\ntype Memory {\n  id: ID!\n  content: String!\n}\n",
    ),
];

#[test]
fn test_corpus_parses_with_invariants() {
    for (path, source) in CORPUS {
        let chunks = ParserRegistry::parse(path, source).unwrap();
        assert!(!chunks.is_empty(), "{path} produced no chunks");
        for chunk in &chunks {
            assert!(chunk.start_line >= 1, "{path}");
            assert!(chunk.start_line <= chunk.end_line, "{path}");
            assert!(chunk.is_substantial(), "{path}: {:?}", chunk.content);
        }
    }
}

#[test]
fn test_corpus_kinds_follow_classification() {
    for (path, source) in CORPUS {
        let expected = match classify_file(path) {
            FileKind::Code => ChunkKind::Code,
            FileKind::Config => ChunkKind::Config,
            FileKind::Docs => ChunkKind::Docs,
            FileKind::Contract => ChunkKind::Contract,
            FileKind::Unknown => continue,
        };
        for chunk in ParserRegistry::parse(path, source).unwrap() {
            assert_eq!(chunk.kind, expected, "{path}");
        }
    }
}

#[test]
fn test_point_ids_stable_across_reparse() {
    for (path, source) in CORPUS {
        let first: Vec<String> = ParserRegistry::parse(path, source)
            .unwrap()
            .iter()
            .map(|c| point_id("demo", path, c))
            .collect();
        let second: Vec<String> = ParserRegistry::parse(path, source)
            .unwrap()
            .iter()
            .map(|c| point_id("demo", path, c))
            .collect();
        assert_eq!(first, second, "{path}");
    }
}

#[test]
fn test_edges_resolve_relative_imports_across_corpus() {
    let (path, source) = CORPUS[0];
    let edges = extract_edges(source, path);

    let targets: Vec<&str> = edges.iter().map(|e| e.to_file.as_str()).collect();
    assert!(targets.contains(&"express"), "external kept verbatim");
    assert!(
        targets.contains(&"src/memory/service.ts"),
        "relative import resolved to project-root path: {targets:?}"
    );
    assert!(edges.iter().all(|e| !e.from_file.is_empty() && !e.to_file.is_empty()));
}
