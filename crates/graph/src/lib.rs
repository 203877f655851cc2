//! Per-project dependency graph over files.
//!
//! Edges come from the parser's edge extractor; nodes are project-relative
//! file paths (or opaque package names for externals). The store is indexed
//! by both endpoints so expansion can follow edges in either direction.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::RwLock;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use ragd_protocol::{EdgeKind, GraphEdge};

/// Graph for one project: a petgraph digraph plus a file → node index.
#[derive(Default)]
struct ProjectGraph {
    graph: DiGraph<String, EdgeKind>,
    node_index: HashMap<String, NodeIndex>,
    /// Raw edges, kept for persistence and symbol-level queries.
    edges: Vec<GraphEdge>,
}

impl ProjectGraph {
    fn node(&mut self, file: &str) -> NodeIndex {
        if let Some(&idx) = self.node_index.get(file) {
            return idx;
        }
        let idx = self.graph.add_node(file.to_string());
        self.node_index.insert(file.to_string(), idx);
        idx
    }

    fn insert(&mut self, edge: GraphEdge) {
        let from = self.node(&edge.from_file);
        let to = self.node(&edge.to_file);
        // One structural edge per (from, to, kind); raw edges keep symbols.
        let duplicate = self
            .graph
            .edges_connecting(from, to)
            .any(|e| *e.weight() == edge.edge_type);
        if !duplicate {
            self.graph.add_edge(from, to, edge.edge_type);
        }
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }

    /// Breadth-first expansion over undirected neighbours.
    fn expand(&self, seeds: &[String], hops: usize) -> Vec<String> {
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<(NodeIndex, usize)> = VecDeque::new();

        for seed in seeds {
            if let Some(&idx) = self.node_index.get(seed) {
                visited.insert(idx);
                queue.push_back((idx, 0));
            }
        }

        let mut expanded = Vec::new();
        while let Some((idx, depth)) = queue.pop_front() {
            if depth >= hops {
                continue;
            }
            for neighbor in self.graph.neighbors_undirected(idx) {
                if visited.insert(neighbor) {
                    expanded.push(self.graph[neighbor].clone());
                    queue.push_back((neighbor, depth + 1));
                }
            }
        }
        expanded
    }
}

/// Snapshot stats for one project's graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
}

#[derive(Serialize, Deserialize)]
struct PersistedGraph {
    project: String,
    edges: Vec<GraphEdge>,
}

/// Thread-safe multi-project graph store.
pub struct GraphStore {
    projects: RwLock<HashMap<String, ProjectGraph>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert_edges(&self, project: &str, edges: Vec<GraphEdge>) {
        let mut projects = self.projects.write().expect("graph lock");
        let graph = projects.entry(project.to_string()).or_default();
        for edge in edges {
            if edge.is_complete() {
                graph.insert(edge);
            }
        }
    }

    /// Replace a project's graph wholesale (used by reindex).
    pub fn replace_project(&self, project: &str, edges: Vec<GraphEdge>) {
        let mut projects = self.projects.write().expect("graph lock");
        projects.insert(project.to_string(), ProjectGraph::default());
        drop(projects);
        self.insert_edges(project, edges);
    }

    /// Files connected to the seeds within `hops`, excluding the seeds.
    pub fn expand(&self, project: &str, seeds: &[String], hops: usize) -> Vec<String> {
        let projects = self.projects.read().expect("graph lock");
        projects
            .get(project)
            .map(|g| g.expand(seeds, hops))
            .unwrap_or_default()
    }

    /// Edges that touch the given file, either direction.
    pub fn edges_for_file(&self, project: &str, file: &str) -> Vec<GraphEdge> {
        let projects = self.projects.read().expect("graph lock");
        projects
            .get(project)
            .map(|g| {
                g.edges
                    .iter()
                    .filter(|e| e.from_file == file || e.to_file == file)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn stats(&self, project: &str) -> GraphStats {
        let projects = self.projects.read().expect("graph lock");
        projects
            .get(project)
            .map(|g| GraphStats {
                nodes: g.graph.node_count(),
                edges: g.graph.edge_count(),
            })
            .unwrap_or(GraphStats { nodes: 0, edges: 0 })
    }

    pub fn remove_project(&self, project: &str) {
        let mut projects = self.projects.write().expect("graph lock");
        projects.remove(project);
    }

    /// Persist one project's edges as JSON next to other server state.
    pub fn save(&self, project: &str, path: &Path) -> std::io::Result<()> {
        let projects = self.projects.read().expect("graph lock");
        let edges = projects
            .get(project)
            .map(|g| g.edges.clone())
            .unwrap_or_default();
        drop(projects);
        let persisted = PersistedGraph {
            project: project.to_string(),
            edges,
        };
        std::fs::write(path, serde_json::to_string(&persisted)?)
    }

    pub fn load(&self, path: &Path) -> std::io::Result<()> {
        let raw = std::fs::read_to_string(path)?;
        let persisted: PersistedGraph = serde_json::from_str(&raw)?;
        self.replace_project(&persisted.project, persisted.edges);
        Ok(())
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn edge(from: &str, to: &str) -> GraphEdge {
        GraphEdge {
            from_file: from.to_string(),
            from_symbol: "*".to_string(),
            to_file: to.to_string(),
            to_symbol: "*".to_string(),
            edge_type: EdgeKind::Imports,
        }
    }

    fn seeded() -> GraphStore {
        let store = GraphStore::new();
        store.insert_edges(
            "demo",
            vec![
                edge("src/api.ts", "src/auth.ts"),
                edge("src/auth.ts", "src/tokens.ts"),
                edge("src/tokens.ts", "src/crypto.ts"),
                edge("src/unrelated.ts", "src/other.ts"),
            ],
        );
        store
    }

    #[test]
    fn test_expand_one_hop_follows_both_directions() {
        let store = seeded();
        let mut expanded = store.expand("demo", &["src/auth.ts".to_string()], 1);
        expanded.sort();
        assert_eq!(expanded, vec!["src/api.ts", "src/tokens.ts"]);
    }

    #[test]
    fn test_expand_two_hops_reaches_further() {
        let store = seeded();
        let mut expanded = store.expand("demo", &["src/api.ts".to_string()], 2);
        expanded.sort();
        assert_eq!(expanded, vec!["src/auth.ts", "src/tokens.ts"]);
    }

    #[test]
    fn test_expand_excludes_seeds_and_unknown_projects() {
        let store = seeded();
        let expanded = store.expand("demo", &["src/auth.ts".to_string()], 3);
        assert!(!expanded.contains(&"src/auth.ts".to_string()));
        assert!(store.expand("ghost", &["src/auth.ts".to_string()], 2).is_empty());
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let store = GraphStore::new();
        store.insert_edges(
            "demo",
            vec![edge("a.ts", "b.ts"), edge("a.ts", "b.ts"), edge("a.ts", "b.ts")],
        );
        assert_eq!(store.stats("demo").edges, 1);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let store = seeded();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        store.save("demo", &path).unwrap();

        let restored = GraphStore::new();
        restored.load(&path).unwrap();
        assert_eq!(restored.stats("demo").nodes, store.stats("demo").nodes);
        let mut expanded = restored.expand("demo", &["src/auth.ts".to_string()], 1);
        expanded.sort();
        assert_eq!(expanded, vec!["src/api.ts", "src/tokens.ts"]);
    }
}
