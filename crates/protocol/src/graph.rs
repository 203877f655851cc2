use serde::{Deserialize, Serialize};

/// Relationship kinds tracked between files/symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Imports,
    Calls,
    Extends,
    Implements,
    DependsOn,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Imports => "imports",
            EdgeKind::Calls => "calls",
            EdgeKind::Extends => "extends",
            EdgeKind::Implements => "implements",
            EdgeKind::DependsOn => "depends_on",
        }
    }
}

/// A directed relationship extracted from source code.
///
/// `to_file` is a project-root-relative path for resolved relative imports, or
/// an opaque package name for externals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub from_file: String,
    pub from_symbol: String,
    pub to_file: String,
    pub to_symbol: String,
    pub edge_type: EdgeKind,
}

impl GraphEdge {
    /// Edges with an empty endpoint carry no information and are dropped.
    pub fn is_complete(&self) -> bool {
        !self.from_file.is_empty() && !self.to_file.is_empty()
    }
}
