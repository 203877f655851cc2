use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use ragd_protocol::{EdgeKind, GraphEdge};

static ES_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*import\s+(?:type\s+)?([^'"]+?)\s+from\s+['"]([^'"]+)['"]"#)
        .expect("static regex")
});
static ES_BARE_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*import\s+['"]([^'"]+)['"]"#).expect("static regex"));
static REQUIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:const|let|var)\s+(?:\{([^}]*)\}|(\w+))\s*=\s*require\(\s*['"]([^'"]+)['"]\s*\)"#)
        .expect("static regex")
});
static PY_FROM_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*from\s+([\w.]+)\s+import\s+(.+)$").expect("static regex")
});
static PY_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*import\s+([\w.]+(?:\s*,\s*[\w.]+)*)\s*$").expect("static regex"));
static GO_IMPORT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)import\s*\(([^)]*)\)").expect("static regex"));
static GO_IMPORT_SINGLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^import\s+"([^"]+)""#).expect("static regex"));
static GO_QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]+)""#).expect("static regex"));
static CLASS_EXTENDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"class\s+(\w+)(?:<[^>]*>)?[^{]*?\bextends\s+([\w.]+)").expect("static regex")
});
static CLASS_IMPLEMENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"class\s+(\w+)(?:<[^>]*>)?[^{]*?\bimplements\s+([\w.,\s]+)").expect("static regex")
});
static PY_CLASS_BASES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^class\s+(\w+)\s*\(([^)]*)\)").expect("static regex"));

/// Derives graph edges from one file's source text.
///
/// Regex-only on purpose: the extractor runs on every language, including
/// ones the AST pass does not cover. Relative import specifiers resolve to
/// project-root paths; externals stay verbatim.
pub fn extract_edges(content: &str, file_path: &str) -> Vec<GraphEdge> {
    let mut edges = Vec::new();

    for capture in ES_IMPORT.captures_iter(content) {
        let target = resolve_specifier(&capture[2], file_path);
        for symbol in parse_es_names(&capture[1]) {
            edges.push(import_edge(file_path, &target, &symbol));
        }
    }
    for capture in ES_BARE_IMPORT.captures_iter(content) {
        let target = resolve_specifier(&capture[1], file_path);
        edges.push(import_edge(file_path, &target, "*"));
    }
    for capture in REQUIRE.captures_iter(content) {
        let target = resolve_specifier(&capture[3], file_path);
        if let Some(named) = capture.get(1) {
            for symbol in parse_es_names(named.as_str()) {
                edges.push(import_edge(file_path, &target, &symbol));
            }
        } else if let Some(default) = capture.get(2) {
            edges.push(import_edge(file_path, &target, default.as_str()));
        }
    }

    for capture in PY_FROM_IMPORT.captures_iter(content) {
        let target = capture[1].to_string();
        for symbol in capture[2].split(',') {
            let symbol = symbol.trim().split_whitespace().next().unwrap_or("");
            if !symbol.is_empty() && symbol != "(" {
                edges.push(import_edge(file_path, &target, symbol));
            }
        }
    }
    for capture in PY_IMPORT.captures_iter(content) {
        for module in capture[1].split(',') {
            let module = module.trim();
            if !module.is_empty() {
                edges.push(import_edge(file_path, module, "*"));
            }
        }
    }

    for capture in GO_IMPORT_BLOCK.captures_iter(content) {
        for quoted in GO_QUOTED.captures_iter(&capture[1]) {
            edges.push(import_edge(file_path, &quoted[1], "*"));
        }
    }
    for capture in GO_IMPORT_SINGLE.captures_iter(content) {
        edges.push(import_edge(file_path, &capture[1], "*"));
    }

    for capture in CLASS_EXTENDS.captures_iter(content) {
        edges.push(GraphEdge {
            from_file: file_path.to_string(),
            from_symbol: capture[1].to_string(),
            to_file: file_path.to_string(),
            to_symbol: capture[2].to_string(),
            edge_type: EdgeKind::Extends,
        });
    }
    for capture in CLASS_IMPLEMENTS.captures_iter(content) {
        let class = capture[1].to_string();
        for interface in capture[2].split(',') {
            let interface = interface.trim();
            // The implements list runs up to the class body; stop at noise.
            if interface.is_empty() || interface.contains(char::is_whitespace) {
                continue;
            }
            edges.push(GraphEdge {
                from_file: file_path.to_string(),
                from_symbol: class.clone(),
                to_file: file_path.to_string(),
                to_symbol: interface.to_string(),
                edge_type: EdgeKind::Implements,
            });
        }
    }
    for capture in PY_CLASS_BASES.captures_iter(content) {
        let class = capture[1].to_string();
        for base in capture[2].split(',') {
            let base = base.trim();
            if base.is_empty() || base == "object" {
                continue;
            }
            edges.push(GraphEdge {
                from_file: file_path.to_string(),
                from_symbol: class.clone(),
                to_file: file_path.to_string(),
                to_symbol: base.to_string(),
                edge_type: EdgeKind::Extends,
            });
        }
    }

    edges.retain(GraphEdge::is_complete);
    edges
}

fn import_edge(from_file: &str, to_file: &str, symbol: &str) -> GraphEdge {
    GraphEdge {
        from_file: from_file.to_string(),
        from_symbol: "*".to_string(),
        to_file: to_file.to_string(),
        to_symbol: symbol.to_string(),
        edge_type: EdgeKind::Imports,
    }
}

/// `{X, Y as Z}` → [X, Y]; `* as ns` → [*]; `Default` → [Default].
fn parse_es_names(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    let mut names = Vec::new();

    let mut push_items = |items: &str| {
        for item in items.split(',') {
            let original = item.trim().split(" as ").next().unwrap_or("").trim();
            if !original.is_empty() {
                names.push(original.to_string());
            }
        }
    };

    if let (Some(open), Some(close)) = (raw.find('{'), raw.rfind('}')) {
        // A default import may precede the braces: `Default, {A, B}`.
        let before = raw[..open].trim().trim_end_matches(',').trim();
        if !before.is_empty() {
            push_items(before);
        }
        push_items(&raw[open + 1..close]);
    } else if raw.starts_with('*') {
        names.push("*".to_string());
    } else {
        push_items(raw);
    }
    names
}

/// Resolve a relative specifier against the owning file's directory and
/// annotate it with the owner's extension when it has none. External package
/// specifiers pass through untouched.
fn resolve_specifier(specifier: &str, owner: &str) -> String {
    if !specifier.starts_with('.') {
        return specifier.to_string();
    }

    let owner_path = Path::new(owner);
    let dir = owner_path.parent().unwrap_or_else(|| Path::new(""));

    let mut segments: Vec<&str> = dir
        .to_str()
        .unwrap_or("")
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    for segment in specifier.split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let mut resolved = segments.join("/");

    if Path::new(&resolved).extension().is_none() {
        if let Some(ext) = owner_path.extension().and_then(|e| e.to_str()) {
            resolved = format!("{resolved}.{ext}");
        }
    }
    resolved
}
