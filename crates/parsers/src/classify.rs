use std::path::Path;

use ragd_protocol::FileKind;

/// Extensions the code parser understands (AST or regex path).
const CODE_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "pyw", "go", "rs", "java", "c", "h", "cpp",
    "cc", "cxx", "hpp", "hh", "rb", "cs", "php", "swift", "kt", "kts", "scala",
];

const CONFIG_EXTENSIONS: &[&str] = &["json", "jsonc", "yaml", "yml", "toml", "ini", "cfg", "hcl", "env"];

const DOCS_EXTENSIONS: &[&str] = &["md", "mdx", "markdown", "rst"];

const CONTRACT_EXTENSIONS: &[&str] = &["proto", "graphql", "gql"];

/// Route a path to a parser family, in priority order
/// contract → config → docs → code.
pub fn classify_file(path: &str) -> FileKind {
    let path_ref = Path::new(path);
    let basename = path_ref
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();
    let extension = path_ref
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    if CONTRACT_EXTENSIONS.contains(&extension.as_str()) || is_openapi_basename(&basename) {
        return FileKind::Contract;
    }
    if basename.starts_with(".env") || CONFIG_EXTENSIONS.contains(&extension.as_str()) {
        return FileKind::Config;
    }
    if DOCS_EXTENSIONS.contains(&extension.as_str()) {
        return FileKind::Docs;
    }
    if CODE_EXTENSIONS.contains(&extension.as_str()) {
        return FileKind::Code;
    }
    FileKind::Unknown
}

/// OpenAPI documents are YAML/JSON but belong to the contract parser.
fn is_openapi_basename(basename: &str) -> bool {
    let stem = basename
        .trim_end_matches(".yaml")
        .trim_end_matches(".yml")
        .trim_end_matches(".json");
    (stem != basename) && (stem.starts_with("openapi") || stem.starts_with("swagger"))
}

/// Language tag for payloads, derived from the extension.
pub fn language_for(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    match extension.as_str() {
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "py" | "pyw" => "python",
        "go" => "go",
        "rs" => "rust",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" => "cpp",
        "rb" => "ruby",
        "cs" => "csharp",
        "php" => "php",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "json" | "jsonc" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "ini" | "cfg" => "ini",
        "hcl" => "hcl",
        "env" => "env",
        "md" | "mdx" | "markdown" => "markdown",
        "rst" => "rst",
        "proto" => "proto",
        "graphql" | "gql" => "graphql",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragd_protocol::FileKind;

    #[test]
    fn test_priority_contract_over_config() {
        assert_eq!(classify_file("api/openapi.yaml"), FileKind::Contract);
        assert_eq!(classify_file("swagger.json"), FileKind::Contract);
        assert_eq!(classify_file("schema.graphql"), FileKind::Contract);
        assert_eq!(classify_file("service.proto"), FileKind::Contract);
    }

    #[test]
    fn test_config_detection() {
        assert_eq!(classify_file("package.json"), FileKind::Config);
        assert_eq!(classify_file("deploy/values.yml"), FileKind::Config);
        assert_eq!(classify_file(".env.production"), FileKind::Config);
        assert_eq!(classify_file("Cargo.toml"), FileKind::Config);
    }

    #[test]
    fn test_docs_and_code() {
        assert_eq!(classify_file("README.md"), FileKind::Docs);
        assert_eq!(classify_file("docs/guide.rst"), FileKind::Docs);
        assert_eq!(classify_file("src/auth.ts"), FileKind::Code);
        assert_eq!(classify_file("pkg/server.go"), FileKind::Code);
    }

    #[test]
    fn test_unknown_is_skipped() {
        assert_eq!(classify_file("logo.png"), FileKind::Unknown);
        assert_eq!(classify_file("Makefile"), FileKind::Unknown);
    }

    #[test]
    fn test_language_tags() {
        assert_eq!(language_for("a.tsx"), "typescript");
        assert_eq!(language_for("b.yml"), "yaml");
        assert_eq!(language_for("c.bin"), "unknown");
    }
}
