use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;

use ragd_protocol::{ApiError, Result};

/// Directories that never contain indexable source.
const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    ".next",
];

/// Files larger than this are skipped outright.
const MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

/// Gitignore-aware project walker with include/exclude glob patterns.
#[derive(Debug)]
pub struct FileScanner {
    root: PathBuf,
    includes: Option<GlobSet>,
    excludes: Option<GlobSet>,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>, patterns: &[String], excludes: &[String]) -> Result<Self> {
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            includes: build_globset(patterns)?,
            excludes: build_globset(excludes)?,
        })
    }

    /// Walk the tree, honouring gitignore files, default excludes and the
    /// caller's patterns. Returns paths relative to the root.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(true)
            .git_global(false)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::debug!("scan: skipping entry: {err}");
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if relative
                .components()
                .any(|c| DEFAULT_EXCLUDES.contains(&c.as_os_str().to_str().unwrap_or("")))
            {
                continue;
            }
            if let Some(excludes) = &self.excludes {
                if excludes.is_match(relative) {
                    continue;
                }
            }
            if let Some(includes) = &self.includes {
                if !includes.is_match(relative) {
                    continue;
                }
            }
            if entry
                .metadata()
                .map(|m| m.len() > MAX_FILE_BYTES)
                .unwrap_or(false)
            {
                continue;
            }
            files.push(relative.to_path_buf());
        }

        files.sort();
        Ok(files)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .map_err(|e| ApiError::field("patterns", format!("invalid glob '{pattern}': {e}")))?,
        );
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| ApiError::field("patterns", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_finds_files_and_skips_default_excludes() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("src/main.ts"), "export {}");
        touch(&dir.path().join("node_modules/pkg/index.js"), "x");
        touch(&dir.path().join("README.md"), "# hi");

        let scanner = FileScanner::new(dir.path(), &[], &[]).unwrap();
        let files = scanner.scan().unwrap();
        assert_eq!(files, vec![PathBuf::from("README.md"), PathBuf::from("src/main.ts")]);
    }

    #[test]
    fn test_include_and_exclude_patterns() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("src/a.ts"), "a");
        touch(&dir.path().join("src/a.test.ts"), "t");
        touch(&dir.path().join("docs/guide.md"), "m");

        let scanner = FileScanner::new(
            dir.path(),
            &["src/**/*.ts".to_string()],
            &["**/*.test.ts".to_string()],
        )
        .unwrap();
        let files = scanner.scan().unwrap();
        assert_eq!(files, vec![PathBuf::from("src/a.ts")]);
    }

    #[test]
    fn test_invalid_glob_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileScanner::new(dir.path(), &["[".to_string()], &[]).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
