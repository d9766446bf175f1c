//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - Screen building and metric normalization never touch the network
//! - The conductor core never depends on a chat transport
//! - No `unwrap()`/`expect()` in conductor core production code
//!
//! The helpers below scan source files as plain text. They are deliberately
//! simple: everything after the first `#[cfg(test)]` in a file counts as test
//! code, and `//` comments are stripped before matching.

use std::fs;
use std::path::{Path, PathBuf};

/// A rule violation, formatted for test output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the violation is in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Offending source line, trimmed
    pub source: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.source)
    }
}

/// Root of the workspace
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// All `.rs` files under `dir`, relative to the workspace root
#[must_use]
pub fn rust_files(dir: &str) -> Vec<PathBuf> {
    let path = workspace_root().join(dir);
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Numbered production lines of a source file with comments removed
///
/// Scanning stops at the first `#[cfg(test)]`.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    let mut lines = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim_start().starts_with("#[cfg(test)]") {
            break;
        }
        let code = line.split("//").next().unwrap_or(line);
        if !code.trim().is_empty() {
            lines.push((idx + 1, code));
        }
    }
    lines
}

/// Lines of `path` whose code contains any of `needles`
#[must_use]
pub fn find_in_production(path: &Path, needles: &[&str]) -> Vec<Violation> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };
    production_lines(&content)
        .into_iter()
        .filter(|(_, code)| needles.iter().any(|n| code.contains(n)))
        .map(|(line, code)| Violation {
            path: path.to_path_buf(),
            line,
            source: code.trim().to_string(),
        })
        .collect()
}

/// Panic with a readable report if `violations` is non-empty
pub fn assert_clean(rule: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!("\nFound {} violation(s): {rule}", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let src = "fn a() {}\n// x.unwrap()\nlet y = 1; // .unwrap()\n#[cfg(test)]\nmod tests { x.unwrap() }";
        let lines = production_lines(src);
        assert_eq!(lines, vec![(1, "fn a() {}"), (3, "let y = 1; ")]);
    }

    #[test]
    fn test_workspace_root_contains_conductor() {
        assert!(workspace_root().join("conductor").join("core").exists());
    }
}
