//! Architectural Enforcement Integration Tests
//!
//! Source scans that enforce workspace-wide rules on production code:
//! - No blocking sleeps; async sleeps only where waiting is the point
//!   (retry backoff and backpressure)
//! - No `unwrap()` / `expect()` outside tests
//!
//! Helpers here locate the workspace and strip test modules so the rules only
//! see production lines.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["ingest/core/src", "ingest/cli/src"];

/// A rule violation at a specific line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Offending source line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Workspace root (two levels above this crate)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// Every `.rs` file under the production directories
#[must_use]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    PRODUCTION_DIRS
        .iter()
        .map(|dir| root.join(dir))
        .filter(|dir| dir.exists())
        .flat_map(|dir| {
            walkdir::WalkDir::new(dir)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
                .map(|e| e.path().to_path_buf())
        })
        .collect()
}

/// Production lines of a file: `(line_number, code)` with comments removed
///
/// Everything from the first `#[cfg(test)]` onwards is treated as test code.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, String)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .filter(|(_, line)| {
            let trimmed = line.trim_start();
            !trimmed.starts_with("//") && !trimmed.starts_with("//!")
        })
        .map(|(idx, line)| {
            let code = line.split("//").next().unwrap_or(line);
            (idx + 1, code.to_string())
        })
        .collect()
}

/// Scan production files, reporting lines where `is_violation(path, code)` holds
pub fn scan(is_violation: impl Fn(&Path, &str) -> bool) -> Vec<Violation> {
    let mut violations = Vec::new();
    for path in production_files() {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        for (line, code) in production_lines(&content) {
            if is_violation(&path, &code) {
                violations.push(Violation {
                    path: path.clone(),
                    line,
                    text: code.trim().to_string(),
                });
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let src = "fn a() {}\n// note\nfn b() {} // trailing\n#[cfg(test)]\nmod tests {}\n";
        let lines = production_lines(src);
        assert_eq!(
            lines,
            vec![(1, "fn a() {}".to_string()), (3, "fn b() {} ".to_string())]
        );
    }

    #[test]
    fn test_production_files_found() {
        let files = production_files();
        assert!(files.iter().any(|p| p.ends_with("manager.rs")));
        assert!(files.iter().any(|p| p.ends_with("main.rs")));
    }
}
