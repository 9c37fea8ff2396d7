//! Task-source adapters (spec §4.1): resolve a `tasks:` entry into an
//! ordered list of filesystem paths. Only `local` is implemented; `url` and
//! `doi` are out of scope per SPEC_FULL.md §1 and fail with a dedicated
//! fatal error instead of silently doing nothing.

use glob::Pattern;
use thiserror::Error;

use crate::config::{TaskGroupSpec, TaskSourceType};

#[derive(Debug, Error)]
pub enum TaskSourceError {
    #[error("task group has no `path`")]
    MissingPath,
    #[error("task source type {0:?} is not implemented in this core (out of scope per spec §1)")]
    NotImplemented(TaskSourceType),
    #[error("io error walking {path}: {source}")]
    Io { path: String, source: std::io::Error },
}

pub type TaskSourceResult<T> = Result<T, TaskSourceError>;

/// Resolve a declared task group to an ordered, deduplicated list of
/// filesystem paths.
pub fn resolve(spec: &TaskGroupSpec) -> TaskSourceResult<Vec<String>> {
    match spec.source_type {
        TaskSourceType::Local => resolve_local(spec),
        TaskSourceType::Url | TaskSourceType::Doi => Err(TaskSourceError::NotImplemented(spec.source_type)),
    }
}

fn resolve_local(spec: &TaskGroupSpec) -> TaskSourceResult<Vec<String>> {
    let root = spec.path.as_deref().ok_or(TaskSourceError::MissingPath)?;
    let patterns = spec.patterns.as_ref().map(|p| p.as_vec()).unwrap_or_else(|| vec!["*".to_string()]);

    let mut paths = Vec::new();
    let entries = walk(root)?;
    for entry in entries {
        let relative = entry.strip_prefix(&format!("{root}/")).unwrap_or(&entry);
        if patterns.iter().any(|pat| gitwildmatch(pat, relative) || gitwildmatch(pat, &entry)) {
            paths.push(entry);
        }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

fn walk(root: &str) -> TaskSourceResult<Vec<String>> {
    let mut out = Vec::new();
    let mut stack = vec![std::path::PathBuf::from(root)];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| TaskSourceError::Io { path: dir.display().to_string(), source: e })?;
        for entry in entries {
            let entry = entry.map_err(|e| TaskSourceError::Io { path: dir.display().to_string(), source: e })?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Some(s) = path.to_str() {
                out.push(s.to_string());
            }
        }
    }
    Ok(out)
}

/// Gitwildmatch-style glob match (the pathspec crate's behavior, per spec
/// §4.1); implemented with `glob::Pattern` against the path's basename when
/// the pattern has no path separators (the common `*.txt` case), or the
/// full relative path otherwise.
fn gitwildmatch(pattern: &str, candidate: &str) -> bool {
    let Ok(pat) = Pattern::new(pattern) else { return false };
    if pattern.contains('/') {
        pat.matches(candidate)
    } else {
        let basename = std::path::Path::new(candidate)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(candidate);
        pat.matches(basename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatternsSpec;
    use tempfile::tempdir;

    #[test]
    fn local_source_globs_matching_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        std::fs::write(dir.path().join("b.cnf"), "x").unwrap();
        let spec = TaskGroupSpec {
            source_type: TaskSourceType::Local,
            path: Some(dir.path().to_string_lossy().to_string()),
            patterns: Some(PatternsSpec::One("*.txt".to_string())),
            urls: None,
            doi: None,
        };
        let paths = resolve(&spec).unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("a.txt"));
    }

    #[test]
    fn url_source_is_not_implemented() {
        let spec = TaskGroupSpec {
            source_type: TaskSourceType::Url,
            path: None,
            patterns: None,
            urls: Some(vec!["https://example.com/a.zip".to_string()]),
            doi: None,
        };
        assert!(matches!(resolve(&spec), Err(TaskSourceError::NotImplemented(_))));
    }
}
