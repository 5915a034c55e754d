//! File agent: bounded recursive search and UTF-8 text reads.
//!
//! Every path touched — the root up front and each file encountered during
//! the walk — goes through the scope check, so a symlink inside an allowed
//! folder cannot leak content from outside it. Binary files are skipped by
//! extension or by a NUL probe of the first 2 KiB.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::kernel::policy::PolicyError;

use super::ReadScope;

/// Extensions that are never worth reading as text.
const BINARY_EXTENSIONS: &[&str] = &[
    "exe", "dll", "bin", "so", "dylib", "pdf", "png", "jpg", "jpeg", "gif", "zip", "gz", "7z",
    "mp4", "mp3",
];

/// How many skip warnings a single search keeps.
const MAX_WARNINGS: usize = 5;

/// File agent failures.
#[derive(Debug, Error)]
pub enum FileAgentError {
    /// Scope or blocked-path violation.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// Search root missing or not a directory.
    #[error("Root folder not found: {0}")]
    RootNotFound(PathBuf),
    /// `file.read_text` was called without a path.
    #[error("file.read_text requires a path input")]
    MissingPath,
    /// Read target missing or not a regular file.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    /// Read target is not UTF-8 text.
    #[error("File is not valid UTF-8 text: {0}")]
    NotUtf8(PathBuf),
    /// Read target exists but could not be read.
    #[error("Could not read file {path}: {source}")]
    Unreadable {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The directory walk itself failed (e.g. permissions mid-tree).
    #[error("search walk failed under {path}: {source}")]
    Walk {
        /// Root being walked.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: walkdir::Error,
    },
}

/// Parameters for [`search`]; caps are clamped, not rejected.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Directory to walk.
    pub root: String,
    /// Case-insensitive substring to look for.
    pub query: String,
    /// Glob patterns relative to the root; empty means match everything.
    pub globs: Vec<String>,
    /// Result cap, clamped to `[1, 100]`.
    pub max_results: u64,
    /// Snippet cap, clamped to `[32, 2000]`.
    pub max_snippet_chars: u64,
}

/// One matching file.
#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    /// Resolved file path.
    pub path: String,
    /// Window of content centered on the first match.
    pub snippet: String,
    /// The query that matched.
    #[serde(rename = "match")]
    pub matched: String,
}

/// Outcome of a search, including skip counters for observability.
#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    /// Matches, at most `max_results`.
    pub results: Vec<SearchMatch>,
    /// Files that passed the glob filter and were probed.
    pub scanned_files: u64,
    /// Files skipped as binary or undecodable.
    pub skipped_binary_files: u64,
    /// Files skipped by the glob filter.
    pub skipped_pattern_files: u64,
    /// First few skip messages.
    pub warnings: Vec<String>,
    /// Wall time in milliseconds.
    pub elapsed_ms: u64,
}

/// Outcome of a text read.
#[derive(Debug, Clone, Serialize)]
pub struct ReadReport {
    /// Resolved file path.
    pub path: String,
    /// Content, truncated to `max_chars` characters.
    pub content: String,
    /// Whether truncation happened.
    pub truncated: bool,
    /// Characters returned.
    pub returned_chars: u64,
    /// Characters in the whole file.
    pub total_chars: u64,
}

/// True when a pattern list admits this root-relative path.
///
/// Patterns use fnmatch semantics (`*` crosses separators). A `**/` prefix
/// additionally matches the bare suffix, so `**/*.txt` admits `a.txt` at the
/// root as well as `docs/a.txt`.
fn matches_globs(relative: &str, patterns: &[String]) -> bool {
    let options = glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    patterns.iter().any(|pattern| {
        let direct = glob::Pattern::new(pattern)
            .map(|p| p.matches_with(relative, options))
            .unwrap_or(false);
        if direct {
            return true;
        }
        pattern.strip_prefix("**/").is_some_and(|suffix| {
            glob::Pattern::new(suffix)
                .map(|p| p.matches_with(relative, options))
                .unwrap_or(false)
        })
    })
}

fn has_binary_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| BINARY_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Binary probe: extension denylist, then a NUL byte in the first 2 KiB.
/// Unreadable files count as binary.
fn is_probably_binary(path: &Path) -> bool {
    if has_binary_extension(path) {
        return true;
    }
    use std::io::Read;
    let mut head = [0u8; 2048];
    match std::fs::File::open(path) {
        Ok(mut file) => match file.read(&mut head) {
            Ok(n) => head.get(..n).is_some_and(|seen| seen.contains(&0)),
            Err(_) => true,
        },
        Err(_) => true,
    }
}

/// Window of at most `max_snippet_chars` characters centered on the first
/// case-insensitive occurrence of `query`, newlines collapsed to spaces.
fn make_snippet(text: &str, query: &str, max_snippet_chars: usize) -> String {
    let text_lower = text.to_lowercase();
    let query_lower = query.to_lowercase();
    let Some(byte_idx) = text_lower.find(&query_lower) else {
        return String::new();
    };
    let char_idx = text_lower
        .get(..byte_idx)
        .map(|prefix| prefix.chars().count())
        .unwrap_or(0);
    let chars: Vec<char> = text.chars().collect();
    let start = char_idx
        .saturating_sub(max_snippet_chars.saturating_div(2))
        .min(chars.len());
    let end = start.saturating_add(max_snippet_chars).min(chars.len());
    let window: String = chars[start..end].iter().collect();
    window
        .replace('\n', " ")
        .trim()
        .chars()
        .take(max_snippet_chars)
        .collect()
}

fn push_warning(warnings: &mut Vec<String>, message: String) {
    if warnings.len() < MAX_WARNINGS {
        warnings.push(message);
    }
}

fn relative_slash_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Search `root` for files whose content contains `query`.
///
/// The walk is deterministic: all entries are collected and sorted by the
/// lower-cased full path before probing, so identical trees produce
/// identical result ordering.
pub fn search(params: &SearchParams, scope: &ReadScope) -> Result<SearchReport, FileAgentError> {
    let root_input = PathBuf::from(&params.root);
    let root = match scope.check(&root_input) {
        Ok(resolved) => resolved,
        Err(PolicyError::Resolve { path, .. }) => {
            return Err(FileAgentError::RootNotFound(path));
        }
        Err(other) => return Err(other.into()),
    };
    if !root.is_dir() {
        return Err(FileAgentError::RootNotFound(root));
    }

    let patterns = if params.globs.is_empty() {
        vec![String::from("**/*")]
    } else {
        params.globs.clone()
    };
    let max_results = usize::try_from(params.max_results.clamp(1, 100)).unwrap_or(100);
    let max_snippet_chars =
        usize::try_from(params.max_snippet_chars.clamp(32, 2000)).unwrap_or(2000);

    let started = Instant::now();
    let mut scanned: u64 = 0;
    let mut skipped_binary: u64 = 0;
    let mut skipped_pattern: u64 = 0;
    let mut warnings: Vec<String> = Vec::new();
    let mut results: Vec<SearchMatch> = Vec::new();

    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in walkdir::WalkDir::new(&root).min_depth(1) {
        let entry = entry.map_err(|source| FileAgentError::Walk {
            path: root.clone(),
            source,
        })?;
        entries.push(entry.into_path());
    }
    entries.sort_by_key(|path| path.to_string_lossy().to_lowercase());

    for path in entries {
        if !path.is_file() {
            continue;
        }
        let relative = relative_slash_path(&path, &root);
        if !matches_globs(&relative, &patterns) {
            skipped_pattern = skipped_pattern.saturating_add(1);
            continue;
        }
        // Symlinks discovered mid-walk resolve here; an escape is fatal,
        // while a dangling link is just skipped.
        let resolved = match scope.check(&path) {
            Ok(resolved) => resolved,
            Err(PolicyError::Resolve { path, .. }) => {
                push_warning(
                    &mut warnings,
                    format!("skipped unreadable file: {}", path.display()),
                );
                continue;
            }
            Err(denied) => return Err(denied.into()),
        };
        scanned = scanned.saturating_add(1);
        if is_probably_binary(&resolved) {
            skipped_binary = skipped_binary.saturating_add(1);
            push_warning(
                &mut warnings,
                format!("skipped binary file: {}", resolved.display()),
            );
            continue;
        }
        let content = match std::fs::read(&resolved) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    skipped_binary = skipped_binary.saturating_add(1);
                    push_warning(
                        &mut warnings,
                        format!("skipped non-text file: {}", resolved.display()),
                    );
                    continue;
                }
            },
            Err(_) => {
                push_warning(
                    &mut warnings,
                    format!("skipped unreadable file: {}", resolved.display()),
                );
                continue;
            }
        };
        if content.to_lowercase().contains(&params.query.to_lowercase()) {
            results.push(SearchMatch {
                path: resolved.to_string_lossy().into_owned(),
                snippet: make_snippet(&content, &params.query, max_snippet_chars),
                matched: params.query.clone(),
            });
            if results.len() >= max_results {
                break;
            }
        }
    }

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    Ok(SearchReport {
        results,
        scanned_files: scanned,
        skipped_binary_files: skipped_binary,
        skipped_pattern_files: skipped_pattern,
        warnings,
        elapsed_ms,
    })
}

/// Read a UTF-8 text file, returning at most `max_chars` characters
/// (clamped to `[1, 200000]`).
pub fn read_text(
    path: &str,
    max_chars: u64,
    scope: &ReadScope,
) -> Result<ReadReport, FileAgentError> {
    if path.is_empty() {
        return Err(FileAgentError::MissingPath);
    }
    let candidate = PathBuf::from(path);
    let resolved = match scope.check(&candidate) {
        Ok(resolved) => resolved,
        Err(PolicyError::Resolve { path, .. }) => {
            return Err(FileAgentError::FileNotFound(path));
        }
        Err(other) => return Err(other.into()),
    };
    if !resolved.is_file() {
        return Err(FileAgentError::FileNotFound(resolved));
    }
    let max_chars = usize::try_from(max_chars.clamp(1, 200_000)).unwrap_or(200_000);
    let bytes = std::fs::read(&resolved).map_err(|source| FileAgentError::Unreadable {
        path: resolved.clone(),
        source,
    })?;
    let content =
        String::from_utf8(bytes).map_err(|_| FileAgentError::NotUtf8(resolved.clone()))?;

    let total_chars = content.chars().count();
    let truncated = total_chars > max_chars;
    let kept: String = content.chars().take(max_chars).collect();
    let returned_chars = kept.chars().count();
    Ok(ReadReport {
        path: resolved.to_string_lossy().into_owned(),
        content: kept,
        truncated,
        returned_chars: u64::try_from(returned_chars).unwrap_or(u64::MAX),
        total_chars: u64::try_from(total_chars).unwrap_or(u64::MAX),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ReadScope;
    use crate::kernel::policy::resolve_lenient;

    fn scope_for(root: &Path) -> ReadScope {
        let resolved = resolve_lenient(root);
        ReadScope {
            config_roots: vec![resolved.clone()],
            plan_roots: vec![resolved],
        }
    }

    fn params(root: &Path, query: &str) -> SearchParams {
        SearchParams {
            root: root.to_string_lossy().into_owned(),
            query: query.to_owned(),
            globs: vec![String::from("**/*.txt")],
            max_results: 10,
            max_snippet_chars: 240,
        }
    }

    #[test]
    fn test_search_finds_case_insensitive_matches() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "the TODO list").expect("write");
        std::fs::write(dir.path().join("b.txt"), "nothing here").expect("write");

        let report = search(&params(dir.path(), "todo"), &scope_for(dir.path()))
            .expect("search");
        assert_eq!(report.results.len(), 1);
        assert!(report.results[0].path.ends_with("a.txt"));
        assert_eq!(report.results[0].matched, "todo");
        assert!(report.results[0].snippet.contains("TODO"));
        assert_eq!(report.scanned_files, 2);
    }

    #[test]
    fn test_search_respects_glob_filter() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("keep.txt"), "TODO").expect("write");
        std::fs::write(dir.path().join("skip.rs"), "TODO").expect("write");

        let report = search(&params(dir.path(), "TODO"), &scope_for(dir.path()))
            .expect("search");
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.skipped_pattern_files, 1);
    }

    #[test]
    fn test_search_glob_suffix_rule_matches_root_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("top.txt"), "TODO").expect("write");
        let sub = dir.path().join("sub");
        std::fs::create_dir_all(&sub).expect("mkdir");
        std::fs::write(sub.join("deep.txt"), "TODO").expect("write");

        let report = search(&params(dir.path(), "TODO"), &scope_for(dir.path()))
            .expect("search");
        assert_eq!(report.results.len(), 2, "both root and nested files match");
    }

    #[test]
    fn test_search_caps_results_deterministically() {
        let dir = tempfile::tempdir().expect("tempdir");
        for i in 0..20 {
            std::fs::write(dir.path().join(format!("f{i:02}.txt")), "TODO").expect("write");
        }
        let mut p = params(dir.path(), "TODO");
        p.max_results = 3;
        let report = search(&p, &scope_for(dir.path())).expect("search");
        assert_eq!(report.results.len(), 3);
        assert!(report.results[0].path.ends_with("f00.txt"));
        assert!(report.results[2].path.ends_with("f02.txt"));
    }

    #[test]
    fn test_search_clamps_out_of_range_caps() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "x TODO y").expect("write");
        let mut p = params(dir.path(), "TODO");
        p.max_results = 0;
        p.max_snippet_chars = 1;
        let report = search(&p, &scope_for(dir.path())).expect("search");
        assert_eq!(report.results.len(), 1);
        assert!(report.results[0].snippet.chars().count() <= 32);
    }

    #[test]
    fn test_search_skips_binary_files_with_warning() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("img.png"), b"TODO").expect("write");
        std::fs::write(dir.path().join("nul.txt"), b"TO\x00DO").expect("write");
        std::fs::write(dir.path().join("ok.txt"), "TODO").expect("write");

        let mut p = params(dir.path(), "TODO");
        p.globs = vec![String::from("**/*")];
        let report = search(&p, &scope_for(dir.path())).expect("search");
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.skipped_binary_files, 2);
        assert!(!report.warnings.is_empty());
        assert!(report.warnings.len() <= 5);
    }

    #[test]
    fn test_search_missing_root_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing");
        let p = SearchParams {
            root: missing.to_string_lossy().into_owned(),
            query: String::from("x"),
            globs: Vec::new(),
            max_results: 10,
            max_snippet_chars: 240,
        };
        assert!(matches!(
            search(&p, &scope_for(dir.path())),
            Err(FileAgentError::RootNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_search_denies_symlink_escape() {
        let allowed = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("tempdir");
        std::fs::write(outside.path().join("secret.txt"), "TODO secret").expect("write");
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            allowed.path().join("leak.txt"),
        )
        .expect("symlink");

        let result = search(&params(allowed.path(), "TODO"), &scope_for(allowed.path()));
        assert!(matches!(result, Err(FileAgentError::Policy(_))));
    }

    #[test]
    fn test_snippet_is_centered_and_flattened() {
        let text = format!("{}\nTODO\n{}", "a".repeat(500), "b".repeat(500));
        let snippet = make_snippet(&text, "todo", 100);
        assert!(snippet.contains("TODO"));
        assert!(snippet.chars().count() <= 100);
        assert!(!snippet.contains('\n'));
    }

    #[test]
    fn test_read_text_truncates_exactly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("long.txt");
        std::fs::write(&path, "abcdefghij").expect("write");

        let report = read_text(
            &path.to_string_lossy(),
            4,
            &scope_for(dir.path()),
        )
        .expect("read");
        assert_eq!(report.content, "abcd");
        assert!(report.truncated);
        assert_eq!(report.returned_chars, 4);
        assert_eq!(report.total_chars, 10);
    }

    #[test]
    fn test_read_text_whole_file_not_truncated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("short.txt");
        std::fs::write(&path, "hi").expect("write");

        let report = read_text(
            &path.to_string_lossy(),
            100,
            &scope_for(dir.path()),
        )
        .expect("read");
        assert_eq!(report.content, "hi");
        assert!(!report.truncated);
        assert_eq!(report.returned_chars, 2);
    }

    #[test]
    fn test_read_text_rejects_non_utf8() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).expect("write");

        assert!(matches!(
            read_text(&path.to_string_lossy(), 100, &scope_for(dir.path())),
            Err(FileAgentError::NotUtf8(_))
        ));
    }

    #[test]
    fn test_read_text_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.txt");
        assert!(matches!(
            read_text(&missing.to_string_lossy(), 100, &scope_for(dir.path())),
            Err(FileAgentError::FileNotFound(_))
        ));
        assert!(matches!(
            read_text("", 100, &scope_for(dir.path())),
            Err(FileAgentError::MissingPath)
        ));
    }

    #[test]
    fn test_read_text_outside_scope_is_policy_error() {
        let allowed = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("tempdir");
        let secret = outside.path().join("secret.txt");
        std::fs::write(&secret, "s").expect("write");

        assert!(matches!(
            read_text(&secret.to_string_lossy(), 100, &scope_for(allowed.path())),
            Err(FileAgentError::Policy(_))
        ));
    }
}
