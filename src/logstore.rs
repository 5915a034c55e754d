//! Backend audit log: append-only text lines under `logs/backend.log`.
//!
//! Lines are `<iso> [LEVEL] message`. This is the user-visible record served
//! by the `/v1/logs/*` endpoints; appends go through a mutex so concurrent
//! requests never interleave partial lines.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::types::{iso, now_utc};

/// Export rendering for [`BackendLog::export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogExportFormat {
    /// Plain text, one line per entry.
    Txt,
    /// JSON Lines, `{"line": ...}` per entry.
    Jsonl,
}

/// Append-only backend log with tail/search/export views.
pub struct BackendLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl BackendLog {
    /// Create a log handle for the given file path.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Append one `<iso> [LEVEL] message` line.
    ///
    /// Failures are reported to the diagnostic stream and otherwise ignored;
    /// the audit log must never take the request down with it.
    pub fn append(&self, level: &str, message: &str) {
        let line = format!("{} [{}] {}\n", iso(now_utc()), level.to_uppercase(), message);
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let opened = std::fs::create_dir_all(self.path.parent().unwrap_or(Path::new(".")))
            .and_then(|()| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
            });
        match opened {
            Ok(mut file) => {
                if let Err(e) = file.write_all(line.as_bytes()) {
                    tracing::warn!(error = %e, "backend log append failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "backend log open failed"),
        }
    }

    fn read_lines(&self) -> Vec<String> {
        match std::fs::read(&self.path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes)
                .lines()
                .map(ToOwned::to_owned)
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Last `lines` entries, `lines` clamped to `[1, 2000]`.
    pub fn tail(&self, lines: u64) -> Vec<String> {
        let take = usize::try_from(lines.clamp(1, 2000)).unwrap_or(2000);
        let all = self.read_lines();
        let skip = all.len().saturating_sub(take);
        all.into_iter().skip(skip).collect()
    }

    /// Case-insensitive substring search, at most `limit` matches
    /// (`limit` clamped to `[1, 5000]`). An empty query matches nothing.
    pub fn search(&self, query: &str, limit: u64) -> Vec<String> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let cap = usize::try_from(limit.clamp(1, 5000)).unwrap_or(5000);
        let mut matches = Vec::new();
        for line in self.read_lines() {
            if line.to_lowercase().contains(&needle) {
                matches.push(line);
                if matches.len() >= cap {
                    break;
                }
            }
        }
        matches
    }

    /// Render the whole log for export, optionally redacting known paths.
    ///
    /// Redaction replaces the resolved data dir with `{{DATA_DIR}}` and each
    /// configured allowed folder with `{{ALLOWED_FOLDER_<i>}}` (1-indexed in
    /// config order).
    pub fn export(
        &self,
        format: LogExportFormat,
        redact_paths: bool,
        data_dir: &Path,
        allowed_folders: &[String],
    ) -> String {
        let markers = redaction_markers(data_dir, allowed_folders);
        let lines: Vec<String> = self
            .read_lines()
            .into_iter()
            .map(|line| {
                if redact_paths {
                    redact_line(&line, &markers)
                } else {
                    line
                }
            })
            .collect();
        match format {
            LogExportFormat::Txt => lines.join("\n"),
            LogExportFormat::Jsonl => lines
                .iter()
                .map(|line| {
                    serde_json::to_string(&serde_json::json!({ "line": line }))
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

fn redaction_markers(data_dir: &Path, allowed_folders: &[String]) -> Vec<(String, String)> {
    let mut markers = Vec::new();
    let resolved_data = resolve_lenient(data_dir);
    markers.push((
        resolved_data.to_string_lossy().into_owned(),
        "{{DATA_DIR}}".to_owned(),
    ));
    for (idx, folder) in allowed_folders.iter().enumerate() {
        let resolved = resolve_lenient(Path::new(folder));
        let ordinal = idx.saturating_add(1);
        markers.push((
            resolved.to_string_lossy().into_owned(),
            format!("{{{{ALLOWED_FOLDER_{ordinal}}}}}"),
        ));
    }
    markers
}

fn resolve_lenient(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn redact_line(line: &str, markers: &[(String, String)]) -> String {
    let mut rewritten = line.to_owned();
    for (needle, marker) in markers {
        if !needle.is_empty() {
            rewritten = rewritten.replace(needle, marker);
        }
    }
    rewritten
}
