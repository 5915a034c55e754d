//! Trace store: one JSON document per task plus a sorted index.
//!
//! Every write goes through a sibling temp file and an atomic rename, so a
//! crash mid-write can never leave a half-written document behind. The index
//! is rewritten as a whole under its own mutex; per-task files need no lock
//! because each task id is written by exactly one executor call.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use uuid::Uuid;

use crate::config::write_atomic;
use crate::types::{TaskSummary, TaskTrace};

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("task store I/O error at {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The task index is not valid JSON.
    #[error("Invalid task index JSON: {0}")]
    CorruptIndex(serde_json::Error),
    /// A task document is not valid JSON.
    #[error("Invalid task trace JSON: {0}")]
    CorruptTrace(serde_json::Error),
    /// No document exists for this task id.
    #[error("Task not found: {0}")]
    NotFound(Uuid),
}

/// File-backed store for task traces under `sessions/tasks/`.
pub struct TraceStore {
    tasks_dir: PathBuf,
    index_lock: Mutex<()>,
}

impl TraceStore {
    /// Create a store rooted at `tasks_dir`.
    pub fn new(tasks_dir: PathBuf) -> Self {
        Self {
            tasks_dir,
            index_lock: Mutex::new(()),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.tasks_dir.join("index.json")
    }

    fn trace_path(&self, task_id: Uuid) -> PathBuf {
        self.tasks_dir.join(format!("{task_id}.json"))
    }

    fn io_err(&self, path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Create the tasks directory and an empty index if missing.
    pub fn ensure(&self) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.tasks_dir)
            .map_err(|e| self.io_err(&self.tasks_dir, e))?;
        let index = self.index_path();
        if !index.exists() {
            write_atomic(&index, "[]").map_err(|e| self.io_err(&index, e))?;
        }
        Ok(())
    }

    /// Load the task index, newest first.
    pub fn index(&self) -> Result<Vec<TaskSummary>, StoreError> {
        self.ensure()?;
        let index = self.index_path();
        let raw = std::fs::read_to_string(&index).map_err(|e| self.io_err(&index, e))?;
        serde_json::from_str(&raw).map_err(StoreError::CorruptIndex)
    }

    /// Load one task trace.
    pub fn load(&self, task_id: Uuid) -> Result<TaskTrace, StoreError> {
        let path = self.trace_path(task_id);
        if !path.exists() {
            return Err(StoreError::NotFound(task_id));
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| self.io_err(&path, e))?;
        serde_json::from_str(&raw).map_err(StoreError::CorruptTrace)
    }

    /// Persist a trace document and refresh its row in the index.
    ///
    /// The index ends up sorted by `started_at` descending, with at most one
    /// row per task id.
    pub fn persist(&self, trace: &TaskTrace) -> Result<(), StoreError> {
        self.ensure()?;
        let path = self.trace_path(trace.task_id);
        let rendered =
            serde_json::to_string_pretty(trace).map_err(StoreError::CorruptTrace)?;
        write_atomic(&path, &rendered).map_err(|e| self.io_err(&path, e))?;

        let _guard = self
            .index_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut entries: Vec<TaskSummary> = self
            .index()?
            .into_iter()
            .filter(|entry| entry.task_id != trace.task_id)
            .collect();
        entries.push(trace.summary());
        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        let index = self.index_path();
        let rendered =
            serde_json::to_string_pretty(&entries).map_err(StoreError::CorruptIndex)?;
        write_atomic(&index, &rendered).map_err(|e| self.io_err(&index, e))
    }
}

/// Render a trace as the markdown export document.
pub fn trace_to_markdown(trace: &TaskTrace) -> String {
    let mut lines = vec![
        format!("# Task {}", trace.task_id),
        format!("- Status: {}", trace.status),
        format!("- Plan: {}", trace.plan_id),
        format!("- Started: {}", crate::types::iso(trace.started_at)),
        format!(
            "- Ended: {}",
            trace
                .ended_at
                .map(crate::types::iso)
                .unwrap_or_else(|| String::from("n/a"))
        ),
        format!(
            "- Agent: {}",
            trace
                .agent
                .map(|agent| agent.to_string())
                .unwrap_or_else(|| String::from("n/a"))
        ),
        String::new(),
        String::from("## Events"),
    ];
    for event in &trace.events {
        let step = event
            .step_id
            .as_ref()
            .map(|id| format!(" ({id})"))
            .unwrap_or_default();
        lines.push(format!(
            "- [{}] [{}]{} {}",
            crate::types::iso(event.timestamp),
            event.level.to_string().to_uppercase(),
            step,
            event.message
        ));
    }
    lines.join("\n")
}
