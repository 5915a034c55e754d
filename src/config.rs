//! Configuration loading and data-directory layout.
//!
//! The backend owns a single JSON config file under the data directory.
//! It is written with defaults on first start and reloaded on demand via
//! `POST /v1/config/reload`; in-memory state is only ever replaced wholesale
//! so readers always see a consistent snapshot.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming the data directory root.
pub const DATA_DIR_ENV: &str = "LITECLAW_DATA_DIR";

/// Default data directory, relative to the working directory.
pub const DEFAULT_DATA_DIR: &str = ".liteclaw-data";

/// Config file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Filesystem failure while reading or writing the config.
    #[error("config I/O error at {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The on-disk document is not valid JSON for [`AppConfig`].
    #[error("Invalid config JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Shell capability switch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Whether `shell.exec` steps may run at all.
    #[serde(default)]
    pub enabled: bool,
}

/// User-editable application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Absolute folders the file agent may read under.
    #[serde(default)]
    pub allowed_folders: Vec<String>,
    /// Shell capability switch.
    #[serde(default)]
    pub shell: ShellConfig,
    /// Whether task history persists to disk.
    #[serde(default = "default_history_enabled")]
    pub history_enabled: bool,
}

fn default_history_enabled() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            allowed_folders: Vec::new(),
            shell: ShellConfig::default(),
            history_enabled: default_history_enabled(),
        }
    }
}

/// Resolved locations of everything the backend persists.
#[derive(Debug, Clone)]
pub struct DataPaths {
    /// Data directory root.
    pub root: PathBuf,
    /// `config.json`.
    pub config_json: PathBuf,
    /// `models/registry.json`.
    pub models_registry: PathBuf,
    /// `sessions/tasks/` directory.
    pub tasks_dir: PathBuf,
    /// `logs/backend.log`.
    pub backend_log: PathBuf,
    /// `logs/` directory for the tracing file layer.
    pub logs_dir: PathBuf,
}

impl DataPaths {
    /// Lay out the standard tree under `root`.
    pub fn under(root: PathBuf) -> Self {
        let config_json = root.join("config.json");
        let models_registry = root.join("models").join("registry.json");
        let tasks_dir = root.join("sessions").join("tasks");
        let logs_dir = root.join("logs");
        let backend_log = logs_dir.join("backend.log");
        Self {
            root,
            config_json,
            models_registry,
            tasks_dir,
            backend_log,
            logs_dir,
        }
    }

    /// Resolve the data root from `LITECLAW_DATA_DIR`, defaulting to
    /// `./.liteclaw-data`.
    pub fn from_env() -> Self {
        let root = std::env::var(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));
        Self::under(root)
    }
}

/// Write `contents` to `path` through a sibling temp file and an atomic
/// rename, creating parent directories as needed.
pub fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp = path.with_extension("tmp");
    std::fs::write(&temp, contents)?;
    std::fs::rename(&temp, path)
}

/// Write the default config if `config.json` does not exist yet.
pub fn write_default_if_missing(paths: &DataPaths) -> Result<(), ConfigError> {
    if paths.config_json.exists() {
        return Ok(());
    }
    let rendered = serde_json::to_string_pretty(&AppConfig::default())?;
    write_atomic(&paths.config_json, &rendered).map_err(|source| ConfigError::Io {
        path: paths.config_json.clone(),
        source,
    })
}

/// Load the config from disk, seeding the default file first if missing.
///
/// # Errors
///
/// Returns [`ConfigError::Corrupt`] when the file exists but is not valid
/// JSON, surfaced to clients as a 500.
pub fn load_from_disk(paths: &DataPaths) -> Result<AppConfig, ConfigError> {
    write_default_if_missing(paths)?;
    let raw = std::fs::read_to_string(&paths.config_json).map_err(|source| ConfigError::Io {
        path: paths.config_json.clone(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_shape() {
        let config = AppConfig::default();
        assert!(config.allowed_folders.is_empty());
        assert!(!config.shell.enabled);
        assert!(config.history_enabled);
    }

    #[test]
    fn test_load_seeds_default_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = DataPaths::under(dir.path().join("data"));
        let config = load_from_disk(&paths).expect("load should seed defaults");
        assert!(paths.config_json.exists());
        assert!(config.allowed_folders.is_empty());
    }

    #[test]
    fn test_load_rejects_corrupt_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = DataPaths::under(dir.path().to_path_buf());
        std::fs::create_dir_all(&paths.root).expect("mkdir");
        std::fs::write(&paths.config_json, "{not json").expect("write");
        assert!(matches!(
            load_from_disk(&paths),
            Err(ConfigError::Corrupt(_))
        ));
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("nested").join("file.json");
        write_atomic(&target, "one").expect("first write");
        write_atomic(&target, "two").expect("second write");
        assert_eq!(std::fs::read_to_string(&target).expect("read"), "two");
        assert!(!target.with_extension("tmp").exists());
    }

    #[test]
    fn test_paths_layout() {
        let paths = DataPaths::under(PathBuf::from("/data"));
        assert_eq!(paths.config_json, PathBuf::from("/data/config.json"));
        assert_eq!(
            paths.models_registry,
            PathBuf::from("/data/models/registry.json")
        );
        assert_eq!(paths.tasks_dir, PathBuf::from("/data/sessions/tasks"));
        assert_eq!(paths.backend_log, PathBuf::from("/data/logs/backend.log"));
    }
}
