//! Model registry: a local catalogue under `models/registry.json`.
//!
//! Registration only; nothing is downloaded. An entry with a verified local
//! file is `registered`, anything else is `download_stubbed` until a real
//! fetcher exists. The first registered model becomes the default.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{write_atomic, DataPaths};

/// Registry failures.
#[derive(Debug, Error)]
pub enum ModelsError {
    /// Filesystem failure while reading or writing the registry.
    #[error("models registry I/O error at {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The on-disk registry is not valid JSON.
    #[error("Invalid models registry JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
    /// A supplied local path does not point at a file.
    #[error("Model file not found: {0}")]
    FileNotFound(PathBuf),
    /// `set-default` named a model that is not installed.
    #[error("Model not installed: {0}")]
    NotInstalled(String),
}

/// Lifecycle state of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    /// Backed by a verified local file.
    Registered,
    /// Catalogued without a local file.
    DownloadStubbed,
}

/// One catalogued model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Stable model identifier.
    pub model_id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Verified local file path, when present.
    #[serde(default)]
    pub local_path: Option<String>,
    /// Lifecycle state.
    pub status: ModelStatus,
}

/// The whole registry document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsState {
    /// Catalogued models.
    #[serde(default)]
    pub installed_models: Vec<ModelEntry>,
    /// Default model id, if any.
    #[serde(default)]
    pub default_model_id: Option<String>,
}

/// Request body for `POST /v1/models/download`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDownloadRequest {
    /// Model to register.
    pub model_id: String,
    /// Optional display name; defaults to the id.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Optional local file to verify and attach.
    #[serde(default)]
    pub local_path: Option<String>,
}

/// Request body for `POST /v1/models/set-default`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSetDefaultRequest {
    /// Model to promote.
    pub model_id: String,
}

/// Persist the registry with a temp-then-rename write.
pub fn write_state(paths: &DataPaths, state: &ModelsState) -> Result<(), ModelsError> {
    let rendered = serde_json::to_string_pretty(state)?;
    write_atomic(&paths.models_registry, &rendered).map_err(|source| ModelsError::Io {
        path: paths.models_registry.clone(),
        source,
    })
}

/// Load the registry from disk, seeding an empty one on first use.
pub fn load_state(paths: &DataPaths) -> Result<ModelsState, ModelsError> {
    if !paths.models_registry.exists() {
        let state = ModelsState::default();
        write_state(paths, &state)?;
        return Ok(state);
    }
    let raw =
        std::fs::read_to_string(&paths.models_registry).map_err(|source| ModelsError::Io {
            path: paths.models_registry.clone(),
            source,
        })?;
    Ok(serde_json::from_str(&raw)?)
}

/// Register (or re-register) a model in the given state.
pub fn register_model(
    state: &mut ModelsState,
    request: &ModelDownloadRequest,
) -> Result<(), ModelsError> {
    let display_name = request
        .display_name
        .clone()
        .unwrap_or_else(|| request.model_id.clone());
    let (local_path, status) = match &request.local_path {
        Some(raw) => {
            let candidate = crate::kernel::policy::resolve_lenient(std::path::Path::new(raw));
            if !candidate.is_file() {
                return Err(ModelsError::FileNotFound(candidate));
            }
            (
                Some(candidate.to_string_lossy().into_owned()),
                ModelStatus::Registered,
            )
        }
        None => (None, ModelStatus::DownloadStubbed),
    };

    state
        .installed_models
        .retain(|entry| entry.model_id != request.model_id);
    state.installed_models.push(ModelEntry {
        model_id: request.model_id.clone(),
        display_name,
        local_path,
        status,
    });
    if state.default_model_id.is_none() {
        state.default_model_id = Some(request.model_id.clone());
    }
    Ok(())
}

/// Promote an installed model to default.
pub fn set_default(state: &mut ModelsState, model_id: &str) -> Result<(), ModelsError> {
    if !state
        .installed_models
        .iter()
        .any(|entry| entry.model_id == model_id)
    {
        return Err(ModelsError::NotInstalled(model_id.to_owned()));
    }
    state.default_model_id = Some(model_id.to_owned());
    Ok(())
}
