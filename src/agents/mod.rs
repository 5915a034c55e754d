//! Capability agents: filesystem search/read and gated shell execution.

use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::kernel::policy::{ensure_file_read_scope, resolve_lenient, PolicyError};
use crate::types::{Plan, ScopeMode, ScopeType};

pub mod file;
pub mod shell;

/// The file-read scope active for one plan execution: the configured allowed
/// folders intersected with the plan-declared read targets.
#[derive(Debug, Clone)]
pub struct ReadScope {
    /// Resolved `allowed_folders` from the live config.
    pub config_roots: Vec<PathBuf>,
    /// Resolved `file`/`read` targets declared by the plan.
    pub plan_roots: Vec<PathBuf>,
}

impl ReadScope {
    /// Build the scope for a plan against the current config snapshot.
    pub fn for_plan(config: &AppConfig, plan: &Plan) -> Self {
        let config_roots = config
            .allowed_folders
            .iter()
            .map(|folder| resolve_lenient(Path::new(folder)))
            .collect();
        let plan_roots = plan
            .required_permissions
            .iter()
            .filter(|perm| perm.scope_type == ScopeType::File && perm.mode == ScopeMode::Read)
            .flat_map(|perm| perm.targets.iter())
            .map(|target| resolve_lenient(Path::new(target)))
            .collect();
        Self {
            config_roots,
            plan_roots,
        }
    }

    /// Enforce the full scope ladder on `candidate`, returning the resolved
    /// path on success.
    pub fn check(&self, candidate: &Path) -> Result<PathBuf, PolicyError> {
        ensure_file_read_scope(candidate, &self.config_roots, &self.plan_roots)
    }
}
