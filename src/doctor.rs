//! Doctor report: a quick health snapshot of the host and configuration.
//!
//! Seven checks roll up into an overall status: any `fail` fails the report,
//! otherwise any `warn` degrades it. Host metrics come from `sysinfo`; none
//! of the checks mutate anything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sysinfo::{Disks, System};
use uuid::Uuid;

use crate::config::{AppConfig, DataPaths};
use crate::models::ModelsState;
use crate::types::{iso, iso_ts, now_utc};

const GIB: u64 = 1_073_741_824;
const RAM_OK_BYTES: u64 = 8_589_934_592;
const DISK_OK_BYTES: u64 = 2_147_483_648;

/// Identity of a doctor check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckName {
    /// CPU core availability.
    Cpu,
    /// Total system memory.
    Ram,
    /// Free space on the data-dir volume.
    Disk,
    /// A default model is configured.
    ModelInstalled,
    /// The default model's file exists.
    ModelLoadable,
    /// The backend itself responds.
    BackendHealth,
    /// At least one allowed folder is configured.
    PermissionsConfig,
}

impl std::fmt::Display for CheckName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CheckName::Cpu => "cpu",
            CheckName::Ram => "ram",
            CheckName::Disk => "disk",
            CheckName::ModelInstalled => "model_installed",
            CheckName::ModelLoadable => "model_loadable",
            CheckName::BackendHealth => "backend_health",
            CheckName::PermissionsConfig => "permissions_config",
        })
    }
}

/// Outcome class of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// Healthy.
    Ok,
    /// Degraded but usable.
    Warn,
    /// Broken.
    Fail,
}

/// One doctor check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorCheck {
    /// Check identity.
    pub name: CheckName,
    /// Outcome.
    pub status: CheckStatus,
    /// Human-readable detail line.
    pub details: String,
    /// Optional raw metrics.
    #[serde(default)]
    pub metrics: Option<serde_json::Value>,
    /// Suggested fix when degraded.
    #[serde(default)]
    pub recommendation: Option<String>,
}

/// Full doctor report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorReport {
    /// Report identifier.
    pub report_id: Uuid,
    /// Generation time.
    #[serde(with = "iso_ts")]
    pub generated_at: DateTime<Utc>,
    /// Worst status across checks.
    pub overall_status: CheckStatus,
    /// All checks, in a fixed order.
    pub checks: Vec<DoctorCheck>,
    /// One-line rollup.
    #[serde(default)]
    pub summary: Option<String>,
}

/// Render `bytes` as GiB with two decimals, without float conversion.
fn gib_string(bytes: u64) -> String {
    let scaled = bytes.saturating_mul(100).checked_div(GIB).unwrap_or(0);
    let whole = scaled.checked_div(100).unwrap_or(0);
    let frac = scaled.checked_rem(100).unwrap_or(0);
    format!("{whole}.{frac:02}")
}

/// Free/total bytes of the volume holding the data directory.
fn data_dir_disk(paths: &DataPaths) -> Option<(u64, u64)> {
    let target = crate::kernel::policy::resolve_lenient(&paths.root);
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| (disk.available_space(), disk.total_space()))
}

/// Generate the full report against the given state snapshots.
pub fn generate_report(
    config: &AppConfig,
    models: &ModelsState,
    paths: &DataPaths,
) -> DoctorReport {
    let mut checks: Vec<DoctorCheck> = Vec::new();
    let now = now_utc();

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    checks.push(DoctorCheck {
        name: CheckName::Cpu,
        status: CheckStatus::Ok,
        details: format!("CPU cores detected: {cpu_count}."),
        metrics: Some(json!({ "cpu_count": cpu_count })),
        recommendation: None,
    });

    let mut system = System::new();
    system.refresh_memory();
    let total_ram = system.total_memory();
    let (ram_status, ram_details, ram_metrics) = if total_ram > 0 {
        (
            if total_ram >= RAM_OK_BYTES {
                CheckStatus::Ok
            } else {
                CheckStatus::Warn
            },
            format!("Approx total RAM: {} GiB.", gib_string(total_ram)),
            Some(json!({ "total_bytes": total_ram })),
        )
    } else {
        (
            CheckStatus::Warn,
            String::from("Could not determine RAM precisely in this environment."),
            None,
        )
    };
    checks.push(DoctorCheck {
        name: CheckName::Ram,
        status: ram_status,
        details: ram_details,
        metrics: ram_metrics,
        recommendation: (ram_status != CheckStatus::Ok)
            .then(|| String::from("Use Low Resource profile on smaller systems.")),
    });

    match data_dir_disk(paths) {
        Some((free, total)) => {
            let healthy = free >= DISK_OK_BYTES;
            checks.push(DoctorCheck {
                name: CheckName::Disk,
                status: if healthy {
                    CheckStatus::Ok
                } else {
                    CheckStatus::Warn
                },
                details: format!(
                    "Free disk in data dir volume: {} GiB.",
                    gib_string(free)
                ),
                metrics: Some(json!({ "free_bytes": free, "total_bytes": total })),
                recommendation: (!healthy)
                    .then(|| String::from("Free up at least 2 GiB for model/cache stability.")),
            });
        }
        None => checks.push(DoctorCheck {
            name: CheckName::Disk,
            status: CheckStatus::Warn,
            details: String::from("Could not determine free disk for the data dir volume."),
            metrics: None,
            recommendation: Some(String::from(
                "Free up at least 2 GiB for model/cache stability.",
            )),
        }),
    }

    let default_entry = models.default_model_id.as_ref().and_then(|id| {
        models
            .installed_models
            .iter()
            .find(|entry| &entry.model_id == id)
    });
    let installed = default_entry.is_some();
    checks.push(DoctorCheck {
        name: CheckName::ModelInstalled,
        status: if installed {
            CheckStatus::Ok
        } else {
            CheckStatus::Warn
        },
        details: if installed {
            format!(
                "Default model: {}.",
                models.default_model_id.as_deref().unwrap_or_default()
            )
        } else {
            String::from("No default model configured.")
        },
        metrics: None,
        recommendation: (!installed)
            .then(|| String::from("Install/register a model and set it as default.")),
    });

    let loadable = default_entry
        .and_then(|entry| entry.local_path.as_ref())
        .is_some_and(|path| std::path::Path::new(path).exists());
    checks.push(DoctorCheck {
        name: CheckName::ModelLoadable,
        status: if loadable {
            CheckStatus::Ok
        } else {
            CheckStatus::Warn
        },
        details: if loadable {
            format!(
                "Default model file exists: {}.",
                default_entry
                    .and_then(|entry| entry.local_path.as_deref())
                    .unwrap_or_default()
            )
        } else {
            String::from(
                "Default model is missing a local file path or file does not exist.",
            )
        },
        metrics: None,
        recommendation: (!loadable)
            .then(|| String::from("Register a valid local model path or complete model download.")),
    });

    checks.push(DoctorCheck {
        name: CheckName::BackendHealth,
        status: CheckStatus::Ok,
        details: format!("Backend service is responding at {}.", iso(now)),
        metrics: None,
        recommendation: None,
    });

    let permissions_ok = !config.allowed_folders.is_empty();
    checks.push(DoctorCheck {
        name: CheckName::PermissionsConfig,
        status: if permissions_ok {
            CheckStatus::Ok
        } else {
            CheckStatus::Warn
        },
        details: if permissions_ok {
            format!(
                "Allowed folders configured: {}.",
                config.allowed_folders.len()
            )
        } else {
            String::from("No allowed folders configured.")
        },
        metrics: None,
        recommendation: (!permissions_ok).then(|| {
            String::from("Add at least one allowed folder in Settings -> Permissions.")
        }),
    });

    let overall = checks
        .iter()
        .map(|check| check.status)
        .max()
        .unwrap_or(CheckStatus::Ok);
    let ok_count = checks
        .iter()
        .filter(|c| c.status == CheckStatus::Ok)
        .count();
    let warn_count = checks
        .iter()
        .filter(|c| c.status == CheckStatus::Warn)
        .count();
    let fail_count = checks
        .iter()
        .filter(|c| c.status == CheckStatus::Fail)
        .count();
    let overall_label = match overall {
        CheckStatus::Ok => "OK",
        CheckStatus::Warn => "WARN",
        CheckStatus::Fail => "FAIL",
    };
    let summary = format!(
        "Doctor report: {overall_label} with {ok_count} ok, {warn_count} warn, {fail_count} fail checks."
    );

    DoctorReport {
        report_id: Uuid::new_v4(),
        generated_at: now,
        overall_status: overall,
        checks,
        summary: Some(summary),
    }
}

/// Render a report as the markdown export document.
pub fn report_to_markdown(report: &DoctorReport) -> String {
    let status_label = |status: CheckStatus| match status {
        CheckStatus::Ok => "ok",
        CheckStatus::Warn => "warn",
        CheckStatus::Fail => "fail",
    };
    let mut lines = vec![
        String::from("# Doctor Report"),
        format!("- Generated: {}", iso(report.generated_at)),
        format!("- Overall Status: {}", status_label(report.overall_status)),
        String::new(),
        String::from("## Checks"),
    ];
    for check in &report.checks {
        let recommendation = check
            .recommendation
            .as_ref()
            .map(|r| format!(" Recommendation: {r}"))
            .unwrap_or_default();
        lines.push(format!(
            "- **{}** [{}] {}{}",
            check.name,
            status_label(check.status),
            check.details,
            recommendation
        ));
    }
    if let Some(summary) = &report.summary {
        lines.push(String::new());
        lines.push(format!("Summary: {summary}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> (tempfile::TempDir, DataPaths) {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = DataPaths::under(dir.path().to_path_buf());
        (dir, paths)
    }

    #[test]
    fn test_report_has_all_seven_checks() {
        let (_dir, paths) = paths();
        let report = generate_report(&AppConfig::default(), &ModelsState::default(), &paths);
        assert_eq!(report.checks.len(), 7);
        let names: Vec<String> = report.checks.iter().map(|c| c.name.to_string()).collect();
        assert!(names.contains(&String::from("cpu")));
        assert!(names.contains(&String::from("permissions_config")));
    }

    #[test]
    fn test_empty_config_warns_on_permissions() {
        let (_dir, paths) = paths();
        let report = generate_report(&AppConfig::default(), &ModelsState::default(), &paths);
        let perms = report
            .checks
            .iter()
            .find(|c| c.name == CheckName::PermissionsConfig)
            .expect("permissions check");
        assert_eq!(perms.status, CheckStatus::Warn);
        assert!(perms.recommendation.is_some());
        assert_eq!(report.overall_status, CheckStatus::Warn);
    }

    #[test]
    fn test_configured_folder_passes_permissions() {
        let (_dir, paths) = paths();
        let config = AppConfig {
            allowed_folders: vec![String::from("/workspace")],
            ..AppConfig::default()
        };
        let report = generate_report(&config, &ModelsState::default(), &paths);
        let perms = report
            .checks
            .iter()
            .find(|c| c.name == CheckName::PermissionsConfig)
            .expect("permissions check");
        assert_eq!(perms.status, CheckStatus::Ok);
    }

    #[test]
    fn test_summary_counts_match() {
        let (_dir, paths) = paths();
        let report = generate_report(&AppConfig::default(), &ModelsState::default(), &paths);
        let summary = report.summary.expect("summary");
        assert!(summary.starts_with("Doctor report:"));
        assert!(summary.contains("fail checks."));
    }

    #[test]
    fn test_gib_string_two_decimals() {
        assert_eq!(gib_string(GIB), "1.00");
        assert_eq!(gib_string(2_684_354_560), "2.50");
        assert_eq!(gib_string(0), "0.00");
    }

    #[test]
    fn test_markdown_export_shape() {
        let (_dir, paths) = paths();
        let report = generate_report(&AppConfig::default(), &ModelsState::default(), &paths);
        let md = report_to_markdown(&report);
        assert!(md.starts_with("# Doctor Report"));
        assert!(md.contains("## Checks"));
        assert!(md.contains("- **cpu** [ok]"));
        assert!(md.contains("Summary: Doctor report:"));
    }
}
