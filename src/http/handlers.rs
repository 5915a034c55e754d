//! Request handlers for every `/v1` endpoint.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config;
use crate::doctor;
use crate::kernel::card::{action_card_from_plan, ActionCard};
use crate::kernel::router::{build_plan, PlanRequest};
use crate::kernel::trace::trace_to_markdown;
use crate::logstore::LogExportFormat;
use crate::models::{self, ModelDownloadRequest, ModelSetDefaultRequest, ModelsState};
use crate::types::{iso, now_utc, Plan, TaskSummary, TaskTrace};

use super::error::ApiError;
use super::{AppState, APP_VERSION};

/// Export rendering for report/trace downloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Markdown document.
    Md,
    /// Raw JSON document.
    #[default]
    Json,
}

#[derive(Debug, Deserialize)]
pub(super) struct ExportQuery {
    #[serde(default)]
    format: ExportFormat,
}

#[derive(Debug, Deserialize)]
pub(super) struct TailQuery {
    #[serde(default = "default_tail_lines")]
    lines: u64,
}

fn default_tail_lines() -> u64 {
    200
}

#[derive(Debug, Deserialize)]
pub(super) struct LogsSearchQuery {
    q: String,
    #[serde(default = "default_search_limit")]
    limit: u64,
}

fn default_search_limit() -> u64 {
    200
}

#[derive(Debug, Deserialize)]
pub(super) struct LogsExportRequest {
    #[serde(default = "default_redact")]
    redact_paths: bool,
    #[serde(default = "default_log_format")]
    format: LogExportFormat,
}

fn default_redact() -> bool {
    true
}

fn default_log_format() -> LogExportFormat {
    LogExportFormat::Txt
}

#[derive(Debug, Deserialize)]
pub(super) struct PlanIdRequest {
    plan_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub(super) struct ExecuteTaskRequest {
    plan: Plan,
    #[serde(default)]
    approval_token_id: Option<Uuid>,
}

// ── Service meta ────────────────────────────────────────────────

pub(super) async fn get_health() -> Json<Value> {
    Json(json!({ "status": "ok", "time": iso(now_utc()) }))
}

pub(super) async fn get_version() -> Json<Value> {
    Json(json!({ "version": APP_VERSION }))
}

// ── Config ──────────────────────────────────────────────────────

pub(super) async fn get_config(
    State(state): State<Arc<AppState>>,
) -> Json<config::AppConfig> {
    Json(state.config_snapshot())
}

pub(super) async fn post_config_reload(
    State(state): State<Arc<AppState>>,
) -> Result<Json<config::AppConfig>, ApiError> {
    let reloaded = config::load_from_disk(&state.paths)?;
    *state
        .config
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner) = reloaded.clone();
    Ok(Json(reloaded))
}

// ── Models ──────────────────────────────────────────────────────

pub(super) async fn get_models(State(state): State<Arc<AppState>>) -> Json<ModelsState> {
    Json(state.models_snapshot())
}

pub(super) async fn post_models_download(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModelDownloadRequest>,
) -> Result<Json<ModelsState>, ApiError> {
    let mut registry = state
        .models
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    models::register_model(&mut registry, &request)?;
    models::write_state(&state.paths, &registry)?;
    Ok(Json(registry.clone()))
}

pub(super) async fn post_models_set_default(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModelSetDefaultRequest>,
) -> Result<Json<ModelsState>, ApiError> {
    let mut registry = state
        .models
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    models::set_default(&mut registry, &request.model_id)?;
    models::write_state(&state.paths, &registry)?;
    Ok(Json(registry.clone()))
}

// ── Doctor ──────────────────────────────────────────────────────

pub(super) async fn get_doctor_report(
    State(state): State<Arc<AppState>>,
) -> Json<doctor::DoctorReport> {
    let report = doctor::generate_report(
        &state.config_snapshot(),
        &state.models_snapshot(),
        &state.paths,
    );
    state.log.append(
        "info",
        &format!(
            "doctor report generated: {}",
            match report.overall_status {
                doctor::CheckStatus::Ok => "ok",
                doctor::CheckStatus::Warn => "warn",
                doctor::CheckStatus::Fail => "fail",
            }
        ),
    );
    Json(report)
}

pub(super) async fn get_doctor_report_export(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> Result<Json<Value>, ApiError> {
    let report = doctor::generate_report(
        &state.config_snapshot(),
        &state.models_snapshot(),
        &state.paths,
    );
    let payload = match query.format {
        ExportFormat::Md => json!({
            "format": "md",
            "content": doctor::report_to_markdown(&report),
            "file_name": format!("doctor-{}.md", report.report_id),
        }),
        ExportFormat::Json => json!({
            "format": "json",
            "content": serde_json::to_value(&report)
                .map_err(|e| ApiError::Internal(e.to_string()))?,
            "file_name": format!("doctor-{}.json", report.report_id),
        }),
    };
    Ok(Json(payload))
}

// ── Planning and approvals ──────────────────────────────────────

pub(super) async fn post_router_plan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PlanRequest>,
) -> Json<Plan> {
    let plan = build_plan(&request);
    state.store_plan(plan.clone());
    Json(plan)
}

pub(super) async fn post_action_card(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PlanIdRequest>,
) -> Result<Json<ActionCard>, ApiError> {
    let plan = state
        .stored_plan(request.plan_id)
        .ok_or_else(|| ApiError::NotFound(String::from("Plan not found")))?;
    Ok(Json(action_card_from_plan(&plan)))
}

pub(super) async fn post_issue_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PlanIdRequest>,
) -> Result<Json<crate::types::ApprovalToken>, ApiError> {
    if state.stored_plan(request.plan_id).is_none() {
        return Err(ApiError::NotFound(String::from("Plan not found")));
    }
    Ok(Json(state.approvals.issue(request.plan_id)))
}

// ── Execution and task history ──────────────────────────────────

pub(super) async fn post_tasks_execute(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteTaskRequest>,
) -> Result<Json<TaskTrace>, ApiError> {
    // Prefer the stored copy so a tampered body cannot widen an approved plan.
    let plan = state
        .stored_plan(request.plan.plan_id)
        .unwrap_or(request.plan);
    let config = state.config_snapshot();
    let trace = state
        .executor
        .execute(&plan, request.approval_token_id, &config)
        .await?;
    Ok(Json(trace))
}

pub(super) async fn get_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TaskSummary>>, ApiError> {
    Ok(Json(state.traces.index()?))
}

pub(super) async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskTrace>, ApiError> {
    Ok(Json(state.traces.load(task_id)?))
}

pub(super) async fn get_task_export(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> Result<Json<Value>, ApiError> {
    let trace = state.traces.load(task_id)?;
    let payload = match query.format {
        ExportFormat::Md => json!({
            "format": "md",
            "content": trace_to_markdown(&trace),
            "file_name": format!("task-{task_id}.md"),
        }),
        ExportFormat::Json => json!({
            "format": "json",
            "content": serde_json::to_value(&trace)
                .map_err(|e| ApiError::Internal(e.to_string()))?,
            "file_name": format!("task-{task_id}.json"),
        }),
    };
    Ok(Json(payload))
}

// ── Logs ────────────────────────────────────────────────────────

pub(super) async fn get_logs_tail(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TailQuery>,
) -> Json<Value> {
    Json(json!({ "lines": state.log.tail(query.lines) }))
}

pub(super) async fn get_logs_search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsSearchQuery>,
) -> Json<Value> {
    Json(json!({ "matches": state.log.search(&query.q, query.limit) }))
}

pub(super) async fn post_logs_export(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LogsExportRequest>,
) -> Json<Value> {
    let config = state.config_snapshot();
    let content = state.log.export(
        request.format,
        request.redact_paths,
        &state.paths.root,
        &config.allowed_folders,
    );
    let format = match request.format {
        LogExportFormat::Txt => "txt",
        LogExportFormat::Jsonl => "jsonl",
    };
    Json(json!({ "format": format, "content": content }))
}
