//! HTTP transport: shared state, router construction, and the serve loop.
//!
//! The service binds to loopback only. All `/v1/*` routes sit behind the
//! bearer middleware; CORS is wide open because the only expected caller is
//! a local UI.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::config::{self, AppConfig, DataPaths};
use crate::kernel::approval::ApprovalStore;
use crate::kernel::executor::Executor;
use crate::kernel::trace::TraceStore;
use crate::logstore::BackendLog;
use crate::models::{self, ModelsState};
use crate::types::Plan;

pub mod auth;
pub mod error;
pub mod handlers;

/// Backend version reported by `/v1/version`.
pub const APP_VERSION: &str = "0.1.0-mvp";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8765;

/// Process-wide shared state behind the handlers.
pub struct AppState {
    /// Bearer token every `/v1/*` request must present.
    pub api_token: String,
    /// Resolved data-directory layout.
    pub paths: DataPaths,
    /// Live config; replaced wholesale on reload.
    pub config: Mutex<AppConfig>,
    /// Live model registry.
    pub models: Mutex<ModelsState>,
    /// Plans emitted by the router, keyed by plan id.
    pub plans: Mutex<HashMap<Uuid, Plan>>,
    /// Approval token store.
    pub approvals: Arc<ApprovalStore>,
    /// Task trace store.
    pub traces: Arc<TraceStore>,
    /// User-visible backend log.
    pub log: Arc<BackendLog>,
    /// Plan executor.
    pub executor: Executor,
}

impl AppState {
    /// Load persisted state and wire up the component graph.
    ///
    /// # Errors
    ///
    /// Returns an error when the config or models registry on disk is
    /// corrupt, or the task store cannot be created.
    pub fn initialize(paths: DataPaths, api_token: String) -> anyhow::Result<Arc<Self>> {
        let config = config::load_from_disk(&paths)?;
        let models = models::load_state(&paths)?;
        let traces = Arc::new(TraceStore::new(paths.tasks_dir.clone()));
        traces.ensure()?;
        let log = Arc::new(BackendLog::new(paths.backend_log.clone()));
        let approvals = Arc::new(ApprovalStore::new());
        let executor = Executor::new(
            Arc::clone(&approvals),
            Arc::clone(&traces),
            Arc::clone(&log),
        );
        Ok(Arc::new(Self {
            api_token,
            paths,
            config: Mutex::new(config),
            models: Mutex::new(models),
            plans: Mutex::new(HashMap::new()),
            approvals,
            traces,
            log,
            executor,
        }))
    }

    /// Deep-copied config snapshot; readers never observe a torn reload.
    pub fn config_snapshot(&self) -> AppConfig {
        self.config
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Deep-copied models snapshot.
    pub fn models_snapshot(&self) -> ModelsState {
        self.models
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Look up a stored plan by id.
    pub fn stored_plan(&self, plan_id: Uuid) -> Option<Plan> {
        self.plans
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&plan_id)
            .cloned()
    }

    /// Store a freshly routed plan.
    pub fn store_plan(&self, plan: Plan) {
        self.plans
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(plan.plan_id, plan);
    }
}

/// Build the full application router over the shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(handlers::get_health))
        .route("/v1/version", get(handlers::get_version))
        .route("/v1/config", get(handlers::get_config))
        .route("/v1/config/reload", post(handlers::post_config_reload))
        .route("/v1/models", get(handlers::get_models))
        .route("/v1/models/download", post(handlers::post_models_download))
        .route(
            "/v1/models/set-default",
            post(handlers::post_models_set_default),
        )
        .route("/v1/doctor/report", get(handlers::get_doctor_report))
        .route(
            "/v1/doctor/report/export",
            get(handlers::get_doctor_report_export),
        )
        .route("/v1/router/plan", post(handlers::post_router_plan))
        .route(
            "/v1/approvals/action-card",
            post(handlers::post_action_card),
        )
        .route(
            "/v1/approvals/issue-token",
            post(handlers::post_issue_token),
        )
        .route("/v1/tasks/execute", post(handlers::post_tasks_execute))
        .route("/v1/tasks", get(handlers::get_tasks))
        .route("/v1/tasks/:task_id", get(handlers::get_task))
        .route("/v1/tasks/:task_id/export", get(handlers::get_task_export))
        .route("/v1/logs/tail", get(handlers::get_logs_tail))
        .route("/v1/logs/search", get(handlers::get_logs_search))
        .route("/v1/logs/export", post(handlers::post_logs_export))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_bearer,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on loopback at `port` until the process exits.
pub async fn serve(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    let app = router(state);
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "backend listening");
    axum::serve(listener, app).await?;
    Ok(())
}
