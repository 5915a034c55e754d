//! Plan executor: drives steps, appends trace events, persists the outcome.
//!
//! Two failure families leave here. Policy-class failures (scope, tokens,
//! allow-listing, malformed steps) persist a failed trace and surface as an
//! HTTP error, so no partial execution is ever committed silently. Runtime
//! failures inside an approved step persist a failed trace and return it as
//! a normal response body. Timeouts short-circuit with a `timeout` trace.

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::file::{self, FileAgentError, SearchParams};
use crate::agents::shell::{self, ShellAgentError};
use crate::agents::ReadScope;
use crate::config::AppConfig;
use crate::kernel::approval::{ApprovalError, ApprovalStore};
use crate::kernel::policy::PolicyError;
use crate::kernel::trace::{StoreError, TraceStore};
use crate::logstore::BackendLog;
use crate::types::{
    now_utc, EventLevel, Plan, ReadTextInputs, SearchInputs, SideEffects, Step, StepInputs,
    TaskEvent, TaskStatus, TaskTrace,
};

/// Failures surfaced to the client as HTTP errors (the failed trace, when
/// one exists, has already been persisted).
#[derive(Debug, Error)]
pub enum ExecError {
    /// Policy refused the execution.
    #[error("{0}")]
    Forbidden(String),
    /// The plan or a step was malformed.
    #[error("{0}")]
    BadRequest(String),
    /// Persistence failed.
    #[error("{0}")]
    Internal(String),
}

/// Outcome of one dispatched step.
enum StepFlow {
    Continue,
    /// A shell step timed out; the task ends with status `timeout`.
    Timeout,
}

/// Step failure classification.
enum StepFailure {
    /// Surfaced as an HTTP error after the trace is persisted.
    Http(ExecError),
    /// Recorded in the trace; the response stays 200.
    Runtime(String),
}

impl From<FileAgentError> for StepFailure {
    fn from(e: FileAgentError) -> Self {
        match e {
            FileAgentError::Policy(denied) => {
                StepFailure::Http(ExecError::Forbidden(denied.to_string()))
            }
            FileAgentError::Walk { .. } => StepFailure::Runtime(e.to_string()),
            other => StepFailure::Http(ExecError::BadRequest(other.to_string())),
        }
    }
}

impl From<ShellAgentError> for StepFailure {
    fn from(e: ShellAgentError) -> Self {
        match e {
            ShellAgentError::Policy(denied) => {
                StepFailure::Http(ExecError::Forbidden(denied.to_string()))
            }
            other => StepFailure::Http(ExecError::BadRequest(other.to_string())),
        }
    }
}

/// Drives approved plans through the agents.
pub struct Executor {
    approvals: Arc<ApprovalStore>,
    traces: Arc<TraceStore>,
    log: Arc<BackendLog>,
}

impl Executor {
    /// Create an executor over the shared stores.
    pub fn new(approvals: Arc<ApprovalStore>, traces: Arc<TraceStore>, log: Arc<BackendLog>) -> Self {
        Self {
            approvals,
            traces,
            log,
        }
    }

    /// Execute a plan, consuming `approval_token_id` when the plan needs one.
    ///
    /// Returns the terminal trace for 200 responses (`completed`, `failed`,
    /// `timeout`); policy-class refusals come back as [`ExecError`].
    pub async fn execute(
        &self,
        plan: &Plan,
        approval_token_id: Option<Uuid>,
        config: &AppConfig,
    ) -> Result<TaskTrace, ExecError> {
        let mut trace = TaskTrace {
            task_id: Uuid::new_v4(),
            plan_id: plan.plan_id,
            status: TaskStatus::Running,
            started_at: now_utc(),
            ended_at: None,
            agent: plan.steps.first().map(|step| step.agent),
            events: Vec::new(),
            error: None,
        };

        // A dry-run plan with side effects is refused outright; no trace is
        // persisted because nothing was attempted.
        if plan.dry_run && plan.has_side_effects() {
            return Err(ExecError::Forbidden(String::from(
                "Dry-run plans cannot execute side-effect steps",
            )));
        }

        let token_required = plan.requires_approval || plan.has_side_effects();
        if token_required {
            let token_id = approval_token_id
                .ok_or_else(|| ExecError::Forbidden(ApprovalError::Required.to_string()))?;
            let token = self
                .approvals
                .consume(plan.plan_id, token_id)
                .map_err(|e| ExecError::Forbidden(e.to_string()))?;
            push_event(
                &mut trace,
                EventLevel::Info,
                None,
                "Approval token validated",
                Some(json!({ "token_id": token.token_id })),
            );
            self.log.append(
                "info",
                &format!("approval token validated for task {}", trace.task_id),
            );
        }

        let scope = ReadScope::for_plan(config, plan);

        for step in &plan.steps {
            push_event(
                &mut trace,
                EventLevel::Info,
                Some(&step.step_id),
                &format!("Executing {}", step.action),
                Some(json!({ "preview": step.preview })),
            );
            match self.dispatch(step, config, &scope, &mut trace).await {
                Ok(StepFlow::Continue) => {}
                Ok(StepFlow::Timeout) => {
                    trace.status = TaskStatus::Timeout;
                    trace.ended_at = Some(now_utc());
                    self.persist(&trace)?;
                    self.log
                        .append("warn", &format!("task {} timed out", trace.task_id));
                    warn!(task_id = %trace.task_id, "task timed out");
                    return Ok(trace);
                }
                Err(StepFailure::Http(error)) => {
                    trace.status = TaskStatus::Failed;
                    trace.error = Some(String::from("HTTP exception during execution"));
                    trace.ended_at = Some(now_utc());
                    self.persist(&trace)?;
                    self.log.append(
                        "warn",
                        &format!("task {} denied: {error}", trace.task_id),
                    );
                    return Err(error);
                }
                Err(StepFailure::Runtime(message)) => {
                    trace.status = TaskStatus::Failed;
                    trace.error = Some(message.clone());
                    trace.ended_at = Some(now_utc());
                    push_event(
                        &mut trace,
                        EventLevel::Error,
                        None,
                        "Execution failed",
                        Some(json!({ "error": message })),
                    );
                    self.persist(&trace)?;
                    self.log.append(
                        "error",
                        &format!("task {} failed: {message}", trace.task_id),
                    );
                    return Ok(trace);
                }
            }
        }

        trace.status = TaskStatus::Completed;
        trace.ended_at = Some(now_utc());
        self.persist(&trace)?;
        self.log
            .append("info", &format!("task {} completed", trace.task_id));
        info!(task_id = %trace.task_id, "task completed");
        Ok(trace)
    }

    fn persist(&self, trace: &TaskTrace) -> Result<(), ExecError> {
        self.traces
            .persist(trace)
            .map_err(|e: StoreError| ExecError::Internal(e.to_string()))
    }

    async fn dispatch(
        &self,
        step: &Step,
        config: &AppConfig,
        scope: &ReadScope,
        trace: &mut TaskTrace,
    ) -> Result<StepFlow, StepFailure> {
        match (step.action.as_str(), &step.inputs) {
            ("conversation.respond", StepInputs::Respond(inputs)) => {
                let response = format!("Echo: {}", inputs.prompt);
                push_event(
                    trace,
                    EventLevel::Info,
                    Some(&step.step_id),
                    "Conversation response generated",
                    Some(json!({ "response": response })),
                );
                self.log.append(
                    "info",
                    &format!("task {} conversation response generated", trace.task_id),
                );
                Ok(StepFlow::Continue)
            }
            ("file.search", StepInputs::Search(inputs)) => {
                self.run_search(step, inputs, scope, trace)
            }
            ("file.read_text", StepInputs::ReadText(inputs)) => {
                self.run_read_text(step, inputs, scope, trace)
            }
            ("shell.exec", StepInputs::Exec(inputs)) => {
                if step.side_effects != SideEffects::Exec {
                    return Err(StepFailure::Http(ExecError::Forbidden(
                        PolicyError::WrongSideEffects.to_string(),
                    )));
                }
                let outcome = shell::run(inputs, scope, config.shell.enabled, &self.log)
                    .await
                    .map_err(StepFailure::from)?;
                push_event(
                    trace,
                    EventLevel::Info,
                    Some(&step.step_id),
                    "shell command preview",
                    Some(json!({ "argv": outcome.argv, "cwd": outcome.cwd })),
                );
                push_event(
                    trace,
                    EventLevel::Info,
                    Some(&step.step_id),
                    "shell command completed",
                    Some(json!({
                        "exit_code": outcome.exit_code,
                        "timed_out": outcome.timed_out,
                        "truncated": outcome.truncated,
                        "output": outcome.output,
                    })),
                );
                if outcome.truncated {
                    push_event(
                        trace,
                        EventLevel::Warn,
                        Some(&step.step_id),
                        "shell output truncated",
                        Some(json!({ "max_output_chars": outcome.max_output_chars })),
                    );
                }
                if outcome.timed_out {
                    return Ok(StepFlow::Timeout);
                }
                Ok(StepFlow::Continue)
            }
            (action, _) => Err(StepFailure::Http(ExecError::BadRequest(format!(
                "Unsupported action: {action}"
            )))),
        }
    }

    fn run_search(
        &self,
        step: &Step,
        inputs: &SearchInputs,
        scope: &ReadScope,
        trace: &mut TaskTrace,
    ) -> Result<StepFlow, StepFailure> {
        let root = inputs
            .root
            .clone()
            .or_else(|| inputs.folder.clone())
            .unwrap_or_else(|| {
                std::env::current_dir()
                    .unwrap_or_else(|_| std::path::PathBuf::from("."))
                    .to_string_lossy()
                    .into_owned()
            });
        let params = SearchParams {
            root: root.clone(),
            query: inputs.query.clone().unwrap_or_else(|| String::from("TODO")),
            globs: inputs.globs.clone().unwrap_or_default(),
            max_results: inputs.max_results.or(inputs.limit).unwrap_or(10),
            max_snippet_chars: inputs.max_snippet_chars.unwrap_or(240),
        };
        push_event(
            trace,
            EventLevel::Info,
            Some(&step.step_id),
            "search started",
            Some(json!({
                "root": root,
                "query": params.query,
                "max_results": params.max_results,
            })),
        );

        let report = file::search(&params, scope).map_err(StepFailure::from)?;

        push_event(
            trace,
            EventLevel::Info,
            Some(&step.step_id),
            &format!("scanned {} files", report.scanned_files),
            Some(json!({
                "scanned_files": report.scanned_files,
                "skipped_pattern_files": report.skipped_pattern_files,
                "skipped_binary_files": report.skipped_binary_files,
            })),
        );
        for warning in &report.warnings {
            push_event(trace, EventLevel::Warn, Some(&step.step_id), warning, None);
        }
        push_event(
            trace,
            EventLevel::Info,
            Some(&step.step_id),
            &format!("search completed in {} ms", report.elapsed_ms),
            Some(json!({
                "count": report.results.len(),
                "results": report.results,
                "elapsed_ms": report.elapsed_ms,
            })),
        );
        self.log.append(
            "info",
            &format!(
                "task {} search completed count={} elapsed_ms={}",
                trace.task_id,
                report.results.len(),
                report.elapsed_ms
            ),
        );
        Ok(StepFlow::Continue)
    }

    fn run_read_text(
        &self,
        step: &Step,
        inputs: &ReadTextInputs,
        scope: &ReadScope,
        trace: &mut TaskTrace,
    ) -> Result<StepFlow, StepFailure> {
        let path = inputs.path.clone().unwrap_or_default();
        let max_chars = inputs.max_chars.unwrap_or(20_000);
        let report = file::read_text(&path, max_chars, scope).map_err(StepFailure::from)?;
        push_event(
            trace,
            EventLevel::Info,
            Some(&step.step_id),
            "file read completed",
            serde_json::to_value(&report).ok(),
        );
        self.log.append(
            "info",
            &format!("task {} file read completed", trace.task_id),
        );
        Ok(StepFlow::Continue)
    }
}

fn push_event(
    trace: &mut TaskTrace,
    level: EventLevel,
    step_id: Option<&str>,
    message: &str,
    details: Option<serde_json::Value>,
) {
    trace.events.push(TaskEvent {
        timestamp: now_utc(),
        level,
        step_id: step_id.map(ToOwned::to_owned),
        message: message.to_owned(),
        details,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShellConfig;
    use crate::kernel::router::{build_plan, PlanRequest};
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        workspace: std::path::PathBuf,
        executor: Executor,
        approvals: Arc<ApprovalStore>,
        traces: Arc<TraceStore>,
        config: AppConfig,
    }

    fn fixture(shell_enabled: bool) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = dir.path().join("workspace");
        std::fs::create_dir_all(&workspace).expect("mkdir");
        let approvals = Arc::new(ApprovalStore::new());
        let traces = Arc::new(TraceStore::new(dir.path().join("tasks")));
        let log = Arc::new(BackendLog::new(dir.path().join("backend.log")));
        let executor = Executor::new(Arc::clone(&approvals), Arc::clone(&traces), log);
        let config = AppConfig {
            allowed_folders: vec![workspace.to_string_lossy().into_owned()],
            shell: ShellConfig {
                enabled: shell_enabled,
            },
            history_enabled: true,
        };
        Fixture {
            _dir: dir,
            workspace,
            executor,
            approvals,
            traces,
            config,
        }
    }

    fn search_plan(workspace: &Path) -> Plan {
        build_plan(&PlanRequest {
            prompt: String::from("search my project folder for 'TODO'"),
            allowed_folders: vec![workspace.to_string_lossy().into_owned()],
            dry_run: true,
        })
    }

    fn shell_plan(workspace: &Path, command: &str) -> Plan {
        serde_json::from_value(serde_json::json!({
            "plan_id": Uuid::new_v4(),
            "created_at": "2026-02-20T00:00:00Z",
            "user_intent_summary": format!("Run {command}"),
            "requires_approval": true,
            "required_permissions": [
                {"type": "file", "mode": "read", "targets": [workspace.to_string_lossy()]},
                {"type": "shell", "mode": "exec", "targets": [command]}
            ],
            "steps": [{
                "step_id": "s1",
                "agent": "shell",
                "action": "shell.exec",
                "inputs": {
                    "command": command,
                    "cwd": workspace.to_string_lossy(),
                    "timeout_ms": 10_000,
                    "max_output_chars": 20_000
                },
                "side_effects": "exec",
                "preview": format!("Run {command}")
            }],
            "estimated_risk": "medium",
            "dry_run": false,
            "router_confidence": 0.95,
            "router_fallback_used": false,
            "explain": "shell execution"
        }))
        .expect("plan")
    }

    #[tokio::test]
    async fn test_conversation_plan_runs_without_token() {
        let fx = fixture(false);
        let plan = build_plan(&PlanRequest {
            prompt: String::from("hello there"),
            allowed_folders: Vec::new(),
            dry_run: true,
        });
        let trace = fx
            .executor
            .execute(&plan, None, &fx.config)
            .await
            .expect("execute");
        assert_eq!(trace.status, TaskStatus::Completed);
        assert!(trace
            .events
            .iter()
            .any(|e| e.message == "Conversation response generated"));
    }

    #[tokio::test]
    async fn test_search_plan_requires_token() {
        let fx = fixture(false);
        std::fs::write(fx.workspace.join("a.txt"), "TODO").expect("write");
        let plan = search_plan(&fx.workspace);

        let denied = fx.executor.execute(&plan, None, &fx.config).await;
        assert!(matches!(denied, Err(ExecError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_search_plan_completes_with_token() {
        let fx = fixture(false);
        std::fs::write(fx.workspace.join("a.txt"), "a TODO item").expect("write");
        let plan = search_plan(&fx.workspace);
        let token = fx.approvals.issue(plan.plan_id);

        let trace = fx
            .executor
            .execute(&plan, Some(token.token_id), &fx.config)
            .await
            .expect("execute");
        assert_eq!(trace.status, TaskStatus::Completed);
        assert!(trace
            .events
            .iter()
            .any(|e| e.message == "Approval token validated"));
        assert!(trace
            .events
            .iter()
            .any(|e| e.message.starts_with("search completed in")));

        // The persisted document matches what the caller got.
        let loaded = fx.traces.load(trace.task_id).expect("load");
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(loaded.events.len(), trace.events.len());
    }

    #[tokio::test]
    async fn test_token_single_use_across_executions() {
        let fx = fixture(false);
        std::fs::write(fx.workspace.join("a.txt"), "TODO").expect("write");
        let plan = search_plan(&fx.workspace);
        let token = fx.approvals.issue(plan.plan_id);

        let first = fx
            .executor
            .execute(&plan, Some(token.token_id), &fx.config)
            .await
            .expect("first run");
        assert_eq!(first.status, TaskStatus::Completed);

        let second = fx
            .executor
            .execute(&plan, Some(token.token_id), &fx.config)
            .await;
        match second {
            Err(ExecError::Forbidden(message)) => {
                assert!(message.contains("already used"), "{message}");
            }
            other => panic!("expected forbidden, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_token_bound_to_plan() {
        let fx = fixture(false);
        std::fs::write(fx.workspace.join("a.txt"), "TODO").expect("write");
        let plan = search_plan(&fx.workspace);
        let other_token = fx.approvals.issue(Uuid::new_v4());

        let result = fx
            .executor
            .execute(&plan, Some(other_token.token_id), &fx.config)
            .await;
        assert!(matches!(result, Err(ExecError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_dry_run_with_side_effects_is_refused() {
        let fx = fixture(true);
        let mut plan = shell_plan(&fx.workspace, "pwd");
        plan.dry_run = true;
        let token = fx.approvals.issue(plan.plan_id);

        let result = fx
            .executor
            .execute(&plan, Some(token.token_id), &fx.config)
            .await;
        match result {
            Err(ExecError::Forbidden(message)) => {
                assert!(message.contains("Dry-run"), "{message}");
            }
            other => panic!("expected forbidden, got {other:?}"),
        }
        // Refused before anything ran: the token must still be unconsumed.
        assert!(fx.approvals.consume(plan.plan_id, token.token_id).is_ok());
    }

    #[tokio::test]
    async fn test_shell_step_completes_and_persists() {
        let fx = fixture(true);
        let plan = shell_plan(&fx.workspace, "pwd");
        let token = fx.approvals.issue(plan.plan_id);

        let trace = fx
            .executor
            .execute(&plan, Some(token.token_id), &fx.config)
            .await
            .expect("execute");
        assert_eq!(trace.status, TaskStatus::Completed);
        assert!(trace
            .events
            .iter()
            .any(|e| e.message == "shell command completed"));
        let index = fx.traces.index().expect("index");
        assert_eq!(index[0].task_id, trace.task_id);
    }

    #[tokio::test]
    async fn test_shell_operator_denied_with_failed_trace() {
        let fx = fixture(true);
        let plan = shell_plan(&fx.workspace, "ls && whoami");
        let token = fx.approvals.issue(plan.plan_id);

        let result = fx
            .executor
            .execute(&plan, Some(token.token_id), &fx.config)
            .await;
        assert!(matches!(result, Err(ExecError::Forbidden(_))));

        // The denial is committed to history before the error surfaces.
        let index = fx.traces.index().expect("index");
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].status, TaskStatus::Failed);
        let persisted = fx.traces.load(index[0].task_id).expect("load");
        assert_eq!(
            persisted.error.as_deref(),
            Some("HTTP exception during execution")
        );
    }

    #[tokio::test]
    async fn test_shell_disabled_is_forbidden() {
        let fx = fixture(false);
        let plan = shell_plan(&fx.workspace, "pwd");
        let token = fx.approvals.issue(plan.plan_id);

        let result = fx
            .executor
            .execute(&plan, Some(token.token_id), &fx.config)
            .await;
        match result {
            Err(ExecError::Forbidden(message)) => {
                assert!(message.contains("Shell is disabled"), "{message}");
            }
            other => panic!("expected forbidden, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_timeout_yields_timeout_trace() {
        use std::os::unix::fs::PermissionsExt;

        let fx = fixture(true);
        // Shadow `python` with a script that sleeps far past any budget.
        // The entry is prepended, so every other binary resolves as before.
        let bin = fx._dir.path().join("bin");
        std::fs::create_dir_all(&bin).expect("mkdir bin");
        let fake = bin.join("python");
        std::fs::write(&fake, "#!/bin/sh\nsleep 5\n").expect("write script");
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");
        let path = std::env::var("PATH").unwrap_or_default();
        std::env::set_var("PATH", format!("{}:{path}", bin.display()));

        let mut plan = shell_plan(&fx.workspace, "python --version");
        if let StepInputs::Exec(inputs) = &mut plan.steps[0].inputs {
            inputs.timeout_ms = Some(100);
        }
        let token = fx.approvals.issue(plan.plan_id);

        let trace = fx
            .executor
            .execute(&plan, Some(token.token_id), &fx.config)
            .await
            .expect("execute");
        assert_eq!(trace.status, TaskStatus::Timeout);
        let completed = trace
            .events
            .iter()
            .find(|e| e.message == "shell command completed")
            .expect("completion event");
        let details = completed.details.as_ref().expect("details");
        assert_eq!(details["exit_code"], 124);
        assert_eq!(details["timed_out"], true);

        let persisted = fx.traces.load(trace.task_id).expect("load");
        assert_eq!(persisted.status, TaskStatus::Timeout);
    }

    #[tokio::test]
    async fn test_unsupported_action_is_bad_request() {
        let fx = fixture(false);
        let plan: Plan = serde_json::from_value(serde_json::json!({
            "plan_id": Uuid::new_v4(),
            "created_at": "2026-02-20T00:00:00Z",
            "user_intent_summary": "t",
            "requires_approval": false,
            "required_permissions": [],
            "steps": [{
                "step_id": "s1",
                "agent": "browser",
                "action": "browser.open",
                "inputs": {"url": "https://example.com"},
                "side_effects": "none",
                "preview": "Open"
            }],
            "estimated_risk": "low",
            "dry_run": true,
            "router_confidence": 0.9,
            "router_fallback_used": false,
            "explain": "t"
        }))
        .expect("plan");

        let result = fx.executor.execute(&plan, None, &fx.config).await;
        match result {
            Err(ExecError::BadRequest(message)) => {
                assert!(message.contains("Unsupported action"), "{message}");
            }
            other => panic!("expected bad request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_outside_plan_scope_is_forbidden() {
        let fx = fixture(false);
        let outside = tempfile::tempdir().expect("tempdir");
        let secret = outside.path().join("secret.txt");
        std::fs::write(&secret, "s").expect("write");

        let plan: Plan = serde_json::from_value(serde_json::json!({
            "plan_id": Uuid::new_v4(),
            "created_at": "2026-02-20T00:00:00Z",
            "user_intent_summary": "read",
            "requires_approval": true,
            "required_permissions": [
                {"type": "file", "mode": "read", "targets": [fx.workspace.to_string_lossy()]}
            ],
            "steps": [{
                "step_id": "s1",
                "agent": "file",
                "action": "file.read_text",
                "inputs": {"path": secret.to_string_lossy(), "max_chars": 100},
                "side_effects": "none",
                "preview": "Read secret"
            }],
            "estimated_risk": "low",
            "dry_run": false,
            "router_confidence": 0.9,
            "router_fallback_used": false,
            "explain": "t"
        }))
        .expect("plan");
        let token = fx.approvals.issue(plan.plan_id);

        let result = fx
            .executor
            .execute(&plan, Some(token.token_id), &fx.config)
            .await;
        assert!(matches!(result, Err(ExecError::Forbidden(_))));
    }
}
