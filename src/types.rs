//! Core wire types shared across the planning, approval, and execution layers.
//!
//! Every timestamp in the system comes from a single UTC clock and is
//! serialized at second precision with a trailing `Z` so on-disk documents,
//! API responses, and token expiry math all agree.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Current time on the shared UTC clock.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Render a timestamp as ISO-8601 UTC, second precision, trailing `Z`.
pub fn iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Serde adapter serializing `DateTime<Utc>` via [`iso`].
pub mod iso_ts {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as an ISO-8601 `Z` string.
    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&super::iso(*dt))
    }

    /// Deserialize from any RFC 3339 string.
    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(de)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional timestamps (`null` stays `null`).
pub mod iso_ts_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize `Some` as an ISO-8601 `Z` string, `None` as `null`.
    pub fn serialize<S: Serializer>(
        dt: &Option<DateTime<Utc>>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        match dt {
            Some(value) => ser.serialize_some(&super::iso(*value)),
            None => ser.serialize_none(),
        }
    }

    /// Deserialize from an optional RFC 3339 string.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(de)?;
        match raw {
            Some(text) => DateTime::parse_from_rfc3339(&text)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Capability class a permission scope covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    /// Filesystem access.
    File,
    /// Shell command execution.
    Shell,
    /// Outbound network access.
    Network,
    /// Cloud provider access.
    Cloud,
}

/// Access mode within a scope type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMode {
    /// Read-only access.
    Read,
    /// Write access.
    Write,
    /// Execute access.
    Exec,
    /// Fetch (network GET) access.
    Fetch,
}

/// A single permission grant a plan asks the user to approve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionScope {
    /// Capability class.
    #[serde(rename = "type")]
    pub scope_type: ScopeType,
    /// Access mode.
    pub mode: ScopeMode,
    /// Paths or commands the grant is limited to.
    pub targets: Vec<String>,
    /// Human-readable justification.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Which agent a step dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Conversational echo agent.
    Conversation,
    /// Filesystem agent.
    File,
    /// Shell agent.
    Shell,
    /// Browser agent (planned, never executed here).
    Browser,
}

/// Side-effect class a step declares up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideEffects {
    /// Pure read / respond.
    None,
    /// Writes to the filesystem.
    Write,
    /// Executes a process.
    Exec,
    /// Talks to the network.
    Network,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AgentKind::Conversation => "conversation",
            AgentKind::File => "file",
            AgentKind::Shell => "shell",
            AgentKind::Browser => "browser",
        })
    }
}

impl std::fmt::Display for SideEffects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SideEffects::None => "none",
            SideEffects::Write => "write",
            SideEffects::Exec => "exec",
            SideEffects::Network => "network",
        })
    }
}

/// Coarse risk estimate attached to a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// No side effects expected.
    Low,
    /// Bounded side effects.
    Medium,
    /// Broad or destructive side effects.
    High,
}

/// `command` input for `shell.exec`: either a single line or a prepared argv.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandInput {
    /// Raw command line, tokenized with shell word-splitting rules.
    Line(String),
    /// Pre-split argv.
    Argv(Vec<String>),
}

/// Inputs for `conversation.respond`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RespondInputs {
    /// Prompt to echo back.
    #[serde(default)]
    pub prompt: String,
}

/// Inputs for `file.search`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchInputs {
    /// Search root directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Legacy alias for `root`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    /// Substring to look for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Glob patterns relative to the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub globs: Option<Vec<String>>,
    /// Result cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u64>,
    /// Legacy alias for `max_results`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Snippet length cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_snippet_chars: Option<u64>,
}

/// Inputs for `file.read_text`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadTextInputs {
    /// File to read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Character cap on the returned content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chars: Option<u64>,
}

/// Inputs for `shell.exec`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecInputs {
    /// Command line or argv.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandInput>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Wall-clock budget in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Cap on combined output characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_chars: Option<u64>,
}

/// Typed step inputs, keyed by the step's `action` string.
///
/// Unknown actions keep their raw JSON so the plan round-trips; the executor
/// rejects them instead of guessing.
#[derive(Debug, Clone)]
pub enum StepInputs {
    /// `conversation.respond`
    Respond(RespondInputs),
    /// `file.search`
    Search(SearchInputs),
    /// `file.read_text`
    ReadText(ReadTextInputs),
    /// `shell.exec`
    Exec(ExecInputs),
    /// Anything else, preserved verbatim.
    Other(Value),
}

impl StepInputs {
    fn from_wire(action: &str, raw: Value) -> Result<Self, String> {
        let parsed = match action {
            "conversation.respond" => StepInputs::Respond(
                serde_json::from_value(raw).map_err(|e| format!("invalid inputs: {e}"))?,
            ),
            "file.search" => StepInputs::Search(
                serde_json::from_value(raw).map_err(|e| format!("invalid inputs: {e}"))?,
            ),
            "file.read_text" => StepInputs::ReadText(
                serde_json::from_value(raw).map_err(|e| format!("invalid inputs: {e}"))?,
            ),
            "shell.exec" => StepInputs::Exec(
                serde_json::from_value(raw).map_err(|e| format!("invalid inputs: {e}"))?,
            ),
            _ => StepInputs::Other(raw),
        };
        Ok(parsed)
    }

    fn to_wire(&self) -> Value {
        let encoded = match self {
            StepInputs::Respond(inputs) => serde_json::to_value(inputs),
            StepInputs::Search(inputs) => serde_json::to_value(inputs),
            StepInputs::ReadText(inputs) => serde_json::to_value(inputs),
            StepInputs::Exec(inputs) => serde_json::to_value(inputs),
            StepInputs::Other(raw) => Ok(raw.clone()),
        };
        encoded.unwrap_or(Value::Null)
    }
}

/// On-the-wire shape of a step: `inputs` is an open JSON map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepWire {
    step_id: String,
    agent: AgentKind,
    action: String,
    inputs: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    outputs_schema: Option<Value>,
    side_effects: SideEffects,
    preview: String,
}

/// A single unit of work inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StepWire", into = "StepWire")]
pub struct Step {
    /// Stable identifier within the plan (e.g. `step-1`).
    pub step_id: String,
    /// Agent the step dispatches to.
    pub agent: AgentKind,
    /// Dotted action name (e.g. `file.search`).
    pub action: String,
    /// Typed inputs derived from the action.
    pub inputs: StepInputs,
    /// Optional declared output schema, carried through untouched.
    pub outputs_schema: Option<Value>,
    /// Declared side-effect class.
    pub side_effects: SideEffects,
    /// One-line human preview shown on approval cards.
    pub preview: String,
}

impl TryFrom<StepWire> for Step {
    type Error = String;

    fn try_from(wire: StepWire) -> Result<Self, Self::Error> {
        let inputs = StepInputs::from_wire(&wire.action, wire.inputs)?;
        Ok(Step {
            step_id: wire.step_id,
            agent: wire.agent,
            action: wire.action,
            inputs,
            outputs_schema: wire.outputs_schema,
            side_effects: wire.side_effects,
            preview: wire.preview,
        })
    }
}

impl From<Step> for StepWire {
    fn from(step: Step) -> Self {
        StepWire {
            inputs: step.inputs.to_wire(),
            step_id: step.step_id,
            agent: step.agent,
            action: step.action,
            outputs_schema: step.outputs_schema,
            side_effects: step.side_effects,
            preview: step.preview,
        }
    }
}

/// An immutable, inspectable proposal produced by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan identifier.
    pub plan_id: Uuid,
    /// Creation time.
    #[serde(with = "iso_ts")]
    pub created_at: DateTime<Utc>,
    /// One-line restatement of what the user asked for.
    pub user_intent_summary: String,
    /// Whether executing this plan needs an approval token.
    pub requires_approval: bool,
    /// Permission grants the plan depends on.
    pub required_permissions: Vec<PermissionScope>,
    /// Ordered steps.
    pub steps: Vec<Step>,
    /// Coarse risk estimate.
    pub estimated_risk: RiskLevel,
    /// Whether the plan is a preview that must not run side effects.
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    /// Router confidence in `[0, 1]`.
    pub router_confidence: f64,
    /// Whether the router fell back to a conversational response.
    pub router_fallback_used: bool,
    /// Why the router chose this shape.
    pub explain: String,
}

fn default_dry_run() -> bool {
    true
}

impl Plan {
    /// True when any step declares a non-`none` side effect.
    pub fn has_side_effects(&self) -> bool {
        self.steps
            .iter()
            .any(|step| step.side_effects != SideEffects::None)
    }
}

/// Single-use credential binding an approval to one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalToken {
    /// Token identifier.
    pub token_id: Uuid,
    /// Plan the token is bound to.
    pub plan_id: Uuid,
    /// Issue time.
    #[serde(with = "iso_ts")]
    pub issued_at: DateTime<Utc>,
    /// Expiry time (`issued_at` + TTL).
    #[serde(with = "iso_ts")]
    pub expires_at: DateTime<Utc>,
    /// TTL in seconds.
    pub ttl_seconds: i64,
    /// Always true; tokens are consumed by marking.
    pub one_time_use: bool,
    /// When the token was consumed, if ever.
    #[serde(default, with = "iso_ts_opt")]
    pub consumed_at: Option<DateTime<Utc>>,
}

/// Terminal and in-flight task states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted, not started.
    Queued,
    /// Steps in flight.
    Running,
    /// All steps finished.
    Completed,
    /// A step failed.
    Failed,
    /// Refused before any step ran.
    Denied,
    /// A step exceeded its time budget.
    Timeout,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Denied => "denied",
            TaskStatus::Timeout => "timeout",
        })
    }
}

/// Severity of a trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal progress.
    Info,
    /// Recoverable oddity.
    Warn,
    /// Failure detail.
    Error,
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EventLevel::Debug => "debug",
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
        })
    }
}

/// One appended entry in a task trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Event time.
    #[serde(with = "iso_ts")]
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: EventLevel,
    /// Step the event belongs to, if any.
    #[serde(default)]
    pub step_id: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Structured payload.
    #[serde(default)]
    pub details: Option<Value>,
}

/// Full record of one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTrace {
    /// Task identifier.
    pub task_id: Uuid,
    /// Plan that was executed.
    pub plan_id: Uuid,
    /// Current status.
    pub status: TaskStatus,
    /// Start time.
    #[serde(with = "iso_ts")]
    pub started_at: DateTime<Utc>,
    /// End time, once terminal.
    #[serde(default, with = "iso_ts_opt")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Agent of the first step.
    #[serde(default)]
    pub agent: Option<AgentKind>,
    /// Ordered event log.
    pub events: Vec<TaskEvent>,
    /// Error message for failed tasks.
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskTrace {
    /// Summary row for the task index.
    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            task_id: self.task_id,
            plan_id: self.plan_id,
            status: self.status,
            started_at: self.started_at,
            ended_at: self.ended_at,
            agent: self.agent,
        }
    }
}

/// Index row describing one persisted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Task identifier.
    pub task_id: Uuid,
    /// Plan that was executed.
    pub plan_id: Uuid,
    /// Terminal status.
    pub status: TaskStatus,
    /// Start time.
    #[serde(with = "iso_ts")]
    pub started_at: DateTime<Utc>,
    /// End time.
    #[serde(default, with = "iso_ts_opt")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Agent of the first step.
    #[serde(default)]
    pub agent: Option<AgentKind>,
}
