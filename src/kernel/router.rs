//! Prompt router: classifies a free-form prompt into a structured [`Plan`].
//!
//! Classification is deliberately conservative. Tool routing needs overall
//! confidence of at least 0.70, shell routing needs shell confidence of at
//! least 0.80, and anything ambiguous falls back to a conversational plan
//! with no permissions and no side effects.

use serde::Deserialize;
use uuid::Uuid;

use crate::types::{
    now_utc, AgentKind, CommandInput, ExecInputs, PermissionScope, Plan, RespondInputs, RiskLevel,
    ScopeMode, ScopeType, SearchInputs, SideEffects, Step, StepInputs,
};

/// Minimum overall confidence before any tool routing is permitted.
pub const ROUTER_CONFIDENCE_THRESHOLD: f64 = 0.70;

/// Minimum shell confidence before routing to `shell.exec`.
pub const SHELL_CONFIDENCE_THRESHOLD: f64 = 0.80;

/// Default shell step timeout in milliseconds.
pub const DEFAULT_SHELL_TIMEOUT_MS: u64 = 10_000;

/// Default shell step output cap in characters.
pub const DEFAULT_SHELL_MAX_OUTPUT_CHARS: u64 = 20_000;

/// Request body for `POST /v1/router/plan`.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanRequest {
    /// Free-form user prompt.
    pub prompt: String,
    /// Folders the caller is willing to expose; the first becomes the root.
    #[serde(default)]
    pub allowed_folders: Vec<String>,
    /// Whether the plan should be a non-executable preview.
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
}

fn default_dry_run() -> bool {
    true
}

/// True when the prompt contains any delimited span with at least one
/// character between a matching pair of delimiters.
fn has_delimited(prompt: &str, delims: &[char]) -> bool {
    scan_delimited(prompt, delims, false).is_some()
}

/// First delimited span whose content is non-blank, trimmed.
fn first_delimited(prompt: &str, delims: &[char]) -> Option<String> {
    scan_delimited(prompt, delims, true)
}

fn scan_delimited(prompt: &str, delims: &[char], require_nonblank: bool) -> Option<String> {
    let chars: Vec<char> = prompt.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if delims.contains(&c) {
            let open_end = i.saturating_add(1);
            if let Some(offset) = chars.get(open_end..)?.iter().position(|&x| x == c) {
                if offset > 0 {
                    let content: String =
                        chars[open_end..open_end.saturating_add(offset)].iter().collect();
                    let trimmed = content.trim();
                    if !require_nonblank || !trimmed.is_empty() {
                        if require_nonblank {
                            return Some(trimmed.to_owned());
                        }
                        return Some(content);
                    }
                }
                // Resume at the closing delimiter so it can open the next pair.
                i = open_end.saturating_add(offset);
                continue;
            }
            // An unmatched delimiter can never close; a different one still can.
        }
        i = i.saturating_add(1);
    }
    None
}

/// Extract the search query: first non-blank quoted span, else `TODO`.
pub fn detect_search_query(prompt: &str) -> String {
    if let Some(quoted) = first_delimited(prompt, &['\'', '"']) {
        return quoted;
    }
    // Mentions of "todo" and everything else both fall back to TODO.
    String::from("TODO")
}

/// File-search confidence plus whether the prompt should route there.
pub fn detect_file_search_confidence(prompt: &str) -> (f64, bool) {
    let lowered = prompt.to_lowercase();
    let has_search_verb = ["search", "find", "look for"]
        .iter()
        .any(|word| lowered.contains(word));
    let has_file_scope = ["file", "folder", "project", "directory"]
        .iter()
        .any(|word| lowered.contains(word));
    let has_quoted_target = has_delimited(prompt, &['\'', '"']);

    if has_search_verb && has_file_scope && has_quoted_target {
        return (0.95, true);
    }
    if has_search_verb && has_file_scope {
        return (0.82, true);
    }
    if lowered.contains("file")
        && ["help", "maybe", "around"]
            .iter()
            .any(|word| lowered.contains(word))
    {
        return (0.45, false);
    }
    (0.55, false)
}

/// Shell-exec confidence plus whether the prompt should route there.
pub fn detect_shell_exec_confidence(prompt: &str) -> (f64, bool) {
    let lowered = prompt.to_lowercase();
    let lowered = lowered.trim();
    let has_indicator = ["run command", "execute command", "shell", "terminal"]
        .iter()
        .any(|token| lowered.contains(token));
    let has_code_block = prompt.contains('`');
    if has_indicator && has_code_block {
        return (0.93, true);
    }
    if has_indicator {
        return (0.84, true);
    }
    (0.40, false)
}

/// Extract the shell command: first non-blank backtick span, else the tail
/// after `run command`, else `pwd`.
pub fn extract_shell_command(prompt: &str) -> String {
    if let Some(inline) = first_delimited(prompt, &['`']) {
        return inline;
    }
    let marker = "run command";
    let lowered = prompt.to_lowercase();
    if let Some(idx) = lowered.find(marker) {
        let tail_start = idx.saturating_add(marker.len());
        let tail = prompt
            .get(tail_start..)
            .unwrap_or_default()
            .trim_matches([':', ' '])
            .trim();
        if !tail.is_empty() {
            return tail.to_owned();
        }
    }
    String::from("pwd")
}

/// Build a plan for the request.
///
/// The ladder is evaluated in order: confidence gate, file search, shell
/// exec, direct response.
pub fn build_plan(request: &PlanRequest) -> Plan {
    let prompt = request.prompt.trim().to_owned();
    let base_folder = request
        .allowed_folders
        .first()
        .cloned()
        .unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| std::path::PathBuf::from("."))
                .to_string_lossy()
                .into_owned()
        });

    let (router_confidence, should_route_file_search) = detect_file_search_confidence(&prompt);
    let (shell_confidence, should_route_shell_exec) = detect_shell_exec_confidence(&prompt);

    if router_confidence < ROUTER_CONFIDENCE_THRESHOLD {
        return fallback_plan(&prompt, router_confidence, request.dry_run);
    }
    if should_route_file_search {
        return file_search_plan(&prompt, &base_folder, router_confidence, request.dry_run);
    }
    if should_route_shell_exec && shell_confidence >= SHELL_CONFIDENCE_THRESHOLD {
        return shell_exec_plan(&prompt, &base_folder, shell_confidence);
    }
    direct_response_plan(prompt, request.dry_run)
}

fn fallback_plan(prompt: &str, router_confidence: f64, dry_run: bool) -> Plan {
    let step = Step {
        step_id: String::from("step-1"),
        agent: AgentKind::Conversation,
        action: String::from("conversation.respond"),
        inputs: StepInputs::Respond(RespondInputs {
            prompt: prompt.to_owned(),
        }),
        outputs_schema: None,
        side_effects: SideEffects::None,
        preview: String::from(
            "Router confidence is low. Respond conversationally with no system actions.",
        ),
    };
    Plan {
        plan_id: Uuid::new_v4(),
        created_at: now_utc(),
        user_intent_summary: String::from("Respond safely due to ambiguous intent."),
        requires_approval: false,
        required_permissions: Vec::new(),
        steps: vec![step],
        estimated_risk: RiskLevel::Low,
        dry_run,
        router_confidence,
        router_fallback_used: true,
        explain: String::from(
            "Router confidence is below threshold, so side effects are disabled.",
        ),
    }
}

fn file_search_plan(prompt: &str, base_folder: &str, router_confidence: f64, dry_run: bool) -> Plan {
    let query = detect_search_query(prompt);
    let step = Step {
        step_id: String::from("step-1"),
        agent: AgentKind::File,
        action: String::from("file.search"),
        inputs: StepInputs::Search(SearchInputs {
            root: Some(base_folder.to_owned()),
            folder: None,
            query: Some(query.clone()),
            globs: Some(vec![
                String::from("**/*.txt"),
                String::from("**/*.md"),
                String::from("**/*.py"),
            ]),
            max_results: Some(10),
            limit: None,
            max_snippet_chars: Some(240),
        }),
        outputs_schema: None,
        side_effects: SideEffects::None,
        preview: format!("Search for '{query}' under {base_folder} and return up to 10 matches."),
    };
    let perms = vec![PermissionScope {
        scope_type: ScopeType::File,
        mode: ScopeMode::Read,
        targets: vec![base_folder.to_owned()],
        reason: Some(String::from(
            "Need read access to search files in the selected folder.",
        )),
    }];
    Plan {
        plan_id: Uuid::new_v4(),
        created_at: now_utc(),
        user_intent_summary: format!("Search files for '{query}'."),
        requires_approval: true,
        required_permissions: perms,
        steps: vec![step],
        estimated_risk: RiskLevel::Low,
        dry_run,
        router_confidence,
        router_fallback_used: false,
        explain: String::from("This request requires reading files in the target folder."),
    }
}

/// Shell plans always come out with `dry_run = false`, regardless of the
/// request flag: a dry-run plan with an exec step would be unexecutable by
/// construction, so the approval token stays the only gate.
fn shell_exec_plan(prompt: &str, base_folder: &str, shell_confidence: f64) -> Plan {
    let command = extract_shell_command(prompt);
    let step = Step {
        step_id: String::from("step-1"),
        agent: AgentKind::Shell,
        action: String::from("shell.exec"),
        inputs: StepInputs::Exec(ExecInputs {
            command: Some(CommandInput::Line(command.clone())),
            cwd: Some(base_folder.to_owned()),
            timeout_ms: Some(DEFAULT_SHELL_TIMEOUT_MS),
            max_output_chars: Some(DEFAULT_SHELL_MAX_OUTPUT_CHARS),
        }),
        outputs_schema: None,
        side_effects: SideEffects::Exec,
        preview: format!("Execute shell command in {base_folder}: {command}"),
    };
    let perms = vec![
        PermissionScope {
            scope_type: ScopeType::File,
            mode: ScopeMode::Read,
            targets: vec![base_folder.to_owned()],
            reason: Some(String::from(
                "Need folder scope to constrain shell working directory.",
            )),
        },
        PermissionScope {
            scope_type: ScopeType::Shell,
            mode: ScopeMode::Exec,
            targets: vec![command],
            reason: Some(String::from(
                "Need explicit approval to execute shell commands.",
            )),
        },
    ];
    Plan {
        plan_id: Uuid::new_v4(),
        created_at: now_utc(),
        user_intent_summary: String::from("Execute a shell command with guardrails."),
        requires_approval: true,
        required_permissions: perms,
        steps: vec![step],
        estimated_risk: RiskLevel::Medium,
        dry_run: false,
        router_confidence: shell_confidence,
        router_fallback_used: false,
        explain: String::from(
            "Shell command execution requires explicit approval and strict policy checks.",
        ),
    }
}

fn direct_response_plan(prompt: String, dry_run: bool) -> Plan {
    let step = Step {
        step_id: String::from("step-1"),
        agent: AgentKind::Conversation,
        action: String::from("conversation.respond"),
        inputs: StepInputs::Respond(RespondInputs { prompt }),
        outputs_schema: None,
        side_effects: SideEffects::None,
        preview: String::from("Generate a direct response without system actions."),
    };
    Plan {
        plan_id: Uuid::new_v4(),
        created_at: now_utc(),
        user_intent_summary: String::from("Answer the user prompt directly."),
        requires_approval: false,
        required_permissions: Vec::new(),
        steps: vec![step],
        estimated_risk: RiskLevel::Low,
        dry_run,
        router_confidence: 0.90,
        router_fallback_used: false,
        explain: String::from("No file, shell, or network operations are required."),
    }
}
