//! Shell agent: allow-listed command execution with hard time and output caps.
//!
//! Commands come in as a line or an argv. A line is word-split with POSIX
//! shell rules but never handed to a shell: allow-listed built-ins (`pwd`,
//! `ls`, `cat`, `grep`, `find`) are interpreted in-process against the same
//! read scope as the file agent, and the handful of allow-listed external
//! commands are spawned directly with shell interpretation disabled.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::kernel::policy::{
    classify_allowlisted, enforce_deny_tokens, reject_shell_operators, resolve_lenient,
    CommandClass, PolicyError,
};
use crate::logstore::BackendLog;
use crate::types::{CommandInput, ExecInputs};

use super::ReadScope;

/// Default wall-clock budget when the step does not set one.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default output cap when the step does not set one.
pub const DEFAULT_MAX_OUTPUT_CHARS: u64 = 20_000;

/// Exit code reported for a command that exceeded its budget.
pub const EXIT_TIMEOUT: i32 = 124;

/// Exit code reported when the executable does not exist.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Shell agent failures surfaced before anything runs.
#[derive(Debug, Error)]
pub enum ShellAgentError {
    /// Policy denied the command or its working directory.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// The command line could not be word-split.
    #[error("Invalid shell command syntax")]
    InvalidSyntax,
    /// No command was supplied.
    #[error("shell.exec requires a command string or argv list")]
    MissingCommand,
    /// The command tokenized to nothing.
    #[error("shell.exec command is empty")]
    EmptyCommand,
}

/// Structured result of one shell execution.
#[derive(Debug, Clone, Serialize)]
pub struct ShellOutcome {
    /// Final argv after normalization.
    pub argv: Vec<String>,
    /// Resolved working directory.
    pub cwd: String,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Combined stdout+stderr, truncated to the output cap.
    pub output: String,
    /// Whether the combined output was cut.
    pub truncated: bool,
    /// Whether the command exceeded its budget.
    pub timed_out: bool,
    /// Process or built-in exit code.
    pub exit_code: i32,
    /// Effective timeout in milliseconds.
    pub timeout_ms: u64,
    /// Effective output cap in characters.
    pub max_output_chars: u64,
}

/// Normalized, clamped inputs ready for policy checks.
#[derive(Debug, Clone)]
pub struct NormalizedCommand {
    /// Tokenized argv.
    pub argv: Vec<String>,
    /// Resolved working directory.
    pub cwd: PathBuf,
    /// Timeout clamped to `[100, 120000]` ms.
    pub timeout_ms: u64,
    /// Output cap clamped to `[256, 200000]` chars.
    pub max_output_chars: usize,
}

/// Tokenize and clamp the step inputs.
///
/// The operator reject runs here, on the space-joined argv, so an operator
/// that survived word-splitting inside a single token still denies.
pub fn normalize_inputs(inputs: &ExecInputs) -> Result<NormalizedCommand, ShellAgentError> {
    let argv = match &inputs.command {
        Some(CommandInput::Argv(argv)) => argv.clone(),
        Some(CommandInput::Line(line)) => {
            shlex::split(line).ok_or(ShellAgentError::InvalidSyntax)?
        }
        None => return Err(ShellAgentError::MissingCommand),
    };
    if argv.is_empty() {
        return Err(ShellAgentError::EmptyCommand);
    }
    reject_shell_operators(&argv)?;

    let timeout_ms = inputs.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS).clamp(100, 120_000);
    let max_output_chars = usize::try_from(
        inputs
            .max_output_chars
            .unwrap_or(DEFAULT_MAX_OUTPUT_CHARS)
            .clamp(256, 200_000),
    )
    .unwrap_or(200_000);

    let cwd_input = inputs.cwd.clone().unwrap_or_else(|| {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .to_string_lossy()
            .into_owned()
    });
    let cwd = resolve_lenient(Path::new(&cwd_input));

    Ok(NormalizedCommand {
        argv,
        cwd,
        timeout_ms,
        max_output_chars,
    })
}

/// Execute a `shell.exec` step end to end.
///
/// Precondition order is load-bearing: the config switch, then the working
/// directory scope, then the deny list, then the allow list. Nothing is
/// spawned or read before all four pass.
pub async fn run(
    inputs: &ExecInputs,
    scope: &ReadScope,
    shell_enabled: bool,
    log: &BackendLog,
) -> Result<ShellOutcome, ShellAgentError> {
    if !shell_enabled {
        return Err(PolicyError::ShellDisabled.into());
    }
    let command = normalize_inputs(inputs)?;
    log.append(
        "info",
        &format!(
            "shell.exec requested argv={:?} cwd={}",
            command.argv,
            command.cwd.display()
        ),
    );

    let class = match gate(&command, scope) {
        Ok(class) => class,
        Err(denied) => {
            log.append("warn", &format!("shell.exec denied reason={denied}"));
            return Err(denied);
        }
    };

    let (stdout, stderr, exit_code, timed_out) = match class {
        CommandClass::Internal => {
            run_internal(&command, scope, Budget::new(command.timeout_ms))?
        }
        CommandClass::External => run_external(&command).await,
    };

    let combined = format!("{stdout}{stderr}");
    let (output, truncated) = truncate_chars(&combined, command.max_output_chars);
    log.append(
        "info",
        &format!(
            "shell.exec {} exit_code={exit_code} truncated={truncated} timeout={timed_out}",
            if exit_code == 0 { "allowed" } else { "completed" }
        ),
    );

    Ok(ShellOutcome {
        argv: command.argv,
        cwd: command.cwd.to_string_lossy().into_owned(),
        stdout,
        stderr,
        output,
        truncated,
        timed_out,
        exit_code,
        timeout_ms: command.timeout_ms,
        max_output_chars: u64::try_from(command.max_output_chars).unwrap_or(u64::MAX),
    })
}

fn gate(command: &NormalizedCommand, scope: &ReadScope) -> Result<CommandClass, ShellAgentError> {
    scope.check(&command.cwd)?;
    enforce_deny_tokens(&command.argv)?;
    Ok(classify_allowlisted(&command.argv)?)
}

fn truncate_chars(text: &str, cap: usize) -> (String, bool) {
    let total = text.chars().count();
    if total <= cap {
        return (text.to_owned(), false);
    }
    (text.chars().take(cap).collect(), true)
}

// ── Internal built-ins ──────────────────────────────────────────

/// Soft time budget checked at iteration points inside built-ins.
pub(crate) struct Budget {
    started: Instant,
    timeout_ms: u64,
}

/// Raised inside built-ins; timeouts and missing targets become exit-coded
/// results, scope violations propagate as hard denials.
enum BuiltinError {
    Timeout,
    Policy(PolicyError),
    /// Target missing: rendered as stderr + exit 1, never a policy error.
    NotFound(String),
}

impl Budget {
    pub(crate) fn new(timeout_ms: u64) -> Self {
        Self {
            started: Instant::now(),
            timeout_ms,
        }
    }

    /// A budget that has already run out, for exercising timeout paths.
    #[cfg(test)]
    pub(crate) fn expired() -> Self {
        Self {
            started: Instant::now()
                .checked_sub(std::time::Duration::from_millis(10))
                .unwrap_or_else(Instant::now),
            timeout_ms: 0,
        }
    }

    fn check(&self) -> Result<(), BuiltinError> {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if elapsed > self.timeout_ms {
            return Err(BuiltinError::Timeout);
        }
        Ok(())
    }
}

fn run_internal(
    command: &NormalizedCommand,
    scope: &ReadScope,
    budget: Budget,
) -> Result<(String, String, i32, bool), ShellAgentError> {
    let head = command.argv.first().map(String::as_str).unwrap_or_default();
    let result = match head {
        "pwd" => Ok(format!("{}\n", command.cwd.display())),
        "ls" => builtin_ls(command, scope, &budget),
        "cat" => builtin_cat(command, scope, &budget),
        "grep" => builtin_grep(command, scope, &budget),
        "find" => builtin_find(command, scope, &budget),
        other => Err(BuiltinError::NotFound(format!(
            "Unsupported internal command: {other}\n"
        ))),
    };
    match result {
        Ok(stdout) => Ok((stdout, String::new(), 0, false)),
        Err(BuiltinError::Timeout) => Ok((
            String::new(),
            String::from("command timed out\n"),
            EXIT_TIMEOUT,
            true,
        )),
        Err(BuiltinError::NotFound(message)) => Ok((String::new(), message, 1, false)),
        Err(BuiltinError::Policy(denied)) => Err(denied.into()),
    }
}

/// Resolve a path argument relative to the working directory.
fn arg_path(arg: &str, cwd: &Path) -> PathBuf {
    let candidate = PathBuf::from(arg);
    if candidate.is_absolute() {
        resolve_lenient(&candidate)
    } else {
        resolve_lenient(&cwd.join(candidate))
    }
}

/// Scope-check a built-in target; a failed resolve means "not found" for
/// the command's own error message rather than a policy denial.
fn check_target(
    scope: &ReadScope,
    target: &Path,
    not_found: impl FnOnce(&Path) -> String,
) -> Result<PathBuf, BuiltinError> {
    match scope.check(target) {
        Ok(resolved) => Ok(resolved),
        Err(PolicyError::Resolve { path, .. }) => Err(BuiltinError::NotFound(not_found(&path))),
        Err(denied) => Err(BuiltinError::Policy(denied)),
    }
}

fn builtin_ls(
    command: &NormalizedCommand,
    scope: &ReadScope,
    budget: &Budget,
) -> Result<String, BuiltinError> {
    let target = match command.argv.get(1) {
        Some(arg) => arg_path(arg, &command.cwd),
        None => command.cwd.clone(),
    };
    let target = check_target(scope, &target, |p| {
        format!("ls target not found: {}\n", p.display())
    })?;
    if !target.is_dir() {
        return Err(BuiltinError::NotFound(format!(
            "ls target not found: {}\n",
            target.display()
        )));
    }
    let mut names: Vec<String> = std::fs::read_dir(&target)
        .map_err(|_| {
            BuiltinError::NotFound(format!("ls target not found: {}\n", target.display()))
        })?
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    budget.check()?;
    if names.is_empty() {
        return Ok(String::new());
    }
    Ok(format!("{}\n", names.join("\n")))
}

fn builtin_cat(
    command: &NormalizedCommand,
    scope: &ReadScope,
    budget: &Budget,
) -> Result<String, BuiltinError> {
    let arg = command.argv.get(1).map(String::as_str).unwrap_or_default();
    let target = arg_path(arg, &command.cwd);
    let target = check_target(scope, &target, |p| {
        format!("cat target not found: {}\n", p.display())
    })?;
    if !target.is_file() {
        return Err(BuiltinError::NotFound(format!(
            "cat target not found: {}\n",
            target.display()
        )));
    }
    let bytes = std::fs::read(&target).map_err(|_| {
        BuiltinError::NotFound(format!("cat target not found: {}\n", target.display()))
    })?;
    let content = String::from_utf8(bytes).map_err(|_| {
        BuiltinError::NotFound(format!(
            "cat only supports UTF-8 text files: {}\n",
            target.display()
        ))
    })?;
    budget.check()?;
    Ok(content)
}

fn builtin_grep(
    command: &NormalizedCommand,
    scope: &ReadScope,
    budget: &Budget,
) -> Result<String, BuiltinError> {
    let pattern = command.argv.get(1).map(String::as_str).unwrap_or_default();
    let target_arg = command.argv.get(2).map(String::as_str).unwrap_or_default();
    let recursive = command.argv.get(3).map(String::as_str) == Some("--recursive");
    let target = arg_path(target_arg, &command.cwd);
    let target = check_target(scope, &target, |p| {
        format!("grep target not found: {}\n", p.display())
    })?;

    let files: Vec<PathBuf> = if target.is_file() {
        vec![target]
    } else if target.is_dir() {
        let mut found: Vec<PathBuf> = if recursive {
            walkdir::WalkDir::new(&target)
                .min_depth(1)
                .into_iter()
                .filter_map(Result::ok)
                .map(walkdir::DirEntry::into_path)
                .collect()
        } else {
            std::fs::read_dir(&target)
                .map_err(|_| {
                    BuiltinError::NotFound(format!(
                        "grep target not found: {}\n",
                        target.display()
                    ))
                })?
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .collect()
        };
        found.sort_by_key(|path| path.to_string_lossy().into_owned());
        found.into_iter().filter(|path| path.is_file()).collect()
    } else {
        return Err(BuiltinError::NotFound(format!(
            "grep target not found: {}\n",
            target.display()
        )));
    };

    let mut matches: Vec<String> = Vec::new();
    for file in files {
        // Dangling links vanish between listing and resolve; skip them.
        let file = match scope.check(&file) {
            Ok(resolved) => resolved,
            Err(PolicyError::Resolve { .. }) => continue,
            Err(denied) => return Err(BuiltinError::Policy(denied)),
        };
        budget.check()?;
        let Ok(content) = std::fs::read_to_string(&file) else {
            continue;
        };
        for (idx, line) in content.lines().enumerate() {
            if line.contains(pattern) {
                matches.push(format!(
                    "{}:{}:{}",
                    file.display(),
                    idx.saturating_add(1),
                    line
                ));
            }
        }
    }
    if matches.is_empty() {
        return Ok(String::new());
    }
    Ok(format!("{}\n", matches.join("\n")))
}

fn builtin_find(
    command: &NormalizedCommand,
    scope: &ReadScope,
    budget: &Budget,
) -> Result<String, BuiltinError> {
    let root_arg = command.argv.get(1).map(String::as_str).unwrap_or_default();
    let pattern = command.argv.get(2).map(String::as_str).unwrap_or("*");
    let root = arg_path(root_arg, &command.cwd);
    let root = check_target(scope, &root, |p| {
        format!("find root not found: {}\n", p.display())
    })?;
    if !root.is_dir() {
        return Err(BuiltinError::NotFound(format!(
            "find root not found: {}\n",
            root.display()
        )));
    }

    let compiled = glob::Pattern::new(pattern).ok();
    let options = glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };

    let mut entries: Vec<PathBuf> = walkdir::WalkDir::new(&root)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .map(walkdir::DirEntry::into_path)
        .collect();
    entries.sort_by_key(|path| path.to_string_lossy().into_owned());

    let mut matches: Vec<String> = Vec::new();
    for entry in entries {
        budget.check()?;
        let name = entry
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let matched = compiled
            .as_ref()
            .is_some_and(|p| p.matches_with(&name, options));
        if matched {
            let entry = match scope.check(&entry) {
                Ok(resolved) => resolved,
                Err(PolicyError::Resolve { .. }) => continue,
                Err(denied) => return Err(BuiltinError::Policy(denied)),
            };
            matches.push(entry.to_string_lossy().into_owned());
        }
    }
    if matches.is_empty() {
        return Ok(String::new());
    }
    Ok(format!("{}\n", matches.join("\n")))
}

// ── External spawn ──────────────────────────────────────────────

async fn run_external(command: &NormalizedCommand) -> (String, String, i32, bool) {
    let head = command.argv.first().map(String::as_str).unwrap_or_default();
    let mut spawned = tokio::process::Command::new(head);
    spawned
        .args(command.argv.iter().skip(1))
        .current_dir(&command.cwd)
        .kill_on_drop(true)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let window = std::time::Duration::from_millis(command.timeout_ms);
    match tokio::time::timeout(window, spawned.output()).await {
        Err(_elapsed) => (
            String::new(),
            String::from("command timed out\n"),
            EXIT_TIMEOUT,
            true,
        ),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => (
            String::new(),
            format!("command not found: {head}\n"),
            EXIT_NOT_FOUND,
            false,
        ),
        Ok(Err(e)) => (
            String::new(),
            format!("command execution failed: {e}\n"),
            1,
            false,
        ),
        Ok(Ok(output)) => (
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
            output.status.code().unwrap_or(1),
            false,
        ),
    }
}
