//! Policy enforcement: path containment and shell command gating.
//!
//! Pure, reentrant checks invoked by the agents immediately before any I/O.
//! File access must sit inside the intersection of the configured allowed
//! folders and the plan-declared read targets, and must never touch an OS
//! root. Shell commands pass three layers: a deny list on argv tokens, a
//! reject on shell operators in the joined argv, and an exact allow-list
//! that classifies each command as interpreted in-process or spawned.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Policy violations. Every variant maps to a 403 at the HTTP boundary
/// except [`PolicyError::Resolve`], which surfaces as the caller's own
/// not-found/bad-request error.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Candidate path could not be canonicalized.
    #[error("could not resolve path {path}: {source}")]
    Resolve {
        /// Path as supplied.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// Candidate sits under a blocked OS root.
    #[error("Blocked path: {0}")]
    BlockedPath(PathBuf),
    /// Config has no allowed folders at all.
    #[error("No folders are allowed yet. Add a folder to continue.")]
    NoAllowedFolders,
    /// Candidate is outside every configured allowed folder.
    #[error("Path is outside configured allowed folders: {0}")]
    OutsideAllowedFolders(PathBuf),
    /// The plan declared no file-read targets.
    #[error("No allowed file read roots configured")]
    NoPlanReadRoots,
    /// Candidate is outside every plan-declared read target.
    #[error("Path is outside allowed read scope: {0}")]
    OutsideReadScope(PathBuf),
    /// Shell execution is switched off in config.
    #[error("Shell is disabled in config")]
    ShellDisabled,
    /// An argv token matched the deny list.
    #[error("Command token denied by policy: {0}")]
    DeniedToken(String),
    /// The joined argv contained a shell operator.
    #[error("Command contains forbidden shell operators")]
    ForbiddenOperator,
    /// `grep` was given a fourth argument other than `--recursive`.
    #[error("Only --recursive is allowed as fourth grep argument")]
    BadGrepFlag,
    /// The argv tuple matched nothing on the allow list.
    #[error("Command not allowlisted: {0}")]
    NotAllowlisted(String),
    /// A `shell.exec` step declared the wrong side-effect class.
    #[error("shell.exec step must declare side_effects=exec")]
    WrongSideEffects,
}

/// How an allow-listed command is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Interpreted in-process, never spawned.
    Internal,
    /// Spawned as a subprocess with shell interpretation disabled.
    External,
}

/// Deny-list tokens shared by every platform.
const COMMON_DENY: &[&str] = &["curl", "wget", "ssh"];

#[cfg(not(windows))]
const OS_DENY: &[&str] = &["rm", "sudo", "chmod", "chown", "dd", "mkfs", "mount"];

#[cfg(windows)]
const OS_DENY: &[&str] = &[
    "del", "erase", "rmdir", "rd", "format", "diskpart", "powershell", "cmd", "reg", "schtasks",
];

/// Operators that would reintroduce shell interpretation.
const FORBIDDEN_OPERATORS: &[&str] = &[";", "&&", "||", "|", ">", ">>", "<"];

/// External argv tuples accepted verbatim.
const ALLOWED_EXTERNAL: &[&[&str]] = &[
    &["git", "status"],
    &["git", "diff"],
    &["git", "log"],
    &["python", "--version"],
    &["python", "-m", "pip", "--version"],
    &["node", "--version"],
    &["npm", "--version"],
];

/// OS roots the file agent must never read, regardless of configuration.
#[cfg(not(windows))]
pub fn blocked_roots() -> Vec<PathBuf> {
    [
        "/bin", "/boot", "/dev", "/etc", "/lib", "/lib64", "/proc", "/run", "/sbin", "/sys",
        "/usr", "/var",
    ]
    .into_iter()
    .map(|raw| resolve_lenient(Path::new(raw)))
    .collect()
}

/// OS roots the file agent must never read, regardless of configuration.
#[cfg(windows)]
pub fn blocked_roots() -> Vec<PathBuf> {
    let system_root =
        std::env::var("SystemRoot").unwrap_or_else(|_| String::from(r"C:\Windows"));
    [
        system_root.as_str(),
        r"C:\Program Files",
        r"C:\Program Files (x86)",
        r"C:\ProgramData",
    ]
    .into_iter()
    .map(|raw| resolve_lenient(Path::new(raw)))
    .collect()
}

/// Canonicalize, following symlinks; errors keep the original path for the
/// caller's message.
pub fn resolve_strict(path: &Path) -> Result<PathBuf, PolicyError> {
    std::fs::canonicalize(path).map_err(|source| PolicyError::Resolve {
        path: path.to_path_buf(),
        source,
    })
}

/// Canonicalize when possible, otherwise keep the path as given.
///
/// Used for configured roots, which may be declared before they exist;
/// candidates under them still canonicalize strictly.
pub fn resolve_lenient(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn within(child: &Path, parent: &Path) -> bool {
    child.starts_with(parent)
}

/// True when the resolved candidate sits under any blocked OS root.
pub fn is_blocked_path(resolved: &Path) -> bool {
    blocked_roots().iter().any(|root| within(resolved, root))
}

/// Enforce the full file-read scope ladder on `candidate`.
///
/// Order matters: blocked roots are checked before any allow logic so a
/// configured folder can never open up `/etc`, and the config gate comes
/// before the plan gate so the user's settings always win.
///
/// Returns the canonicalized candidate for the caller to operate on.
pub fn ensure_file_read_scope(
    candidate: &Path,
    config_roots: &[PathBuf],
    plan_roots: &[PathBuf],
) -> Result<PathBuf, PolicyError> {
    let resolved = resolve_strict(candidate)?;
    if is_blocked_path(&resolved) {
        return Err(PolicyError::BlockedPath(resolved));
    }
    if config_roots.is_empty() {
        return Err(PolicyError::NoAllowedFolders);
    }
    if !config_roots.iter().any(|root| within(&resolved, root)) {
        return Err(PolicyError::OutsideAllowedFolders(resolved));
    }
    if plan_roots.is_empty() {
        return Err(PolicyError::NoPlanReadRoots);
    }
    if !plan_roots.iter().any(|root| within(&resolved, root)) {
        return Err(PolicyError::OutsideReadScope(resolved));
    }
    Ok(resolved)
}

/// Reject any argv containing a deny-listed token (case-insensitive).
pub fn enforce_deny_tokens(argv: &[String]) -> Result<(), PolicyError> {
    for token in argv {
        let normalized = token.to_lowercase();
        if COMMON_DENY.contains(&normalized.as_str()) || OS_DENY.contains(&normalized.as_str()) {
            return Err(PolicyError::DeniedToken(token.clone()));
        }
    }
    Ok(())
}

/// Reject shell operators anywhere in the space-joined argv.
///
/// Checked on the joined string so an operator smuggled inside a single
/// token (e.g. `"ls && whoami"` surviving word-splitting as one argument)
/// still trips the gate.
pub fn reject_shell_operators(argv: &[String]) -> Result<(), PolicyError> {
    let joined = argv.join(" ");
    if FORBIDDEN_OPERATORS.iter().any(|op| joined.contains(op)) {
        return Err(PolicyError::ForbiddenOperator);
    }
    Ok(())
}

/// Match the argv against the exact allow-list and classify it.
pub fn classify_allowlisted(argv: &[String]) -> Result<CommandClass, PolicyError> {
    let head = argv.first().map(String::as_str).unwrap_or_default();
    match (head, argv.len()) {
        ("pwd", 1) => return Ok(CommandClass::Internal),
        ("ls", 1 | 2) => return Ok(CommandClass::Internal),
        ("cat", 2) => return Ok(CommandClass::Internal),
        ("grep", 3) => return Ok(CommandClass::Internal),
        ("grep", 4) => {
            if argv.get(3).map(String::as_str) != Some("--recursive") {
                return Err(PolicyError::BadGrepFlag);
            }
            return Ok(CommandClass::Internal);
        }
        ("find", 2 | 3) => return Ok(CommandClass::Internal),
        _ => {}
    }

    let as_strs: Vec<&str> = argv.iter().map(String::as_str).collect();
    if ALLOWED_EXTERNAL.contains(&as_strs.as_slice()) {
        return Ok(CommandClass::External);
    }
    Err(PolicyError::NotAllowlisted(argv.join(" ")))
}
