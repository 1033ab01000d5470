// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The hook dispatcher: the single entry point invoked once per tool-use
//! event, responsible for ensuring a supervisor is running, draining or
//! recording pending checks, and reporting diagnostics on stderr when
//! something changed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::diagnostics::{Diagnostic, SystemMessage};
use crate::discovery::{DiagnosticsBackend, DirectBackend};
use crate::identity::ProjectRoot;
use crate::paths;
use crate::registry;
use crate::store::Store;
use crate::supervisor::http;

/// Budget for draining one pending check before continuing with the
/// hook's main path.
const PENDING_DRAIN_BUDGET: Duration = Duration::from_millis(500);
/// Budget for a round trip to the supervisor while handling a hook.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(15);
/// Budget for the fast reachability probe before spawning a supervisor.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_millis(300);

#[derive(Debug, Deserialize, Default)]
struct RawEvent {
    #[serde(alias = "sessionId")]
    session_id: Option<String>,
    #[serde(alias = "workingDirectory")]
    cwd: Option<String>,
    #[serde(alias = "hookEventName", alias = "event")]
    hook_event_name: Option<String>,
    #[serde(alias = "toolName")]
    tool_name: Option<String>,
    input: Option<RawInput>,
}

#[derive(Debug, Deserialize, Default)]
struct RawInput {
    #[serde(alias = "input_path", alias = "path")]
    file_path: Option<String>,
}

enum HookKind {
    ToolUseCompletion,
    SessionStart,
    Stop,
    Other,
}

impl HookKind {
    /// Classifies the CLI's `hook <EventKind>` positional argument. Both
    /// the kebab-case names the subcommand contract documents
    /// (`tool-use-completion`, `session-start`, `stop`/`session-end`) and
    /// the camelCase names a host may pass straight through
    /// (`PostToolUse`, `SessionStart`, `Stop`/`SessionEnd`) are accepted,
    /// since both are observed in practice.
    fn from_cli(event_kind: &str) -> Self {
        match event_kind {
            "tool-use-completion" | "PostToolUse" => Self::ToolUseCompletion,
            "session-start" | "SessionStart" => Self::SessionStart,
            "stop" | "session-end" | "Stop" | "SessionEnd" => Self::Stop,
            _ => Self::Other,
        }
    }

    /// Classifies the stdin payload's own `hookEventName`/`event` field,
    /// used as a fallback when the CLI argument is not one of the
    /// recognized kinds (a host may pass a generic `hook` invocation and
    /// carry the real event name in the JSON body instead).
    fn from_name(name: Option<&str>) -> Self {
        match name {
            Some("PostToolUse") => Self::ToolUseCompletion,
            Some("SessionStart") => Self::SessionStart,
            Some("Stop") | Some("SessionEnd") => Self::Stop,
            _ => Self::Other,
        }
    }
}

/// Runs the dispatcher against one `hook <EventKind>` invocation's stdin
/// payload, returning the process exit code (0 or 2) per the hook
/// contract.
///
/// A malformed or empty payload, or a duplicate invocation within the
/// dedup window, is a silent no-op returning 0.
pub async fn run(event_kind: &str, input: &str) -> i32 {
    let Ok(event) = serde_json::from_str::<RawEvent>(input.trim()) else {
        return 0;
    };
    if !claim_lock(event_kind, &event) {
        debug!("duplicate hook invocation suppressed");
        return 0;
    }

    let kind = match HookKind::from_cli(event_kind) {
        HookKind::Other => HookKind::from_name(event.hook_event_name.as_deref()),
        resolved => resolved,
    };

    match kind {
        HookKind::ToolUseCompletion => handle_tool_use(&event).await,
        HookKind::SessionStart => handle_session_start(&event).await,
        HookKind::Stop => {
            handle_stop(&event).await;
            0
        }
        HookKind::Other => 0,
    }
}

/// Claims a 2-second lock keyed by (event kind, session id, time bucket)
/// so that duplicate invocations of the same logical event are
/// suppressed. Returns `true` if this invocation won the claim.
fn claim_lock(event_kind: &str, event: &RawEvent) -> bool {
    let bucket = now_secs() / 2;
    let key = format!("{event_kind}:{}:{bucket}", event.session_id.as_deref().unwrap_or(""));
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();

    let dir = paths::runtime_dir();
    if std::fs::create_dir_all(&dir).is_err() {
        return true;
    }
    let lock_path = dir.join(format!("claude-lsp-lock-{hex}.lock"));
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&lock_path)
        .is_ok()
}

/// Tool names classified as editing a single named file, per the hook
/// contract's `toolName` field.
const FILE_SPECIFIC_TOOLS: &[&str] = &["Edit", "Write", "MultiEdit", "NotebookEdit"];

fn is_file_specific_tool(tool_name: Option<&str>) -> bool {
    tool_name.is_some_and(|name| FILE_SPECIFIC_TOOLS.contains(&name))
}

async fn handle_tool_use(event: &RawEvent) -> i32 {
    let Some(cwd) = event.cwd.as_deref() else {
        return 0;
    };
    let file_path = event.input.as_ref().and_then(|i| i.file_path.as_deref());
    let roots = resolve_project_roots(Path::new(cwd), file_path);
    let Some(primary) = roots.first() else {
        return 0;
    };

    if let Some(exit_code) = drain_one_pending(primary).await {
        return exit_code;
    }

    if is_file_specific_tool(event.tool_name.as_deref()) {
        if let Some(file) = file_path {
            let _ = ensure_supervisor_running(primary).await;
            if let Ok(store) = open_store(primary) {
                let _ = store.mark_pending(Path::new(file), primary.path());
            }
            return 0;
        }
    }

    run_project_wide_check(&roots).await
}

async fn handle_session_start(event: &RawEvent) -> i32 {
    let Some(cwd) = event.cwd.as_deref() else {
        return 0;
    };
    let mut exit_code = 0;
    for project in resolve_project_roots(Path::new(cwd), None) {
        let marker = paths::runtime_dir().join(format!("claude-lsp-{}.seen", project.id()));
        if marker.exists() {
            continue;
        }
        let _ = std::fs::create_dir_all(paths::runtime_dir());
        let _ = std::fs::write(&marker, b"");

        let diagnostics = if ensure_supervisor_running(&project).await {
            fetch_all_diagnostics(&project).await.unwrap_or_default()
        } else {
            direct_check_project(&project).await
        };
        if !diagnostics.is_empty() {
            emit_system_message(&diagnostics);
            exit_code = 2;
        }
    }
    exit_code
}

async fn handle_stop(event: &RawEvent) {
    let Some(cwd) = event.cwd.as_deref() else {
        return;
    };
    for project in resolve_project_roots(Path::new(cwd), None) {
        let socket = paths::socket_path(project.id());
        if let Err(err) = http::request_json(&socket, "POST", "/shutdown", Duration::from_millis(500)).await {
            debug!(error = %err, "supervisor shutdown request failed, assuming already stopped");
        }
    }
}

/// Attempts to drain one pending check within [`PENDING_DRAIN_BUDGET`].
/// Returns `Some(exit_code)` if a pending check was found and handled
/// (reportable or not); `None` if there was nothing to drain or the
/// budget elapsed, in which case the caller continues its own path.
async fn drain_one_pending(project: &ProjectRoot) -> Option<i32> {
    tokio::time::timeout(PENDING_DRAIN_BUDGET, drain_one_pending_inner(project))
        .await
        .ok()
        .flatten()
}

async fn drain_one_pending_inner(project: &ProjectRoot) -> Option<i32> {
    let mut store = open_store(project).ok()?;
    let _ = store.expire_and_purge_pending();
    let pending = store.oldest_pending(Some(project.path())).ok().flatten()?;

    let diagnostics = if ensure_supervisor_running(project).await {
        fetch_file_diagnostics(project, &pending.file_path).await.unwrap_or_default()
    } else {
        direct_check_file(project, &pending.file_path).await
    };
    let _ = store.mark_checked(&pending.file_path);

    match store.process_diagnostics(project.id(), &pending.project_root, &diagnostics) {
        Ok(result) if result.should_report => {
            emit_system_message(&diagnostics);
            Some(2)
        }
        _ => Some(0),
    }
}

async fn run_project_wide_check(roots: &[ProjectRoot]) -> i32 {
    let mut all_diagnostics = Vec::new();
    let mut should_report = false;

    for project in roots {
        let diagnostics = if ensure_supervisor_running(project).await {
            fetch_all_diagnostics(project).await.unwrap_or_default()
        } else {
            direct_check_project(project).await
        };

        if let Ok(mut store) = open_store(project) {
            if let Ok(result) = store.process_diagnostics(project.id(), project.path(), &diagnostics) {
                should_report |= result.should_report;
            }
        }
        all_diagnostics.extend(diagnostics);
    }

    if should_report {
        emit_system_message(&all_diagnostics);
        2
    } else {
        0
    }
}

/// Derives project roots for this event: the owning project of the
/// edited file if one was named, otherwise every nested project under
/// the working directory (plus the working directory itself).
fn resolve_project_roots(cwd: &Path, file: Option<&str>) -> Vec<ProjectRoot> {
    if let Some(file) = file {
        let root = find_project_root_for_file(Path::new(file)).unwrap_or_else(|| cwd.to_path_buf());
        return ProjectRoot::new(&root).into_iter().collect();
    }

    let mut roots = vec![cwd.to_path_buf()];
    roots.extend(registry::discover_nested_projects(cwd));
    roots.into_iter().filter_map(|root| ProjectRoot::new(&root).ok()).collect()
}

fn find_project_root_for_file(file: &Path) -> Option<PathBuf> {
    let mut dir = file.parent()?.to_path_buf();
    loop {
        for spec in registry::LANGUAGES {
            if spec.markers.iter().any(|marker| dir.join(marker).exists()) {
                return Some(dir);
            }
        }
        if !dir.pop() {
            return None;
        }
    }
}

async fn ensure_supervisor_running(project: &ProjectRoot) -> bool {
    let socket = paths::socket_path(project.id());
    if http::request_json(&socket, "GET", "/health", HEALTH_PROBE_TIMEOUT).await.is_ok() {
        return true;
    }
    spawn_supervisor_detached(project.path());
    false
}

fn spawn_supervisor_detached(root: &Path) {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("claude-lsp"));
    let result = std::process::Command::new(exe)
        .arg("start")
        .arg("--root")
        .arg(root)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    if let Err(err) = result {
        warn!(error = %err, "failed to spawn supervisor");
    }
}

fn open_store(project: &ProjectRoot) -> Result<Store, crate::store::StoreError> {
    Store::open(&paths::cache_dir(), project.id())
}

async fn fetch_all_diagnostics(project: &ProjectRoot) -> anyhow::Result<Vec<Diagnostic>> {
    let socket = paths::socket_path(project.id());
    let body = http::request_json(&socket, "GET", "/diagnostics/all", DISPATCH_TIMEOUT).await?;
    parse_diagnostics_body(&body)
}

async fn fetch_file_diagnostics(project: &ProjectRoot, file: &Path) -> anyhow::Result<Vec<Diagnostic>> {
    let socket = paths::socket_path(project.id());
    let target = format!("/diagnostics?file={}", urlencoding_encode(&file.to_string_lossy()));
    let body = http::request_json(&socket, "GET", &target, DISPATCH_TIMEOUT).await?;
    parse_diagnostics_body(&body)
}

fn parse_diagnostics_body(value: &serde_json::Value) -> anyhow::Result<Vec<Diagnostic>> {
    let diagnostics = value.get("diagnostics").cloned().unwrap_or_else(|| serde_json::Value::Array(Vec::new()));
    Ok(serde_json::from_value(diagnostics)?)
}

fn urlencoding_encode(input: &str) -> String {
    input
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            other => format!("%{other:02X}"),
        })
        .collect()
}

async fn direct_check_project(project: &ProjectRoot) -> Vec<Diagnostic> {
    let languages = registry::detect_languages(project.path());
    let mut diagnostics = Vec::new();
    for language in languages {
        let Some(spec) = registry::find(language) else { continue };
        diagnostics.extend(DirectBackend::new(spec).check_project(project.path()).await);
    }
    diagnostics
}

async fn direct_check_file(project: &ProjectRoot, file: &Path) -> Vec<Diagnostic> {
    let Some(extension) = file.extension().and_then(|e| e.to_str()) else {
        return Vec::new();
    };
    let Some(spec) = registry::language_for_extension(extension) else {
        return Vec::new();
    };
    DirectBackend::new(spec).check_file(project.path(), file).await
}

#[allow(clippy::print_stderr, reason = "the hook contract requires the sentinel line on stderr")]
fn emit_system_message(diagnostics: &[Diagnostic]) {
    let message = SystemMessage::build(diagnostics);
    match message.render_line() {
        Ok(line) => eprintln!("{line}"),
        Err(err) => warn!(error = %err, "failed to render system message"),
    }
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_aliases() {
        let json = r#"{"sessionId":"abc","workingDirectory":"/tmp","hookEventName":"PostToolUse","toolName":"Edit","input":{"file_path":"/tmp/a.rs"}}"#;
        let event: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.session_id.as_deref(), Some("abc"));
        assert_eq!(event.cwd.as_deref(), Some("/tmp"));
        assert_eq!(event.input.unwrap().file_path.as_deref(), Some("/tmp/a.rs"));
    }

    #[test]
    fn parses_snake_case_input_path_alias() {
        let json = r#"{"input":{"input_path":"/tmp/b.py"}}"#;
        let event: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.input.unwrap().file_path.as_deref(), Some("/tmp/b.py"));
    }

    #[test]
    fn unrecognized_hook_name_is_other() {
        assert!(matches!(HookKind::from_name(Some("Notification")), HookKind::Other));
        assert!(matches!(HookKind::from_name(None), HookKind::Other));
        assert!(matches!(HookKind::from_cli("notification"), HookKind::Other));
    }

    #[test]
    fn cli_event_kind_accepts_kebab_and_camel_case() {
        assert!(matches!(HookKind::from_cli("tool-use-completion"), HookKind::ToolUseCompletion));
        assert!(matches!(HookKind::from_cli("PostToolUse"), HookKind::ToolUseCompletion));
        assert!(matches!(HookKind::from_cli("session-start"), HookKind::SessionStart));
        assert!(matches!(HookKind::from_cli("stop"), HookKind::Stop));
        assert!(matches!(HookKind::from_cli("session-end"), HookKind::Stop));
    }

    #[test]
    fn file_specific_tool_classification() {
        assert!(is_file_specific_tool(Some("Edit")));
        assert!(is_file_specific_tool(Some("Write")));
        assert!(is_file_specific_tool(Some("MultiEdit")));
        assert!(is_file_specific_tool(Some("NotebookEdit")));
        assert!(!is_file_specific_tool(Some("Bash")));
        assert!(!is_file_specific_tool(None));
    }

    #[test]
    fn finds_project_root_by_marker() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        let nested = dir.path().join("src");
        std::fs::create_dir(&nested).unwrap();
        let file = nested.join("main.rs");
        std::fs::write(&file, "").unwrap();

        let root = find_project_root_for_file(&file).unwrap();
        assert_eq!(root, dir.path());
    }

    #[test]
    fn urlencoding_escapes_reserved_characters() {
        assert_eq!(urlencoding_encode("src/main.rs"), "src%2Fmain.rs");
        assert_eq!(urlencoding_encode("a-b_c.d~e"), "a-b_c.d~e");
    }

    #[tokio::test]
    async fn empty_payload_is_a_no_op() {
        assert_eq!(run("tool-use-completion", "").await, 0);
        assert_eq!(run("tool-use-completion", "not json").await, 0);
    }
}
