/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! One running language-server child process: its JSON-RPC channel,
//! initialization handshake, per-document version counter, and
//! published-diagnostics buffer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{debug, trace, warn};

use crate::diagnostics::{Diagnostic, Severity};
use crate::lsp::protocol::{self, NotificationMessage, RequestId, RequestMessage, ResponseMessage};
use crate::registry::LanguageSpec;

/// Default timeout for LSP requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Scala Metals defers indexing; give it this long before assuming ready.
const METALS_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Window after startup during which "no diagnostics published yet" does
/// not mean the server has nothing to say about a file.
pub const WARMUP_PERIOD: Duration = Duration::from_secs(10);

type DiagnosticsCache = Arc<Mutex<HashMap<PathBuf, Vec<Diagnostic>>>>;
type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ResponseMessage>>>>;

/// Outcome of waiting for a diagnostics update on a specific file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticsWaitResult {
    /// A new publication arrived.
    Updated,
    /// The child process died while waiting.
    ServerDied,
    /// Timed out with no publication and no sign one is imminent.
    Inactive,
}

/// Manages communication with one language-server process.
pub struct LspSession {
    language: &'static str,
    next_id: AtomicI64,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: PendingMap,
    diagnostics: DiagnosticsCache,
    generation: Arc<AtomicI64>,
    changed: Arc<Notify>,
    document_versions: Mutex<HashMap<PathBuf, i32>>,
    alive: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
    has_published: Arc<AtomicBool>,
    started_at: Instant,
    _reader_handle: tokio::task::JoinHandle<()>,
    _child: Mutex<Child>,
}

impl LspSession {
    /// Spawns the language-server child for `spec` rooted at `project_root`
    /// and starts reading its stdout in the background. `command` is the
    /// executable to run (the registry default, or a configured
    /// override); `extra_args` are appended after the registry's own
    /// argument list.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be spawned.
    pub async fn spawn(
        spec: &LanguageSpec,
        project_root: &Path,
        command: &str,
        extra_args: &[String],
    ) -> Result<Self> {
        let mut child = Command::new(command)
            .args(spec.lsp_args)
            .args(extra_args)
            .current_dir(project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {} language server", spec.name))?;

        let stdin = child.stdin.take().context("child has no stdin")?;
        let stdout = child.stdout.take().context("child has no stdout")?;
        let stderr = child.stderr.take().context("child has no stderr")?;

        let stdin = Arc::new(Mutex::new(stdin));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let diagnostics: DiagnosticsCache = Arc::new(Mutex::new(HashMap::new()));
        let generation = Arc::new(AtomicI64::new(0));
        let changed = Arc::new(Notify::new());
        let alive = Arc::new(AtomicBool::new(true));
        let ready = Arc::new(AtomicBool::new(false));
        let has_published = Arc::new(AtomicBool::new(false));

        let reader_handle = tokio::spawn(Self::reader_task(
            stdin.clone(),
            stdout,
            pending.clone(),
            diagnostics.clone(),
            generation.clone(),
            changed.clone(),
            alive.clone(),
            ready.clone(),
            has_published.clone(),
            spec.name,
        ));
        tokio::spawn(drain_stderr(stderr, spec.name));

        Ok(Self {
            language: spec.name,
            next_id: AtomicI64::new(1),
            stdin,
            pending,
            diagnostics,
            generation,
            changed,
            document_versions: Mutex::new(HashMap::new()),
            alive,
            ready,
            has_published,
            started_at: Instant::now(),
            _reader_handle: reader_handle,
            _child: Mutex::new(child),
        })
    }

    /// The language this session serves.
    #[must_use]
    pub fn language(&self) -> &'static str {
        self.language
    }

    /// Whether the child process is still believed to be alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Whether initialization has completed (and, for Scala, the indexing
    /// heuristic has fired or timed out).
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Runs the `initialize`/`initialized` handshake. `init_override`, if
    /// set, replaces the language's own default `initializationOptions`
    /// (a configured per-language override takes precedence over the
    /// built-in heuristics such as the Python venv interpreter lookup).
    ///
    /// # Errors
    ///
    /// Returns an error if the `initialize` request fails or times out.
    pub async fn initialize(&self, project_root: &Path, init_override: Option<&serde_json::Value>) -> Result<()> {
        let root_uri = path_to_uri(project_root);
        let init_options = init_override
            .cloned()
            .unwrap_or_else(|| initialization_options(self.language, project_root));
        let params = serde_json::json!({
            "processId": std::process::id(),
            "rootUri": root_uri,
            "workspaceFolders": [{ "uri": root_uri, "name": "root" }],
            "capabilities": {
                "textDocument": {
                    "publishDiagnostics": {
                        "relatedInformation": true,
                        "versionSupport": true,
                        "codeDescriptionSupport": true,
                    },
                },
                "workspace": { "workspaceFolders": true, "configuration": true },
            },
            "initializationOptions": init_options,
        });

        self.request_raw("initialize", params).await?;
        self.notify("initialized", serde_json::json!({})).await?;

        if self.language == "scala" {
            let ready = self.ready.clone();
            let changed = self.changed.clone();
            tokio::spawn(async move {
                tokio::time::sleep(METALS_READY_TIMEOUT).await;
                ready.store(true, Ordering::SeqCst);
                changed.notify_waiters();
            });
        } else {
            self.ready.store(true, Ordering::SeqCst);
        }

        debug!(language = self.language, "lsp session initialized");
        Ok(())
    }

    /// Sends `textDocument/didOpen`, recording version 1 for the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be written.
    pub async fn did_open(&self, path: &Path, language_id: &str, text: &str) -> Result<()> {
        self.document_versions.lock().await.insert(path.to_path_buf(), 1);
        let params = serde_json::json!({
            "textDocument": {
                "uri": path_to_uri(path),
                "languageId": language_id,
                "version": 1,
                "text": text,
            }
        });
        self.notify("textDocument/didOpen", params).await
    }

    /// Sends `textDocument/didChange` as a full-content replacement and
    /// returns the new (strictly increasing) version number.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be written, or if the
    /// document was never opened.
    pub async fn did_change(&self, path: &Path, text: &str) -> Result<i32> {
        let version = {
            let mut versions = self.document_versions.lock().await;
            let entry = versions
                .get_mut(path)
                .context("did_change on a document that was never opened")?;
            *entry += 1;
            *entry
        };
        let params = serde_json::json!({
            "textDocument": { "uri": path_to_uri(path), "version": version },
            "contentChanges": [{ "text": text }],
        });
        self.notify("textDocument/didChange", params).await?;
        Ok(version)
    }

    /// Sends `textDocument/didSave`, used to nudge servers (Pyright, PHP)
    /// that only recompute diagnostics on save.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be written.
    pub async fn did_save(&self, path: &Path) -> Result<()> {
        let params = serde_json::json!({ "textDocument": { "uri": path_to_uri(path) } });
        self.notify("textDocument/didSave", params).await
    }

    /// Sends `textDocument/didClose` and forgets the document's version.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be written.
    pub async fn did_close(&self, path: &Path) -> Result<()> {
        self.document_versions.lock().await.remove(path);
        let params = serde_json::json!({ "textDocument": { "uri": path_to_uri(path) } });
        self.notify("textDocument/didClose", params).await
    }

    /// Returns the most recently published diagnostics for `path`.
    pub async fn get_diagnostics(&self, path: &Path) -> Vec<Diagnostic> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.diagnostics.lock().await.get(&canonical).cloned().unwrap_or_default()
    }

    /// Returns diagnostics for every file this session currently tracks.
    pub async fn get_all_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().await.values().flatten().cloned().collect()
    }

    /// The current diagnostics-publication generation counter. Pass the
    /// value observed before a change as `since_generation` to
    /// [`Self::wait_for_diagnostics_update`].
    #[must_use]
    pub fn generation(&self) -> i64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Waits up to `timeout` for a diagnostics publication strictly newer
    /// than `since_generation`.
    ///
    /// During [`WARMUP_PERIOD`] after the session was spawned, a session
    /// that has never published anything is not treated as inactive — it
    /// is given the full timeout, since some servers (pyright, metals)
    /// stay silent until the first file is opened.
    pub async fn wait_for_diagnostics_update(
        &self,
        since_generation: i64,
        timeout: Duration,
    ) -> DiagnosticsWaitResult {
        let deadline = Instant::now() + timeout;

        loop {
            if !self.is_alive() {
                return DiagnosticsWaitResult::ServerDied;
            }
            if self.generation.load(Ordering::SeqCst) > since_generation {
                return DiagnosticsWaitResult::Updated;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return DiagnosticsWaitResult::Inactive;
            }

            let never_published = !self.has_published.load(Ordering::SeqCst);
            let still_warming_up = self.started_at.elapsed() < WARMUP_PERIOD;
            if never_published && !still_warming_up {
                return DiagnosticsWaitResult::Inactive;
            }

            tokio::select! {
                () = self.changed.notified() => {},
                () = tokio::time::sleep(remaining.min(Duration::from_millis(100))) => {},
            }
        }
    }

    /// Sends `shutdown` then `exit` and kills the child if it does not
    /// exit promptly.
    ///
    /// # Errors
    ///
    /// Returns an error only if killing an unresponsive child fails; a
    /// rejected `shutdown` request does not prevent termination.
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.request_raw("shutdown", serde_json::Value::Null).await;
        let _ = self.notify("exit", serde_json::Value::Null).await;
        self.alive.store(false, Ordering::SeqCst);
        self.changed.notify_waiters();

        let mut child = self._child.lock().await;
        if tokio::time::timeout(Duration::from_secs(2), child.wait()).await.is_err() {
            child.start_kill().context("failed to kill unresponsive language server")?;
        }
        Ok(())
    }

    async fn request_raw(&self, method: &str, params: serde_json::Value) -> Result<ResponseMessage> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let request = RequestMessage {
            jsonrpc: "2.0".to_string(),
            id: id.clone(),
            method: method.to_string(),
            params,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if let Err(err) = self.send_message(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(anyhow!("lsp server closed connection before responding to {method}")),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(anyhow!("lsp request '{method}' timed out after {REQUEST_TIMEOUT:?}"))
            }
        }
    }

    async fn notify(&self, method: &str, params: serde_json::Value) -> Result<()> {
        let notification = NotificationMessage {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        };
        self.send_message(&notification).await
    }

    async fn send_message<T: serde::Serialize>(&self, message: &T) -> Result<()> {
        let body = serde_json::to_string(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        trace!(language = self.language, "sending lsp message: {}", body);

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(header.as_bytes()).await?;
        stdin.write_all(body.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments, reason = "reader task threads every shared handle through")]
    async fn reader_task(
        stdin: Arc<Mutex<ChildStdin>>,
        stdout: ChildStdout,
        pending: PendingMap,
        diagnostics: DiagnosticsCache,
        generation: Arc<AtomicI64>,
        changed: Arc<Notify>,
        alive: Arc<AtomicBool>,
        ready: Arc<AtomicBool>,
        has_published: Arc<AtomicBool>,
        language: &'static str,
    ) {
        let mut stdout = stdout;
        let mut buffer = BytesMut::with_capacity(8192);
        let mut temp = [0_u8; 4096];

        loop {
            match stdout.read(&mut temp).await {
                Ok(0) => {
                    debug!(language, "lsp stdout closed");
                    break;
                }
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
                Err(err) => {
                    warn!(language, error = %err, "error reading from lsp stdout");
                    break;
                }
            }

            while let Ok(Some(message_str)) = protocol::try_parse_message(&mut buffer) {
                let Ok(value) = serde_json::from_str::<serde_json::Value>(&message_str) else {
                    warn!(language, "failed to parse lsp message as json");
                    continue;
                };

                if let Some(method) = value.get("method").and_then(|m| m.as_str()) {
                    if let Some(id) = value.get("id") {
                        Self::reply_method_not_found(&stdin, id, method).await;
                    } else if let Ok(notification) = serde_json::from_value::<NotificationMessage>(value) {
                        Self::handle_notification(&notification, &diagnostics, &generation, &changed, &ready, &has_published, language).await;
                    }
                } else if value.get("id").is_some() {
                    if let Ok(response) = serde_json::from_value::<ResponseMessage>(value) {
                        if let Some(id) = &response.id {
                            if let Some(sender) = pending.lock().await.remove(id) {
                                let _ = sender.send(response);
                            }
                        }
                    }
                }
            }
        }

        alive.store(false, Ordering::SeqCst);
        changed.notify_waiters();
        warn!(language, "lsp reader task exiting, server connection lost");
    }

    /// We don't implement any server-initiated requests (workspace
    /// configuration pull, work-done progress create), so reply
    /// `MethodNotFound` to unblock servers that wait on an answer.
    async fn reply_method_not_found(stdin: &Arc<Mutex<ChildStdin>>, id: &serde_json::Value, method: &str) {
        debug!(method, "received server request, replying MethodNotFound");
        let response = ResponseMessage {
            jsonrpc: "2.0".to_string(),
            id: serde_json::from_value(id.clone()).ok(),
            result: None,
            error: Some(protocol::ResponseError {
                code: -32601,
                message: format!("method '{method}' not supported by client"),
                data: None,
            }),
        };
        if let Ok(body) = serde_json::to_string(&response) {
            let header = format!("Content-Length: {}\r\n\r\n", body.len());
            let mut stdin = stdin.lock().await;
            let _ = stdin.write_all(header.as_bytes()).await;
            let _ = stdin.write_all(body.as_bytes()).await;
            let _ = stdin.flush().await;
        }
    }

    #[allow(clippy::too_many_arguments, reason = "notification handling threads every shared handle through")]
    async fn handle_notification(
        notification: &NotificationMessage,
        diagnostics: &DiagnosticsCache,
        generation: &Arc<AtomicI64>,
        changed: &Arc<Notify>,
        ready: &Arc<AtomicBool>,
        has_published: &Arc<AtomicBool>,
        language: &'static str,
    ) {
        match notification.method.as_str() {
            "textDocument/publishDiagnostics" => {
                Self::handle_publish_diagnostics(&notification.params, diagnostics, generation, changed, has_published, language).await;
            }
            "window/logMessage" if language == "scala" => {
                let message = notification.params.get("message").and_then(|m| m.as_str()).unwrap_or_default();
                if message.to_ascii_lowercase().contains("indexing complete") {
                    ready.store(true, Ordering::SeqCst);
                    changed.notify_waiters();
                }
            }
            _ => trace!(language, method = %notification.method, "ignoring notification"),
        }
    }

    async fn handle_publish_diagnostics(
        params: &serde_json::Value,
        diagnostics: &DiagnosticsCache,
        generation: &Arc<AtomicI64>,
        changed: &Arc<Notify>,
        has_published: &Arc<AtomicBool>,
        language: &'static str,
    ) {
        let Some(path) = params.get("uri").and_then(|u| u.as_str()).and_then(uri_to_path) else {
            warn!(language, "publishDiagnostics with unparseable uri");
            return;
        };
        let items = params.get("diagnostics").and_then(|d| d.as_array()).cloned().unwrap_or_default();
        let parsed: Vec<Diagnostic> = items.iter().filter_map(|item| parse_lsp_diagnostic(item, &path, language)).collect();

        let mut cache = diagnostics.lock().await;

        // Metals republishes an empty set while reindexing a file that
        // still has real diagnostics pending; don't let that clobber them.
        if language == "scala" && parsed.is_empty() && cache.get(&path).is_some_and(|existing| !existing.is_empty()) {
            return;
        }

        debug!(language, file = %path.display(), count = parsed.len(), "received diagnostics");
        cache.insert(path, parsed);
        drop(cache);

        has_published.store(true, Ordering::SeqCst);
        generation.fetch_add(1, Ordering::SeqCst);
        changed.notify_waiters();
    }
}

/// Pyright wants an interpreter path and analysis mode; everything else
/// gets no initialization options.
fn initialization_options(language: &str, project_root: &Path) -> serde_json::Value {
    if language != "python" {
        return serde_json::json!({});
    }
    serde_json::json!({
        "python": {
            "pythonPath": detect_venv_interpreter(project_root),
            "analysis": { "autoSearchPaths": true, "diagnosticMode": "workspace" },
        }
    })
}

fn detect_venv_interpreter(project_root: &Path) -> Option<String> {
    [".venv", "venv", "env"]
        .into_iter()
        .map(|name| project_root.join(name).join("bin").join("python"))
        .find(|candidate| candidate.is_file())
        .map(|path| path.to_string_lossy().into_owned())
}

fn path_to_uri(path: &Path) -> String {
    url::Url::from_file_path(path).map_or_else(|()| format!("file://{}", path.display()), |url| url.to_string())
}

fn uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri).ok()?.to_file_path().ok()
}

fn parse_lsp_diagnostic(item: &serde_json::Value, path: &Path, source: &str) -> Option<Diagnostic> {
    let start = item.get("range")?.get("start")?;
    let line = u32::try_from(start.get("line")?.as_u64()?).ok()? + 1;
    let column = u32::try_from(start.get("character")?.as_u64()?).ok()? + 1;
    let message = item.get("message")?.as_str()?.to_string();
    let severity = match item.get("severity").and_then(serde_json::Value::as_u64) {
        Some(2) => Severity::Warning,
        Some(3) => Severity::Info,
        Some(4) => Severity::Hint,
        _ => Severity::Error,
    };
    let rule_id = item.get("code").and_then(|code| {
        code.as_str().map(ToOwned::to_owned).or_else(|| code.as_i64().map(|n| n.to_string()))
    });

    Some(Diagnostic {
        file: path.to_path_buf(),
        line,
        column,
        severity,
        message,
        source: source.to_string(),
        rule_id,
    })
}

async fn drain_stderr(mut stderr: tokio::process::ChildStderr, language: &'static str) {
    let mut buf = Vec::new();
    if stderr.read_to_end(&mut buf).await.is_ok() && !buf.is_empty() {
        debug!(language, bytes = buf.len(), "language server stderr output");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_uri_round_trip() {
        let path = Path::new("/tmp/project/src/main.rs");
        let uri = path_to_uri(path);
        assert_eq!(uri_to_path(&uri).as_deref(), Some(path));
    }

    #[test]
    fn parses_basic_diagnostic() {
        let item = serde_json::json!({
            "range": { "start": { "line": 4, "character": 2 }, "end": { "line": 4, "character": 10 } },
            "severity": 2,
            "message": "unused variable",
            "code": "unused-var",
        });
        let diagnostic = parse_lsp_diagnostic(&item, Path::new("/tmp/a.ts"), "typescript").unwrap();
        assert_eq!(diagnostic.line, 5);
        assert_eq!(diagnostic.column, 3);
        assert_eq!(diagnostic.severity, Severity::Warning);
        assert_eq!(diagnostic.rule_id.as_deref(), Some("unused-var"));
    }

    #[test]
    fn initialization_options_empty_for_non_python() {
        assert_eq!(initialization_options("rust", Path::new("/tmp")), serde_json::json!({}));
    }
}
