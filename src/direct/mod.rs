// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Direct-invocation diagnostics back end.
//!
//! An alternative to the LSP multiplexer: for a given file, look up a
//! checker by extension, shell out to the matching compiler or linter
//! with a timeout, and parse its output into the same [`Diagnostic`]
//! shape the LSP path produces. Used when a project has no matching
//! language server configured, or when configuration prefers it.

/// Checkers with no special-cased parsing: run the native tool in
/// syntax-check mode and parse its well-known error format.
pub mod generic;
/// Module-aware `go vet`.
pub mod go;
/// JSON-output type checker preferred, column-aware linter fallback.
pub mod python;
/// Build-tool-or-best-effort classpath compile.
pub mod scala;
/// Temporary single-file `tsconfig.json` synthesis.
pub mod typescript;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::warn;

use crate::diagnostics::Diagnostic;

/// Soft timeout applied to every direct-invocation checker.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Output is truncated past this many bytes, matching the shell-execution
/// tool's own ceiling so a runaway compiler can't blow up memory.
pub const MAX_OUTPUT_BYTES: usize = 100 * 1024;

/// Outcome of running one checker against one file.
#[derive(Debug, Clone, Default)]
pub struct CheckResult {
    /// Diagnostics parsed from the tool's output.
    pub diagnostics: Vec<Diagnostic>,
    /// Set when the tool was killed for exceeding [`CHECK_TIMEOUT`]
    /// rather than exiting on its own.
    pub timed_out: bool,
}

/// Runs the checker registered for `language` against `file`.
///
/// Unknown languages fall through to [`generic::check`], which itself
/// returns an empty result for extensions with no native syntax-check
/// mode.
pub async fn check_file(language: &str, project_root: &Path, file: &Path) -> CheckResult {
    match language {
        "typescript" | "javascript" => typescript::check(project_root, file).await,
        "python" => python::check(project_root, file).await,
        "go" => go::check(project_root, file).await,
        "scala" => scala::check(project_root, file).await,
        other => generic::check(other, project_root, file).await,
    }
}

/// Spawns `cmd`, waits up to [`CHECK_TIMEOUT`] for it to exit, and
/// returns its exit code plus truncated stdout/stderr. Kills the child
/// and sets `timed_out` on expiry.
pub(crate) async fn run_checked(mut cmd: Command) -> (Option<i32>, String, String, bool) {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(error = %err, "failed to spawn direct-invocation checker");
            return (None, String::new(), String::new(), false);
        }
    };

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let read_pipes = async {
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        if let Some(mut pipe) = stdout_pipe.take() {
            let _ = pipe.read_to_end(&mut stdout_buf).await;
        }
        if let Some(mut pipe) = stderr_pipe.take() {
            let _ = pipe.read_to_end(&mut stderr_buf).await;
        }
        (stdout_buf, stderr_buf)
    };

    let wait = async {
        let (stdout_buf, stderr_buf) = read_pipes.await;
        let status = child.wait().await;
        (status, stdout_buf, stderr_buf)
    };

    match tokio::time::timeout(CHECK_TIMEOUT, wait).await {
        Ok((status, stdout_buf, stderr_buf)) => {
            let code = status.ok().and_then(|s| s.code());
            (
                code,
                truncate_output(&stdout_buf),
                truncate_output(&stderr_buf),
                false,
            )
        }
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            (None, String::new(), String::new(), true)
        }
    }
}

/// Truncates `bytes` to [`MAX_OUTPUT_BYTES`], losslessly decoding what
/// remains (lossy past the cut point, where a multi-byte character may
/// have been split).
pub(crate) fn truncate_output(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_OUTPUT_BYTES {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        String::from_utf8_lossy(&bytes[..MAX_OUTPUT_BYTES]).into_owned()
    }
}

/// Walks up from `start` looking for `marker`, returning the containing
/// directory of the nearest match.
pub(crate) fn find_upward(start: &Path, marker: &str) -> Option<std::path::PathBuf> {
    let mut dir = if start.is_dir() {
        Some(start)
    } else {
        start.parent()
    };
    while let Some(candidate) = dir {
        if candidate.join(marker).exists() {
            return Some(candidate.to_path_buf());
        }
        dir = candidate.parent();
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn truncate_output_passes_short_input() {
        assert_eq!(truncate_output(b"hello"), "hello");
    }

    #[test]
    fn truncate_output_caps_long_input() {
        let big = vec![b'a'; MAX_OUTPUT_BYTES + 100];
        assert_eq!(truncate_output(&big).len(), MAX_OUTPUT_BYTES);
    }

    #[test]
    fn find_upward_locates_marker_in_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("a/marker.json"), "{}").unwrap();

        let found = find_upward(&nested, "marker.json");
        assert_eq!(found, Some(dir.path().join("a")));
    }

    #[test]
    fn find_upward_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_upward(dir.path(), "nonexistent.marker"), None);
    }
}
