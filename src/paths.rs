// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Filesystem layout: the platform runtime directory that holds per-project
//! sockets, PID files, and start-time files, and the cache directory that
//! holds the dedup store.

use std::path::PathBuf;

/// Environment variable that overrides the runtime directory.
const RUNTIME_DIR_ENV: &str = "CLAUDE_LSP_RUNTIME_DIR";

/// Resolves the platform-appropriate user runtime directory: an explicit
/// environment override first, `dirs::runtime_dir()` second (XDG on
/// Linux), then a fallback under the user's cache/home directory for
/// platforms (notably macOS) with no native runtime-dir concept.
#[must_use]
pub fn runtime_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(RUNTIME_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Some(dir) = dirs::runtime_dir() {
        return dir;
    }
    dirs::cache_dir()
        .or_else(dirs::home_dir)
        .map(|dir| dir.join("claude-lsp").join("run"))
        .unwrap_or_else(|| PathBuf::from("/tmp/claude-lsp"))
}

/// Resolves the cache directory that holds the per-project dedup store.
#[must_use]
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .or_else(dirs::home_dir)
        .map(|dir| dir.join("claude-lsp"))
        .unwrap_or_else(|| PathBuf::from("/tmp/claude-lsp"))
}

/// Path of the stream socket for project `id`.
#[must_use]
pub fn socket_path(id: &str) -> PathBuf {
    runtime_dir().join(format!("claude-lsp-{id}.sock"))
}

/// Path of the PID file sibling to the socket for project `id`.
#[must_use]
pub fn pid_path(id: &str) -> PathBuf {
    runtime_dir().join(format!("claude-lsp-{id}.pid"))
}

/// Path of the start-time file sibling to the socket for project `id`.
#[must_use]
pub fn start_path(id: &str) -> PathBuf {
    runtime_dir().join(format!("claude-lsp-{id}.start"))
}

/// Ensures the runtime directory exists with owner-only permissions
/// (`0o700`), creating it if necessary.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or its
/// permissions cannot be set.
pub fn ensure_runtime_dir() -> std::io::Result<PathBuf> {
    let dir = runtime_dir();
    std::fs::create_dir_all(&dir)?;
    set_owner_only(&dir)?;
    Ok(dir)
}

#[cfg(unix)]
fn set_owner_only(dir: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn set_owner_only(_dir: &std::path::Path) -> std::io::Result<()> {
    Ok(())
}

/// Removes the socket, PID, and start files for project `id`, tolerating
/// their absence.
pub fn cleanup_project_files(id: &str) {
    for path in [socket_path(id), pid_path(id), start_path(id)] {
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn socket_pid_start_paths_share_the_id() {
        let dir = runtime_dir();
        assert_eq!(socket_path("abc123"), dir.join("claude-lsp-abc123.sock"));
        assert_eq!(pid_path("abc123"), dir.join("claude-lsp-abc123.pid"));
        assert_eq!(start_path("abc123"), dir.join("claude-lsp-abc123.start"));
    }
}
