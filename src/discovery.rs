// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! File discovery and the unifying [`DiagnosticsBackend`] trait: the LSP
//! multiplexer and the direct-invocation registry answer the same two
//! questions ("diagnostics for this whole project", "diagnostics for
//! this one file") so the rest of the pipeline does not need to know
//! which back end produced a result.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ignore::WalkBuilder;

use crate::config::Config;
use crate::diagnostics::Diagnostic;
use crate::direct;
use crate::ignore_engine::IgnoreEngine;
use crate::lsp::SessionManager;
use crate::registry::{self, LanguageSpec};

/// Files are opened this many at a time to avoid flooding a language
/// server with a burst of `didOpen` notifications.
const OPEN_BATCH_SIZE: usize = 5;
/// Pause between batches of `didOpen` notifications.
const INTER_BATCH_PAUSE: Duration = Duration::from_millis(50);
/// Bounded wait before collecting project-wide diagnostics.
const PROJECT_WAIT: Duration = Duration::from_secs(2);
/// Bounded wait before collecting file-scoped diagnostics.
const FILE_WAIT: Duration = Duration::from_millis(1500);

/// Diagnostics for a project or a single file, produced by whichever
/// back end a language is configured to use.
pub trait DiagnosticsBackend {
    /// Checks every file of this backend's language across the project.
    fn check_project(&self, root: &Path) -> impl Future<Output = Vec<Diagnostic>> + Send;

    /// Checks a single file.
    fn check_file(&self, root: &Path, file: &Path) -> impl Future<Output = Vec<Diagnostic>> + Send;
}

/// Drives one language's session through open/wait/collect.
pub struct LspBackend<'a> {
    manager: &'a SessionManager,
    spec: &'static LanguageSpec,
}

impl<'a> LspBackend<'a> {
    /// Creates a backend bound to `spec`'s language within `manager`.
    #[must_use]
    pub fn new(manager: &'a SessionManager, spec: &'static LanguageSpec) -> Self {
        Self { manager, spec }
    }
}

impl DiagnosticsBackend for LspBackend<'_> {
    async fn check_project(&self, root: &Path) -> Vec<Diagnostic> {
        let Ok(session) = self.manager.get_session(self.spec.name).await else {
            return Vec::new();
        };

        let extensions: HashSet<&str> = self.spec.extensions.iter().copied().collect();
        let ignore = IgnoreEngine::load(root);
        let files = discover_files(root, &ignore, &extensions);

        for batch in files.chunks(OPEN_BATCH_SIZE) {
            for file in batch {
                if let Ok(text) = tokio::fs::read_to_string(file).await {
                    let _ = session.did_open(file, self.spec.name, &text).await;
                }
            }
            tokio::time::sleep(INTER_BATCH_PAUSE).await;
        }

        tokio::time::sleep(PROJECT_WAIT).await;
        session.get_all_diagnostics().await
    }

    async fn check_file(&self, _root: &Path, file: &Path) -> Vec<Diagnostic> {
        let Ok(session) = self.manager.get_session(self.spec.name).await else {
            return Vec::new();
        };
        let Ok(text) = tokio::fs::read_to_string(file).await else {
            return Vec::new();
        };

        let generation = session.generation();
        if session.get_diagnostics(file).await.is_empty() {
            let _ = session.did_open(file, self.spec.name, &text).await;
        } else {
            let _ = session.did_change(file, &text).await;
        }
        session.wait_for_diagnostics_update(generation, FILE_WAIT).await;
        session.get_diagnostics(file).await
    }
}

/// Drives the direct-invocation checker for one language.
pub struct DirectBackend {
    spec: &'static LanguageSpec,
}

impl DirectBackend {
    /// Creates a backend bound to `spec`'s language.
    #[must_use]
    pub fn new(spec: &'static LanguageSpec) -> Self {
        Self { spec }
    }
}

impl DiagnosticsBackend for DirectBackend {
    async fn check_project(&self, root: &Path) -> Vec<Diagnostic> {
        let extensions: HashSet<&str> = self.spec.extensions.iter().copied().collect();
        let ignore = IgnoreEngine::load(root);
        let files = discover_files(root, &ignore, &extensions);

        let mut diagnostics = Vec::new();
        for file in files {
            diagnostics.extend(direct::check_file(self.spec.name, root, &file).await.diagnostics);
        }
        diagnostics
    }

    async fn check_file(&self, root: &Path, file: &Path) -> Vec<Diagnostic> {
        direct::check_file(self.spec.name, root, file).await.diagnostics
    }
}

/// Selects the direct-invocation back end when configuration prefers it
/// or the language's checker is not disabled and no server is reachable;
/// otherwise the LSP back end.
#[must_use]
pub fn backend_choice(config: &Config, language: &str) -> BackendChoice {
    if config.is_direct_invocation_preferred(language) {
        BackendChoice::Direct
    } else {
        BackendChoice::Lsp
    }
}

/// Which back end a language resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    /// The LSP multiplexer.
    Lsp,
    /// The direct-invocation registry.
    Direct,
}

/// Runs project-wide diagnostics for every detected language under
/// `root`, using each language's configured back end.
pub async fn check_project_all(
    config: &Config,
    manager: &SessionManager,
    root: &Path,
    languages: &HashSet<&'static str>,
) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for &language in languages {
        let Some(spec) = registry::find(language) else { continue };
        diagnostics.extend(check_project_one(config, manager, root, spec).await);
    }
    diagnostics
}

async fn check_project_one(
    config: &Config,
    manager: &SessionManager,
    root: &Path,
    spec: &'static LanguageSpec,
) -> Vec<Diagnostic> {
    match backend_choice(config, spec.name) {
        BackendChoice::Lsp => LspBackend::new(manager, spec).check_project(root).await,
        BackendChoice::Direct => {
            if config.direct_check_disabled(spec.name) {
                Vec::new()
            } else {
                DirectBackend::new(spec).check_project(root).await
            }
        }
    }
}

/// Runs diagnostics for a single `file`, dispatching on its extension's
/// language and that language's configured back end.
pub async fn check_file(
    config: &Config,
    manager: &SessionManager,
    root: &Path,
    file: &Path,
) -> Vec<Diagnostic> {
    let Some(extension) = file.extension().and_then(|e| e.to_str()) else {
        return Vec::new();
    };
    let Some(spec) = registry::language_for_extension(extension) else {
        return Vec::new();
    };

    match backend_choice(config, spec.name) {
        BackendChoice::Lsp => LspBackend::new(manager, spec).check_file(root, file).await,
        BackendChoice::Direct => {
            if config.direct_check_disabled(spec.name) {
                Vec::new()
            } else {
                DirectBackend::new(spec).check_file(root, file).await
            }
        }
    }
}

/// Enumerates files under `root` matching `extensions`, excluding
/// anything the ignore engine rejects.
fn discover_files(root: &Path, ignore: &IgnoreEngine, extensions: &HashSet<&str>) -> Vec<PathBuf> {
    let walker = WalkBuilder::new(root).hidden(true).git_ignore(true).build();

    walker
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if !path.is_file() {
                return None;
            }
            let extension = path.extension().and_then(|e| e.to_str())?;
            if !extensions.contains(extension) {
                return None;
            }
            let relative = path.strip_prefix(root).unwrap_or(path);
            if ignore.is_ignored(relative, false) {
                return None;
            }
            Some(path.to_path_buf())
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn discover_files_respects_extensions_and_ignore() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "").unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/c.rs"), "").unwrap();

        let ignore = IgnoreEngine::load(dir.path());
        let extensions: HashSet<&str> = ["rs"].into_iter().collect();
        let files = discover_files(dir.path(), &ignore, &extensions);

        assert_eq!(files, vec![dir.path().join("a.rs")]);
    }

    #[test]
    fn direct_preferred_when_configured() {
        let mut config = Config::default();
        config.server.insert(
            "rust".to_string(),
            crate::config::ServerConfig {
                prefer_direct: true,
                ..Default::default()
            },
        );
        assert_eq!(backend_choice(&config, "rust"), BackendChoice::Direct);
        assert_eq!(backend_choice(&config, "python"), BackendChoice::Lsp);
    }
}
