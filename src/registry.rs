// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Static language registry and project detection.
//!
//! For each supported language the registry declares the command that
//! launches its LSP server, the extensions it claims, and the marker
//! files that indicate a project uses it. Detection walks a directory
//! tree looking for those markers (or, for extension-only languages,
//! for matching source files).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

/// A statically declared language entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LanguageSpec {
    /// Short identifier used as the language key everywhere else
    /// (session map, config overrides, direct-checker dispatch).
    pub name: &'static str,
    /// Command that launches the stdio LSP server for this language.
    pub lsp_command: &'static str,
    /// Arguments passed to `lsp_command`.
    pub lsp_args: &'static [&'static str],
    /// File extensions (without the leading dot) this language claims.
    pub extensions: &'static [&'static str],
    /// Project-marker filenames; presence of any one marks the project
    /// as using this language. Empty means "detect by extension scan".
    pub markers: &'static [&'static str],
    /// Whether `lsp_command` is expected to be resolvable on `PATH`.
    pub on_path: bool,
    /// Directories, relative to a project root, to check for a
    /// project-local install of the direct-invocation tool before
    /// falling back to a bare `PATH` lookup (e.g. a project's own
    /// `node_modules/.bin/tsc` rather than whatever `tsc` is on `PATH`).
    /// Empty for languages whose direct checker has no such convention.
    pub direct_local_candidate_dirs: &'static [&'static str],
}

/// The compiled-in language table.
pub const LANGUAGES: &[LanguageSpec] = &[
    LanguageSpec {
        name: "typescript",
        lsp_command: "typescript-language-server",
        lsp_args: &["--stdio"],
        extensions: &["ts", "tsx", "js", "jsx", "mts", "cts"],
        markers: &["package.json", "tsconfig.json"],
        on_path: true,
        direct_local_candidate_dirs: &["node_modules/.bin"],
    },
    LanguageSpec {
        name: "python",
        lsp_command: "pyright-langserver",
        lsp_args: &["--stdio"],
        extensions: &["py", "pyi"],
        markers: &[
            "pyproject.toml",
            "setup.py",
            "requirements.txt",
            "Pipfile",
        ],
        on_path: true,
        direct_local_candidate_dirs: &[".venv/bin", "venv/bin", "env/bin"],
    },
    LanguageSpec {
        name: "go",
        lsp_command: "gopls",
        lsp_args: &[],
        extensions: &["go"],
        markers: &["go.mod"],
        on_path: true,
        direct_local_candidate_dirs: &[],
    },
    LanguageSpec {
        name: "rust",
        lsp_command: "rust-analyzer",
        lsp_args: &[],
        extensions: &["rs"],
        markers: &["Cargo.toml"],
        on_path: true,
        direct_local_candidate_dirs: &[],
    },
    LanguageSpec {
        name: "scala",
        lsp_command: "metals",
        lsp_args: &[],
        extensions: &["scala", "sc"],
        markers: &["build.sbt", "build.sc", "build.mill"],
        on_path: true,
        direct_local_candidate_dirs: &[],
    },
    LanguageSpec {
        name: "java",
        lsp_command: "jdtls",
        lsp_args: &[],
        extensions: &["java"],
        markers: &["pom.xml", "build.gradle", "build.gradle.kts"],
        on_path: true,
        direct_local_candidate_dirs: &[],
    },
    LanguageSpec {
        name: "c_cpp",
        lsp_command: "clangd",
        lsp_args: &[],
        extensions: &["c", "h", "cpp", "cc", "cxx", "hpp"],
        markers: &["CMakeLists.txt", "compile_commands.json"],
        on_path: true,
        direct_local_candidate_dirs: &[],
    },
    LanguageSpec {
        name: "php",
        lsp_command: "intelephense",
        lsp_args: &["--stdio"],
        extensions: &["php"],
        markers: &["composer.json"],
        on_path: true,
        direct_local_candidate_dirs: &[],
    },
    LanguageSpec {
        name: "ruby",
        lsp_command: "solargraph",
        lsp_args: &["stdio"],
        extensions: &["rb"],
        markers: &["Gemfile"],
        on_path: true,
        direct_local_candidate_dirs: &[],
    },
    LanguageSpec {
        name: "lua",
        lsp_command: "lua-language-server",
        lsp_args: &[],
        extensions: &["lua"],
        markers: &[],
        on_path: true,
        direct_local_candidate_dirs: &[],
    },
    LanguageSpec {
        name: "elixir",
        lsp_command: "elixir-ls",
        lsp_args: &[],
        extensions: &["ex", "exs"],
        markers: &["mix.exs"],
        on_path: true,
        direct_local_candidate_dirs: &[],
    },
    LanguageSpec {
        name: "terraform",
        lsp_command: "terraform-ls",
        lsp_args: &["serve"],
        extensions: &["tf", "tfvars"],
        markers: &[],
        on_path: true,
        direct_local_candidate_dirs: &[],
    },
    LanguageSpec {
        name: "json",
        lsp_command: "vscode-json-language-server",
        lsp_args: &["--stdio"],
        extensions: &["json"],
        markers: &[],
        on_path: true,
        direct_local_candidate_dirs: &[],
    },
];

/// Looks up a language spec by its name key.
#[must_use]
pub fn find(name: &str) -> Option<&'static LanguageSpec> {
    LANGUAGES.iter().find(|spec| spec.name == name)
}

/// Looks up the language that claims a given file extension (without the
/// leading dot), preferring the first match in table order.
#[must_use]
pub fn language_for_extension(extension: &str) -> Option<&'static LanguageSpec> {
    LANGUAGES
        .iter()
        .find(|spec| spec.extensions.contains(&extension))
}

/// Resolves `tool` against `language`'s project-local candidate
/// directories under `project_root`, returning the first one that
/// exists as a file. Falls back to `tool` unchanged (for a bare `PATH`
/// lookup) if the language is unknown or none of its candidates exist.
#[must_use]
pub fn resolve_direct_tool(language: &str, project_root: &Path, tool: &str) -> PathBuf {
    if let Some(spec) = find(language) {
        for dir in spec.direct_local_candidate_dirs {
            let candidate = project_root.join(dir).join(tool);
            if candidate.is_file() {
                return candidate;
            }
        }
    }
    PathBuf::from(tool)
}

/// Detects which languages are in use at `root` by marker-file presence,
/// falling back to an extension scan for languages with no markers.
#[must_use]
pub fn detect_languages(root: &Path) -> HashSet<&'static str> {
    let mut detected = HashSet::new();

    for spec in LANGUAGES {
        if spec.markers.iter().any(|marker| root.join(marker).is_file()) {
            detected.insert(spec.name);
        }
    }

    let extension_only: Vec<&LanguageSpec> = LANGUAGES
        .iter()
        .filter(|spec| spec.markers.is_empty() && !detected.contains(spec.name))
        .collect();

    if !extension_only.is_empty() {
        detected.extend(scan_for_extensions(root, &extension_only));
    }

    detected
}

fn scan_for_extensions(root: &Path, candidates: &[&LanguageSpec]) -> HashSet<&'static str> {
    let mut found = HashSet::new();
    let walker = WalkBuilder::new(root)
        .git_ignore(true)
        .hidden(true)
        .max_depth(Some(4))
        .build();

    for entry in walker.flatten() {
        if found.len() == candidates.len() {
            break;
        }
        let Some(extension) = entry.path().extension().and_then(|e| e.to_str()) else {
            continue;
        };
        for spec in candidates {
            if spec.extensions.contains(&extension) {
                found.insert(spec.name);
            }
        }
    }

    found
}

/// Directories never descended into when searching for nested projects.
const PROJECT_SKIP_LIST: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "vendor",
    ".venv",
    "venv",
    "__pycache__",
];

const MAX_NESTED_DEPTH: usize = 3;
const MAX_NESTED_PROJECTS: usize = 16;

/// Finds nested project roots beneath `base`, at most [`MAX_NESTED_DEPTH`]
/// levels deep, capped at [`MAX_NESTED_PROJECTS`] results. A directory
/// classified as a project is not descended into further.
#[must_use]
pub fn discover_nested_projects(base: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    discover_recursive(base, 0, &mut found);
    found
}

fn discover_recursive(dir: &Path, depth: usize, found: &mut Vec<PathBuf>) {
    if found.len() >= MAX_NESTED_PROJECTS {
        return;
    }

    if is_project_root(dir) {
        found.push(dir.to_path_buf());
        return;
    }

    if depth >= MAX_NESTED_DEPTH {
        return;
    }

    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        if found.len() >= MAX_NESTED_PROJECTS {
            return;
        }
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if PROJECT_SKIP_LIST
            .iter()
            .any(|skip| name.to_str() == Some(skip))
        {
            continue;
        }
        discover_recursive(&entry.path(), depth + 1, found);
    }
}

/// A directory is a project root if any language's marker file is present.
#[must_use]
pub fn is_project_root(dir: &Path) -> bool {
    LANGUAGES
        .iter()
        .any(|spec| spec.markers.iter().any(|marker| dir.join(marker).is_file()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn detects_typescript_project() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("package.json"), "{}")?;
        let detected = detect_languages(dir.path());
        assert!(detected.contains("typescript"));
        Ok(())
    }

    #[test]
    fn detects_lua_by_extension_only() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("init.lua"), "")?;
        let detected = detect_languages(dir.path());
        assert!(detected.contains("lua"));
        Ok(())
    }

    #[test]
    fn no_markers_no_detection() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let detected = detect_languages(dir.path());
        assert!(!detected.contains("rust"));
        Ok(())
    }

    #[test]
    fn nested_discovery_stops_at_project_boundary() -> std::io::Result<()> {
        let base = tempfile::tempdir()?;
        let nested = base.path().join("a").join("b");
        fs::create_dir_all(&nested)?;
        fs::write(nested.join("Cargo.toml"), "")?;
        // a deeper directory under the already-classified project must not
        // itself be returned as a separate root
        let deeper = nested.join("src");
        fs::create_dir_all(&deeper)?;
        fs::write(deeper.join("Cargo.toml"), "")?;

        let found = discover_nested_projects(base.path());
        assert_eq!(found, vec![nested]);
        Ok(())
    }

    #[test]
    fn nested_discovery_respects_depth_and_skip_list() -> std::io::Result<()> {
        let base = tempfile::tempdir()?;
        let skipped = base.path().join("node_modules").join("pkg");
        fs::create_dir_all(&skipped)?;
        fs::write(skipped.join("package.json"), "{}")?;

        let found = discover_nested_projects(base.path());
        assert!(found.is_empty());
        Ok(())
    }

    #[test]
    fn nested_discovery_caps_at_sixteen() -> std::io::Result<()> {
        let base = tempfile::tempdir()?;
        for i in 0..20 {
            let dir = base.path().join(format!("proj{i}"));
            fs::create_dir(&dir)?;
            fs::write(dir.join("Cargo.toml"), "")?;
        }
        let found = discover_nested_projects(base.path());
        assert_eq!(found.len(), MAX_NESTED_PROJECTS);
        Ok(())
    }

    #[test]
    fn resolve_direct_tool_prefers_project_local_install() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let bin_dir = dir.path().join("node_modules/.bin");
        fs::create_dir_all(&bin_dir)?;
        fs::write(bin_dir.join("tsc"), "")?;

        let resolved = resolve_direct_tool("typescript", dir.path(), "tsc");
        assert_eq!(resolved, bin_dir.join("tsc"));
        Ok(())
    }

    #[test]
    fn resolve_direct_tool_falls_back_to_bare_name() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let resolved = resolve_direct_tool("typescript", dir.path(), "tsc");
        assert_eq!(resolved, PathBuf::from("tsc"));
        Ok(())
    }

    #[test]
    fn language_for_extension_resolves() {
        assert_eq!(
            language_for_extension("rs").map(|spec| spec.name),
            Some("rust")
        );
        assert_eq!(language_for_extension("unknown_ext"), None);
    }
}
