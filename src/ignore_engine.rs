// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Ignore engine: a single predicate answering "is this relative path
//! ignored?", built from a project's gitignore-style file unioned with a
//! fixed built-in ignore list.

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

/// Directories and path fragments that are always ignored, regardless of
/// what a project's own ignore file says.
const BUILTIN_IGNORE: &[&str] = &[
    "node_modules/",
    ".git/",
    "target/",
    "dist/",
    "build/",
    ".venv/",
    "venv/",
    "__pycache__/",
    ".mypy_cache/",
    ".pytest_cache/",
    "vendor/",
    ".next/",
    ".nuxt/",
    "coverage/",
];

/// Answers "is this relative path ignored?" for one project root.
pub struct IgnoreEngine {
    matcher: Gitignore,
}

impl IgnoreEngine {
    /// Builds an ignore engine for `root`, loading `.gitignore` if present
    /// and unioning it with the built-in ignore list.
    #[must_use]
    pub fn load(root: &Path) -> Self {
        let mut builder = GitignoreBuilder::new(root);

        for pattern in BUILTIN_IGNORE {
            // Built-in patterns are fixed strings we control; a parse
            // failure here would be a programming error, not user input,
            // so it is safe to ignore the (never-occurring) error.
            let _ = builder.add_line(None, pattern);
        }

        let gitignore_path = root.join(".gitignore");
        if gitignore_path.is_file() {
            if let Some(err) = builder.add(&gitignore_path) {
                tracing::warn!(error = %err, path = %gitignore_path.display(), "failed to parse .gitignore");
            }
        }

        let matcher = builder.build().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to build ignore matcher, falling back to empty");
            Gitignore::empty()
        });

        Self { matcher }
    }

    /// Returns true if `relative_path` (relative to the project root)
    /// should be ignored. `is_dir` affects directory-only patterns
    /// (trailing slash).
    #[must_use]
    pub fn is_ignored(&self, relative_path: &Path, is_dir: bool) -> bool {
        self.matcher
            .matched_path_or_any_parents(relative_path, is_dir)
            .is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn builtin_node_modules_always_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = IgnoreEngine::load(dir.path());
        assert!(engine.is_ignored(Path::new("node_modules/foo.ts"), false));
    }

    #[test]
    fn custom_gitignore_pattern_is_honored() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join(".gitignore"), "*.generated.ts\n")?;
        let engine = IgnoreEngine::load(dir.path());
        assert!(engine.is_ignored(Path::new("schema.generated.ts"), false));
        assert!(!engine.is_ignored(Path::new("schema.ts"), false));
        Ok(())
    }

    #[test]
    fn unrelated_file_not_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = IgnoreEngine::load(dir.path());
        assert!(!engine.is_ignored(Path::new("src/main.rs"), false));
    }

    #[test]
    fn missing_gitignore_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = IgnoreEngine::load(dir.path());
        assert!(!engine.is_ignored(Path::new("README.md"), false));
    }
}
