// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Path validation: every file reference crossing the system boundary
//! (an HTTP query parameter, a hook event field, a discovery result) is
//! accepted only if it canonicalizes into the declared project root.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// A path failed validation against a project root.
#[derive(Debug, Error)]
pub enum PathError {
    /// The path does not exist and has no existing ancestor to validate.
    #[error("no existing ancestor for {0}")]
    NoExistingAncestor(PathBuf),
    /// Canonicalization failed (permission denied, I/O error, and so on).
    #[error("cannot canonicalize {path}: {source}")]
    Canonicalize {
        /// The path that failed to canonicalize.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The canonical path escapes the project root.
    #[error("{0} escapes the project root")]
    Escapes(PathBuf),
}

/// Validates file paths against a single project root.
#[derive(Debug, Clone)]
pub struct PathValidator {
    root: PathBuf,
}

impl PathValidator {
    /// Creates a validator bound to an already-canonicalized root.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The project root this validator is bound to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validates a path that is expected to already exist (a read).
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] if the path does not exist, cannot be
    /// canonicalized, or canonicalizes outside the project root.
    pub fn validate_read(&self, candidate: impl AsRef<Path>) -> Result<PathBuf, PathError> {
        let candidate = self.resolve(candidate.as_ref());
        let canonical = candidate
            .canonicalize()
            .map_err(|source| PathError::Canonicalize {
                path: candidate.clone(),
                source,
            })?;
        self.check_within_root(&canonical)?;
        Ok(canonical)
    }

    /// Validates a path that may not exist yet (a write/open target).
    ///
    /// Walks up from the candidate to the nearest existing ancestor,
    /// canonicalizes that, checks containment, then reconstructs the
    /// full intended path from the canonical ancestor plus the
    /// non-existing tail.
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] if no ancestor exists, an ancestor cannot be
    /// canonicalized, or the canonical ancestor escapes the root.
    pub fn validate_write(&self, candidate: impl AsRef<Path>) -> Result<PathBuf, PathError> {
        let candidate = self.resolve(candidate.as_ref());

        if candidate.exists() {
            return self.validate_read(&candidate);
        }

        let (ancestor, tail) = find_existing_ancestor(&candidate)
            .ok_or_else(|| PathError::NoExistingAncestor(candidate.clone()))?;

        let canonical_ancestor =
            ancestor
                .canonicalize()
                .map_err(|source| PathError::Canonicalize {
                    path: ancestor.clone(),
                    source,
                })?;
        self.check_within_root(&canonical_ancestor)?;

        let mut reconstructed = canonical_ancestor;
        for component in tail {
            reconstructed.push(component);
        }
        Ok(reconstructed)
    }

    /// Resolves a candidate against the root if it is relative.
    fn resolve(&self, candidate: &Path) -> PathBuf {
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }

    fn check_within_root(&self, canonical: &Path) -> Result<(), PathError> {
        if canonical.starts_with(&self.root) {
            Ok(())
        } else {
            Err(PathError::Escapes(canonical.to_path_buf()))
        }
    }
}

/// Walks up from `path` to find the nearest existing ancestor, returning
/// that ancestor plus the path components between it and `path`
/// (in root-to-leaf order, so they can be pushed back on in sequence).
fn find_existing_ancestor(path: &Path) -> Option<(PathBuf, Vec<std::ffi::OsString>)> {
    let mut tail = Vec::new();
    let mut current = path.to_path_buf();

    loop {
        if current.exists() {
            tail.reverse();
            return Some((current, tail));
        }
        let component = current.file_name()?.to_os_string();
        tail.push(component);
        if !current.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn validator_for(root: &Path) -> PathValidator {
        PathValidator::new(root.canonicalize().expect("root exists"))
    }

    #[test]
    fn read_within_root_succeeds() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("a.rs");
        fs::write(&file, "")?;
        let validator = validator_for(dir.path());
        assert!(validator.validate_read(&file).is_ok());
        Ok(())
    }

    #[test]
    fn read_outside_root_fails() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let validator = validator_for(dir.path());
        let result = validator.validate_read("/etc/hostname");
        assert!(matches!(result, Err(PathError::Escapes(_))));
        Ok(())
    }

    #[test]
    fn read_via_parent_traversal_fails() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let sub = dir.path().join("sub");
        fs::create_dir(&sub)?;
        let validator = validator_for(&sub);
        let escape = sub.join("../../etc/hostname");
        let result = validator.validate_read(escape);
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn write_new_file_in_existing_dir_succeeds() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let validator = validator_for(dir.path());
        let target = dir.path().join("new.rs");
        let resolved = validator.validate_write(&target).expect("within root");
        assert!(resolved.ends_with("new.rs"));
        Ok(())
    }

    #[test]
    fn write_new_file_in_new_subdir_succeeds() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let validator = validator_for(dir.path());
        let target = dir.path().join("newdir").join("new.rs");
        let resolved = validator.validate_write(&target).expect("within root");
        assert!(resolved.ends_with("newdir/new.rs"));
        Ok(())
    }

    #[test]
    fn write_outside_root_fails() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let validator = validator_for(dir.path());
        let result = validator.validate_write("/tmp/outside-claude-lsp-test/x.rs");
        assert!(result.is_err());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_root_fails() -> std::io::Result<()> {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir()?;
        let outside = tempfile::tempdir()?;
        let outside_file = outside.path().join("secret.rs");
        fs::write(&outside_file, "")?;

        let link = dir.path().join("link.rs");
        symlink(&outside_file, &link)?;

        let validator = validator_for(dir.path());
        let result = validator.validate_read(&link);
        assert!(matches!(result, Err(PathError::Escapes(_))));
        Ok(())
    }
}
