// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Project identity: a stable, content-derived fingerprint of a project root.
//!
//! The fingerprint names the stream socket, the PID/start files, and the
//! dedup-store database for a project, so it must be stable across restarts
//! and independent of how the path was spelled (trailing slash, `..`
//! components, symlinks).

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// An absolute, canonicalized project root plus its derived identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectRoot {
    path: PathBuf,
    id: String,
}

impl ProjectRoot {
    /// Canonicalizes `path` and derives its project id.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` cannot be canonicalized (it must exist).
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let canonical = path.as_ref().canonicalize()?;
        let id = fingerprint(&canonical);
        Ok(Self {
            path: canonical,
            id,
        })
    }

    /// The canonical absolute path of the project root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The 16-hex-character project identity fingerprint.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Computes the 16-hex-character project identity fingerprint for a
/// canonicalized path: the first 16 hex characters of SHA-256(path).
#[must_use]
pub fn fingerprint(canonical_path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_path.as_os_str().as_encoded_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let path = Path::new("/tmp/some/project");
        assert_eq!(fingerprint(path), fingerprint(path));
    }

    #[test]
    fn fingerprint_is_16_hex_chars() {
        let fp = fingerprint(Path::new("/tmp/a"));
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_paths_yield_different_fingerprints() {
        assert_ne!(
            fingerprint(Path::new("/tmp/a")),
            fingerprint(Path::new("/tmp/b"))
        );
    }

    #[test]
    fn identity_stable_across_dot_dot_and_trailing_slash() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a");
        std::fs::create_dir(&a)?;

        let direct = ProjectRoot::new(&a)?;
        let via_dotdot = ProjectRoot::new(a.join("..").join("a"))?;
        let via_trailing_slash = ProjectRoot::new(format!("{}/", a.display()))?;

        assert_eq!(direct.id(), via_dotdot.id());
        assert_eq!(direct.id(), via_trailing_slash.id());
        Ok(())
    }
}
