// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The per-project embedded store: delivered diagnostic fingerprints,
//! pending file checks, and language-server process records.
//!
//! Backed by a single SQLite file per project under the user's cache
//! hierarchy, opened and closed around each dispatcher transaction per
//! the ordering guarantees in the design: the dedup store is a
//! single-writer embedded database.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};
use thiserror::Error;

use crate::diagnostics::Diagnostic;

/// Errors raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying SQLite operation failed.
    #[error("store operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The cache directory could not be created.
    #[error("cannot create store directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A pending file check: a file was edited but results were not yet
/// available during the hook that triggered the check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFileCheck {
    /// Absolute path of the file to check.
    pub file_path: PathBuf,
    /// Absolute path of the owning project root.
    pub project_root: PathBuf,
    /// Unix timestamp (seconds) the row was created.
    pub created_at: i64,
    /// Whether this row has already been handled.
    pub checked: bool,
}

/// Result of comparing a fresh diagnostics list against the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupResult {
    /// Fingerprints newly present in this run.
    pub added: Vec<String>,
    /// Fingerprints present before but absent now.
    pub resolved: Vec<String>,
    /// Whether the dispatcher should emit a report for this run.
    pub should_report: bool,
}

const PENDING_EXPIRE_SECS: i64 = 5 * 60;
const PENDING_PURGE_SECS: i64 = 60 * 60;

/// The embedded dedup/pending-check/process-record store for one project.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (creating if necessary) the store file for `project_id`
    /// under `cache_dir`, creating the directory and schema as needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory cannot be created or the
    /// database cannot be opened/migrated.
    pub fn open(cache_dir: &Path, project_id: &str) -> Result<Self, StoreError> {
        std::fs::create_dir_all(cache_dir).map_err(|source| StoreError::CreateDir {
            path: cache_dir.to_path_buf(),
            source,
        })?;
        let db_path = cache_dir.join(format!("{project_id}.sqlite3"));
        let conn = Connection::open(db_path)?;
        Self::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Opens an in-memory store, used for tests that do not need
    /// persistence across process boundaries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the in-memory database cannot be
    /// created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;
        Ok(Self { conn })
    }

    fn migrate(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS delivered_fingerprints (
                project      TEXT NOT NULL,
                fingerprint  TEXT NOT NULL,
                severity     TEXT NOT NULL,
                first_seen   INTEGER NOT NULL,
                last_seen    INTEGER NOT NULL,
                PRIMARY KEY (project, fingerprint)
            );
            CREATE TABLE IF NOT EXISTS pending_file_checks (
                file_path    TEXT PRIMARY KEY,
                project_root TEXT NOT NULL,
                created_at   INTEGER NOT NULL,
                checked      INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS language_servers (
                project      TEXT NOT NULL,
                language     TEXT NOT NULL,
                pid          INTEGER NOT NULL,
                started_at   INTEGER NOT NULL,
                PRIMARY KEY (project, language)
            );",
        )?;
        Ok(())
    }

    /// Processes a fresh diagnostics list against the stored fingerprint
    /// set for `project` and, when `dedup_result.should_report` ends up
    /// true, atomically commits the new fingerprint set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on any underlying SQL failure.
    pub fn process_diagnostics(
        &mut self,
        project_id: &str,
        project_root: &Path,
        diagnostics: &[Diagnostic],
    ) -> Result<DedupResult, StoreError> {
        let now = now_secs();

        let new_fingerprints: HashSet<String> = diagnostics
            .iter()
            .map(|d| d.fingerprint(project_root))
            .collect();

        let stored_fingerprints = self.load_delivered(project_id)?;

        let added: Vec<String> = new_fingerprints
            .difference(&stored_fingerprints)
            .cloned()
            .collect();
        let resolved: Vec<String> = stored_fingerprints
            .difference(&new_fingerprints)
            .cloned()
            .collect();

        let went_to_all_clear = !stored_fingerprints.is_empty() && new_fingerprints.is_empty();
        let should_report = !added.is_empty() || !resolved.is_empty() || went_to_all_clear;

        if should_report {
            self.commit_delivered(project_id, project_root, diagnostics, now)?;
        }

        Ok(DedupResult {
            added,
            resolved,
            should_report,
        })
    }

    /// Loads the set of fingerprints currently recorded as delivered for
    /// `project_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on any underlying SQL failure.
    pub fn load_delivered(&self, project_id: &str) -> Result<HashSet<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT fingerprint FROM delivered_fingerprints WHERE project = ?1")?;
        let rows = stmt.query_map(params![project_id], |row| row.get::<_, String>(0))?;
        let mut set = HashSet::new();
        for row in rows {
            set.insert(row?);
        }
        Ok(set)
    }

    /// Replaces the delivered-fingerprint set for `project_id` with the
    /// fingerprints of `diagnostics`, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on any underlying SQL failure.
    pub fn commit_delivered(
        &mut self,
        project_id: &str,
        project_root: &Path,
        diagnostics: &[Diagnostic],
        now: i64,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM delivered_fingerprints WHERE project = ?1",
            params![project_id],
        )?;
        for diagnostic in diagnostics {
            let fingerprint = diagnostic.fingerprint(project_root);
            tx.execute(
                "INSERT INTO delivered_fingerprints
                    (project, fingerprint, severity, first_seen, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(project, fingerprint) DO UPDATE SET last_seen = ?4",
                params![
                    project_id,
                    fingerprint,
                    format!("{:?}", diagnostic.severity),
                    now
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Unconditionally records a pending check for `file_path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on any underlying SQL failure.
    pub fn mark_pending(&self, file_path: &Path, project_root: &Path) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO pending_file_checks (file_path, project_root, created_at, checked)
             VALUES (?1, ?2, ?3, 0)
             ON CONFLICT(file_path) DO UPDATE SET created_at = ?3, checked = 0",
            params![
                file_path.to_string_lossy(),
                project_root.to_string_lossy(),
                now_secs()
            ],
        )?;
        Ok(())
    }

    /// Returns the oldest unchecked pending check, preferring rows under
    /// `preferred_root` when given.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on any underlying SQL failure.
    pub fn oldest_pending(
        &self,
        preferred_root: Option<&Path>,
    ) -> Result<Option<PendingFileCheck>, StoreError> {
        if let Some(root) = preferred_root {
            let row = self.conn.query_row(
                "SELECT file_path, project_root, created_at, checked
                 FROM pending_file_checks
                 WHERE checked = 0 AND project_root = ?1
                 ORDER BY created_at ASC LIMIT 1",
                params![root.to_string_lossy()],
                Self::row_to_pending,
            );
            match row {
                Ok(check) => return Ok(Some(check)),
                Err(rusqlite::Error::QueryReturnedNoRows) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let row = self.conn.query_row(
            "SELECT file_path, project_root, created_at, checked
             FROM pending_file_checks
             WHERE checked = 0
             ORDER BY created_at ASC LIMIT 1",
            [],
            Self::row_to_pending,
        );
        match row {
            Ok(check) => Ok(Some(check)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn row_to_pending(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingFileCheck> {
        let file_path: String = row.get(0)?;
        let project_root: String = row.get(1)?;
        let created_at: i64 = row.get(2)?;
        let checked: i64 = row.get(3)?;
        Ok(PendingFileCheck {
            file_path: PathBuf::from(file_path),
            project_root: PathBuf::from(project_root),
            created_at,
            checked: checked != 0,
        })
    }

    /// Marks a pending check as handled.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on any underlying SQL failure.
    pub fn mark_checked(&self, file_path: &Path) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE pending_file_checks SET checked = 1 WHERE file_path = ?1",
            params![file_path.to_string_lossy()],
        )?;
        Ok(())
    }

    /// Expires (marks checked, without reporting) pending rows older than
    /// 5 minutes, and purges rows older than 1 hour entirely.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on any underlying SQL failure.
    pub fn expire_and_purge_pending(&self) -> Result<(), StoreError> {
        let now = now_secs();
        self.conn.execute(
            "UPDATE pending_file_checks SET checked = 1
             WHERE checked = 0 AND created_at < ?1",
            params![now - PENDING_EXPIRE_SECS],
        )?;
        self.conn.execute(
            "DELETE FROM pending_file_checks WHERE created_at < ?1",
            params![now - PENDING_PURGE_SECS],
        )?;
        Ok(())
    }

    /// Records that a language-server child is running for (project,
    /// language).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on any underlying SQL failure.
    pub fn record_language_server(
        &self,
        project_id: &str,
        language: &str,
        pid: u32,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO language_servers (project, language, pid, started_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(project, language) DO UPDATE SET pid = ?3, started_at = ?4",
            params![project_id, language, pid, now_secs()],
        )?;
        Ok(())
    }

    /// Removes the language-server record for (project, language), e.g.
    /// once its session is torn down.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on any underlying SQL failure.
    pub fn remove_language_server(&self, project_id: &str, language: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM language_servers WHERE project = ?1 AND language = ?2",
            params![project_id, language],
        )?;
        Ok(())
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(file: &str, line: u32) -> Diagnostic {
        Diagnostic {
            file: PathBuf::from(file),
            line,
            column: 1,
            severity: crate::diagnostics::Severity::Error,
            message: "boom".to_string(),
            source: "rustc".to_string(),
            rule_id: None,
        }
    }

    #[test]
    fn dedup_idempotence() -> Result<(), StoreError> {
        let mut store = Store::open_in_memory()?;
        let diags = vec![diag("/root/a.rs", 1)];

        let first = store.process_diagnostics("proj", Path::new("/root"), &diags)?;
        assert!(first.should_report);
        assert_eq!(first.added.len(), 1);

        let second = store.process_diagnostics("proj", Path::new("/root"), &diags)?;
        assert!(!second.should_report);
        assert!(second.added.is_empty());
        assert!(second.resolved.is_empty());
        Ok(())
    }

    #[test]
    fn all_clear_reported_exactly_once() -> Result<(), StoreError> {
        let mut store = Store::open_in_memory()?;
        let diags = vec![diag("/root/a.rs", 1)];

        store.process_diagnostics("proj", Path::new("/root"), &diags)?;

        let cleared = store.process_diagnostics("proj", Path::new("/root"), &[])?;
        assert!(cleared.should_report);

        let cleared_again = store.process_diagnostics("proj", Path::new("/root"), &[])?;
        assert!(!cleared_again.should_report);
        Ok(())
    }

    #[test]
    fn pending_check_lifecycle() -> Result<(), StoreError> {
        let store = Store::open_in_memory()?;
        let file = PathBuf::from("/root/a.rs");
        let root = PathBuf::from("/root");

        store.mark_pending(&file, &root)?;
        let pending = store.oldest_pending(Some(&root))?.expect("pending row");
        assert_eq!(pending.file_path, file);
        assert!(!pending.checked);

        store.mark_checked(&file)?;
        let remaining = store.oldest_pending(Some(&root))?;
        assert!(remaining.is_none());
        Ok(())
    }

    #[test]
    fn opens_and_persists_on_disk() -> Result<(), StoreError> {
        let dir = tempfile::tempdir().map_err(|source| StoreError::CreateDir {
            path: PathBuf::new(),
            source,
        })?;
        let mut store = Store::open(dir.path(), "abc123")?;
        store.mark_pending(Path::new("/root/a.rs"), Path::new("/root"))?;
        drop(store);

        let reopened = Store::open(dir.path(), "abc123")?;
        let pending = reopened.oldest_pending(None)?;
        assert!(pending.is_some());
        Ok(())
    }
}
