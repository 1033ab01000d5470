// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The `Diagnostic` data model, its stable fingerprint for deduplication,
//! and the `[[system-message]]:` formatting contract emitted by the hook
//! dispatcher.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Severity of a diagnostic, ordered least to most severe is NOT implied;
/// this mirrors LSP's own ordering (error is the lowest numeric value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// A hard error.
    Error,
    /// A warning.
    Warning,
    /// An informational message.
    Info,
    /// A hint (usually a minor style suggestion).
    Hint,
}

impl Severity {
    /// Maps an LSP `DiagnosticSeverity` to this crate's severity, LSP's
    /// 1-based enum (Error=1, Warning=2, Information=3, Hint=4).
    #[must_use]
    pub fn from_lsp(severity: Option<lsp_types::DiagnosticSeverity>) -> Self {
        match severity {
            Some(lsp_types::DiagnosticSeverity::WARNING) => Self::Warning,
            Some(lsp_types::DiagnosticSeverity::INFORMATION) => Self::Info,
            Some(lsp_types::DiagnosticSeverity::HINT) => Self::Hint,
            _ => Self::Error,
        }
    }
}

/// One diagnostic: a compiler/linter finding at a specific location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Absolute path of the file the diagnostic applies to.
    pub file: PathBuf,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
    /// Severity of the finding.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// Tool or language-server name that produced this diagnostic.
    pub source: String,
    /// Optional rule/error code (e.g. `TS2322`, `E501`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl Diagnostic {
    /// Computes the stable fingerprint used for deduplication: a hash of
    /// (relative file, line, column, severity, message, source, rule-id).
    #[must_use]
    pub fn fingerprint(&self, project_root: &Path) -> String {
        let relative = self
            .file
            .strip_prefix(project_root)
            .unwrap_or(&self.file)
            .to_string_lossy();

        let mut hasher = Sha256::new();
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.line.to_le_bytes());
        hasher.update(self.column.to_le_bytes());
        hasher.update([self.severity as u8]);
        hasher.update(self.message.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.source.as_bytes());
        hasher.update([0u8]);
        if let Some(rule_id) = &self.rule_id {
            hasher.update(rule_id.as_bytes());
        }

        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Maximum diagnostics shown per distinct `source` in an emitted message.
pub const MAX_PER_SOURCE: usize = 5;

/// The JSON body carried by a `[[system-message]]:` line.
#[derive(Debug, Clone, Serialize)]
pub struct SystemMessage {
    /// Human-readable summary, e.g. "no warnings or errors" or
    /// "total: 3 diagnostics (2 typescript, 1 eslint)".
    pub summary: String,
    /// Capped diagnostics list, at most [`MAX_PER_SOURCE`] per source.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Sentinel prefix for the single stderr line the dispatcher may emit.
pub const SENTINEL: &str = "[[system-message]]:";

impl SystemMessage {
    /// Builds the capped, grouped system message for a diagnostics list.
    ///
    /// Groups by `source`, keeps at most [`MAX_PER_SOURCE`] entries per
    /// source, and folds overflow counts into the summary text.
    #[must_use]
    pub fn build(diagnostics: &[Diagnostic]) -> Self {
        if diagnostics.is_empty() {
            return Self {
                summary: "no warnings or errors".to_string(),
                diagnostics: Vec::new(),
            };
        }

        let mut by_source: BTreeMap<&str, Vec<&Diagnostic>> = BTreeMap::new();
        for diagnostic in diagnostics {
            by_source
                .entry(diagnostic.source.as_str())
                .or_default()
                .push(diagnostic);
        }

        let mut capped = Vec::new();
        let mut summary_parts = Vec::new();
        let total = diagnostics.len();

        for (source, items) in &by_source {
            let shown = items.len().min(MAX_PER_SOURCE);
            let overflow = items.len() - shown;
            capped.extend(items.iter().take(shown).map(|d| (*d).clone()));
            if overflow > 0 {
                summary_parts.push(format!("{source}: {shown} shown, {overflow} more"));
            } else {
                summary_parts.push(format!("{shown} {source}"));
            }
        }

        let summary = format!("total: {total} diagnostics ({})", summary_parts.join(", "));

        Self {
            summary,
            diagnostics: capped,
        }
    }

    /// Renders the full `[[system-message]]: <json>` line (without a
    /// trailing newline).
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized to JSON, which
    /// should not happen for well-formed diagnostics.
    pub fn render_line(&self) -> serde_json::Result<String> {
        Ok(format!("{SENTINEL} {}", serde_json::to_string(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(file: &str, line: u32, source: &str) -> Diagnostic {
        Diagnostic {
            file: PathBuf::from(file),
            line,
            column: 1,
            severity: Severity::Error,
            message: "boom".to_string(),
            source: source.to_string(),
            rule_id: None,
        }
    }

    #[test]
    fn fingerprint_depends_on_relative_path_not_absolute() {
        let a = diag("/root1/a.rs", 1, "rustc");
        let b = diag("/root2/a.rs", 1, "rustc");
        assert_eq!(
            a.fingerprint(Path::new("/root1")),
            b.fingerprint(Path::new("/root2"))
        );
    }

    #[test]
    fn fingerprint_changes_with_message() {
        let a = diag("/root/a.rs", 1, "rustc");
        let mut b = a.clone();
        b.message = "different".to_string();
        assert_ne!(a.fingerprint(Path::new("/root")), b.fingerprint(Path::new("/root")));
    }

    #[test]
    fn empty_diagnostics_yields_no_errors_summary() {
        let message = SystemMessage::build(&[]);
        assert_eq!(message.summary, "no warnings or errors");
        assert!(message.diagnostics.is_empty());
    }

    #[test]
    fn caps_at_five_per_source() {
        let diags: Vec<Diagnostic> = (0..8).map(|i| diag("/root/a.rs", i, "eslint")).collect();
        let message = SystemMessage::build(&diags);
        assert_eq!(message.diagnostics.len(), MAX_PER_SOURCE);
        assert!(message.summary.contains("8 diagnostics"));
        assert!(message.summary.contains("3 more"));
    }

    #[test]
    fn render_line_has_sentinel_prefix() -> serde_json::Result<()> {
        let message = SystemMessage::build(&[]);
        let line = message.render_line()?;
        assert!(line.starts_with(SENTINEL));
        Ok(())
    }
}
