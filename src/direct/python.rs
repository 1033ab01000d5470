// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Python direct-invocation checker: a JSON-output type checker
//! (Pyright) is preferred; a column-aware linter (ruff) is the fallback
//! when Pyright is not installed.

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;
use tokio::process::Command;

use crate::diagnostics::{Diagnostic, Severity};
use crate::direct::{run_checked, CheckResult};

/// Pyright rule ids that flag an import the resolver could not find.
const UNRESOLVED_IMPORT_RULES: &[&str] = &["reportMissingImports", "reportMissingModuleSource"];

/// Checks `file` with Pyright if available, otherwise ruff.
///
/// Unresolved-import diagnostics are filtered unless the named package is
/// actually declared as a dependency (`requirements*.txt`, `Pipfile`, or
/// `pyproject.toml`): single-file invocation runs outside the project's
/// real import graph, so an import that only fails to resolve because a
/// sibling module or namespace package isn't visible to this one-off
/// process is a false positive, while a genuinely missing third-party
/// package is worth keeping.
pub async fn check(project_root: &Path, file: &Path) -> CheckResult {
    let mut result = if is_available("python", project_root, "pyright") {
        check_pyright(project_root, file).await
    } else if is_available("python", project_root, "ruff") {
        check_ruff(project_root, file).await
    } else {
        CheckResult::default()
    };

    let declared = declared_dependencies(project_root);
    result.diagnostics.retain(|diag| !is_filtered_unresolved_import(diag, &declared));
    result
}

/// True if `tool` resolves either to a project-local install under
/// `language`'s candidate directories or to something on `PATH`.
fn is_available(language: &str, project_root: &Path, tool: &str) -> bool {
    let resolved = crate::registry::resolve_direct_tool(language, project_root, tool);
    resolved.is_file() || which::which(tool).is_ok()
}

/// Returns true if `diag` is an unresolved-import diagnostic for a module
/// that isn't a declared dependency, and should therefore be dropped.
fn is_filtered_unresolved_import(diag: &Diagnostic, declared: &HashSet<String>) -> bool {
    let Some(rule) = diag.rule_id.as_deref() else { return false };
    if !UNRESOLVED_IMPORT_RULES.contains(&rule) {
        return false;
    }
    let Some(module) = extract_quoted_module(&diag.message) else { return false };
    !declared.contains(&normalize_package_name(&module))
}

/// Extracts the first double-quoted segment from a Pyright message like
/// `Import "foo.bar" could not be resolved`, keeping only the top-level
/// package name.
fn extract_quoted_module(message: &str) -> Option<String> {
    let start = message.find('"')? + 1;
    let rest = &message[start..];
    let end = rest.find('"')?;
    rest[..end].split('.').next().map(str::to_string)
}

/// Lowercases and maps `-`/`_` to a single separator so `PyYAML`,
/// `pyyaml`, and `py_yaml`-style spellings compare equal.
fn normalize_package_name(name: &str) -> String {
    name.to_lowercase().replace('_', "-")
}

/// Collects package names declared in `requirements*.txt`, `Pipfile`, and
/// `pyproject.toml` at the project root.
fn declared_dependencies(project_root: &Path) -> HashSet<String> {
    let mut names = HashSet::new();

    if let Ok(entries) = std::fs::read_dir(project_root) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if (name.starts_with("requirements") && name.ends_with(".txt")) || name == "requirements.in" {
                if let Ok(text) = std::fs::read_to_string(entry.path()) {
                    names.extend(parse_requirements_txt(&text));
                }
            }
        }
    }

    if let Ok(text) = std::fs::read_to_string(project_root.join("Pipfile")) {
        names.extend(parse_pipfile(&text));
    }

    if let Ok(text) = std::fs::read_to_string(project_root.join("pyproject.toml")) {
        names.extend(parse_pyproject(&text));
    }

    names
}

/// Parses one package name per non-comment, non-blank line, stripping
/// version specifiers, extras, and environment markers.
fn parse_requirements_txt(text: &str) -> HashSet<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() || line.starts_with('-') {
                return None;
            }
            let end = line
                .find(|c: char| matches!(c, '=' | '>' | '<' | '~' | '!' | '[' | ';' | ' '))
                .unwrap_or(line.len());
            let name = line[..end].trim();
            (!name.is_empty()).then(|| normalize_package_name(name))
        })
        .collect()
}

fn parse_pipfile(text: &str) -> HashSet<String> {
    let Ok(value) = text.parse::<toml::Table>() else {
        return HashSet::new();
    };
    ["packages", "dev-packages"]
        .iter()
        .filter_map(|section| value.get(*section)?.as_table())
        .flat_map(toml::Table::keys)
        .map(|name| normalize_package_name(name))
        .collect()
}

fn parse_pyproject(text: &str) -> HashSet<String> {
    let Ok(value) = text.parse::<toml::Table>() else {
        return HashSet::new();
    };

    let mut names: HashSet<String> = value
        .get("project")
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_array())
        .into_iter()
        .flatten()
        .filter_map(|dep| dep.as_str())
        .filter_map(|dep| parse_requirements_txt(dep).into_iter().next())
        .collect();

    if let Some(poetry_deps) = value
        .get("tool")
        .and_then(|t| t.get("poetry"))
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_table())
    {
        names.extend(poetry_deps.keys().map(|name| normalize_package_name(name)));
    }

    names
}

async fn check_pyright(project_root: &Path, file: &Path) -> CheckResult {
    let mut cmd = Command::new(crate::registry::resolve_direct_tool("python", project_root, "pyright"));
    cmd.current_dir(project_root)
        .env("PYTHONPATH", python_path(project_root))
        .arg("--outputjson")
        .arg(file);

    let (_, stdout, _, timed_out) = run_checked(cmd).await;
    CheckResult {
        diagnostics: parse_pyright_json(&stdout, file),
        timed_out,
    }
}

fn parse_pyright_json(output: &str, file: &Path) -> Vec<Diagnostic> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(output) else {
        return Vec::new();
    };
    let Some(diagnostics) = value
        .get("generalDiagnostics")
        .and_then(serde_json::Value::as_array)
    else {
        return Vec::new();
    };

    diagnostics
        .iter()
        .filter_map(|entry| {
            let severity = match entry.get("severity").and_then(serde_json::Value::as_str) {
                Some("error") => Severity::Error,
                Some("warning") => Severity::Warning,
                _ => Severity::Info,
            };
            let message = entry.get("message").and_then(serde_json::Value::as_str)?.to_string();
            let range = entry.get("range")?.get("start")?;
            Some(Diagnostic {
                file: file.to_path_buf(),
                line: u32::try_from(range.get("line")?.as_u64()?).ok()? + 1,
                column: u32::try_from(range.get("character")?.as_u64()?).ok()? + 1,
                severity,
                message,
                source: "pyright".to_string(),
                rule_id: entry
                    .get("rule")
                    .and_then(serde_json::Value::as_str)
                    .map(ToString::to_string),
            })
        })
        .collect()
}

async fn check_ruff(project_root: &Path, file: &Path) -> CheckResult {
    let mut cmd = Command::new(crate::registry::resolve_direct_tool("python", project_root, "ruff"));
    cmd.current_dir(project_root)
        .env("PYTHONPATH", python_path(project_root))
        .arg("check")
        .arg("--output-format=concise")
        .arg(file);

    let (_, stdout, _, timed_out) = run_checked(cmd).await;
    CheckResult {
        diagnostics: parse_ruff_concise(&stdout, file),
        timed_out,
    }
}

fn parse_ruff_concise(output: &str, file: &Path) -> Vec<Diagnostic> {
    let re = Regex::new(r"^(.+):(\d+):(\d+):\s*([A-Z]+\d+)\s+(.+)$")
        .unwrap_or_else(|e| unreachable!("static regex is valid: {e}"));

    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            Some(Diagnostic {
                file: file.to_path_buf(),
                line: caps[2].parse().ok()?,
                column: caps[3].parse().ok()?,
                severity: Severity::Warning,
                message: caps[5].to_string(),
                source: "ruff".to_string(),
                rule_id: Some(caps[4].to_string()),
            })
        })
        .collect()
}

/// Extends `PYTHONPATH` with the project root and conventional
/// source/library subdirectories so local imports resolve.
fn python_path(project_root: &Path) -> String {
    let candidates = ["src", "lib"];
    let mut parts = vec![project_root.to_string_lossy().into_owned()];
    for candidate in candidates {
        let dir = project_root.join(candidate);
        if dir.is_dir() {
            parts.push(dir.to_string_lossy().into_owned());
        }
    }
    if let Ok(existing) = std::env::var("PYTHONPATH") {
        parts.push(existing);
    }
    std::env::join_paths(parts)
        .map(|joined| joined.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn parses_pyright_json_diagnostic() {
        let json = r#"{"generalDiagnostics":[{"severity":"error","message":"oops","range":{"start":{"line":4,"character":2}},"rule":"reportGeneralTypeIssues"}]}"#;
        let diags = parse_pyright_json(json, Path::new("a.py"));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line, 5);
        assert_eq!(diags[0].column, 3);
        assert_eq!(diags[0].severity, Severity::Error);
    }

    #[test]
    fn filters_unresolved_import_for_undeclared_package() {
        let mut declared = HashSet::new();
        declared.insert("requests".to_string());

        let undeclared = Diagnostic {
            file: Path::new("a.py").to_path_buf(),
            line: 1,
            column: 1,
            severity: Severity::Error,
            message: "Import \"localpkg.util\" could not be resolved".to_string(),
            source: "pyright".to_string(),
            rule_id: Some("reportMissingImports".to_string()),
        };
        assert!(is_filtered_unresolved_import(&undeclared, &declared));

        let declared_diag = Diagnostic {
            message: "Import \"requests\" could not be resolved".to_string(),
            ..undeclared.clone()
        };
        assert!(!is_filtered_unresolved_import(&declared_diag, &declared));
    }

    #[test]
    fn unrelated_rule_is_never_filtered() {
        let declared = HashSet::new();
        let diag = Diagnostic {
            file: Path::new("a.py").to_path_buf(),
            line: 1,
            column: 1,
            severity: Severity::Error,
            message: "Import \"localpkg\" could not be resolved".to_string(),
            source: "pyright".to_string(),
            rule_id: Some("reportGeneralTypeIssues".to_string()),
        };
        assert!(!is_filtered_unresolved_import(&diag, &declared));
    }

    #[test]
    fn parses_requirements_txt_with_specifiers_and_comments() {
        let text = "# comment\nrequests>=2.0\nPyYAML==6.0 ; python_version >= \"3.8\"\n-e ./local\n\nflask[async]\n";
        let names = parse_requirements_txt(text);
        assert!(names.contains("requests"));
        assert!(names.contains("pyyaml"));
        assert!(names.contains("flask"));
        assert!(!names.contains("local"));
    }

    #[test]
    fn parses_pyproject_pep621_and_poetry_dependencies() {
        let text = "[project]\ndependencies = [\"requests>=2.0\"]\n\n[tool.poetry.dependencies]\nclick = \"*\"\n";
        let names = parse_pyproject(text);
        assert!(names.contains("requests"));
        assert!(names.contains("click"));
    }

    #[test]
    fn parses_ruff_concise_line() {
        let output = "a.py:3:1: F401 'os' imported but unused\n";
        let diags = parse_ruff_concise(output, Path::new("a.py"));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].rule_id.as_deref(), Some("F401"));
    }
}
