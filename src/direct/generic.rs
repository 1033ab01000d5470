// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Checkers for languages whose compiler has a native syntax-check mode
//! and a stable, well-known single-line error format: Rust, Java, C/C++,
//! PHP, Lua, Elixir, and Terraform.

use std::path::Path;

use regex::Regex;
use tokio::process::Command;

use crate::diagnostics::{Diagnostic, Severity};
use crate::direct::{run_checked, CheckResult};

/// Dispatches to the native syntax checker for `language`, or returns an
/// empty result for languages with no direct-invocation checker.
pub async fn check(language: &str, project_root: &Path, file: &Path) -> CheckResult {
    match language {
        "rust" => check_rustc(project_root, file).await,
        "java" => check_javac(project_root, file).await,
        "c" => check_cc(project_root, file, "cc").await,
        "cpp" => check_cc(project_root, file, "c++").await,
        "php" => check_php(project_root, file).await,
        "lua" => check_lua(project_root, file).await,
        "elixir" => check_elixir(project_root, file).await,
        "terraform" => check_terraform(project_root, file).await,
        _ => CheckResult::default(),
    }
}

async fn check_rustc(project_root: &Path, file: &Path) -> CheckResult {
    let mut cmd = Command::new("rustc");
    cmd.current_dir(project_root)
        .arg("--edition")
        .arg("2021")
        .arg("--crate-type")
        .arg("lib")
        .arg("--emit=metadata")
        .arg("-o")
        .arg(null_device())
        .arg(file);

    let (_, _, stderr, timed_out) = run_checked(cmd).await;
    CheckResult {
        diagnostics: parse_rustc(&stderr, file),
        timed_out,
    }
}

fn parse_rustc(output: &str, file: &Path) -> Vec<Diagnostic> {
    let header = Regex::new(r"^(error|warning)(\[[A-Z0-9]+\])?: (.+)$")
        .unwrap_or_else(|e| unreachable!("static regex is valid: {e}"));
    let location = Regex::new(r"^\s*-->\s*(.+):(\d+):(\d+)$")
        .unwrap_or_else(|e| unreachable!("static regex is valid: {e}"));

    let mut diagnostics = Vec::new();
    let mut pending: Option<(Severity, String, Option<String>)> = None;

    for line in output.lines() {
        if let Some(caps) = header.captures(line) {
            let severity = if &caps[1] == "error" {
                Severity::Error
            } else {
                Severity::Warning
            };
            let rule_id = caps.get(2).map(|m| m.as_str().trim_matches(['[', ']']).to_string());
            pending = Some((severity, caps[3].to_string(), rule_id));
            continue;
        }
        if let Some(caps) = location.captures(line) {
            if let Some((severity, message, rule_id)) = pending.take() {
                let Ok(reported_line) = caps[2].parse::<u32>() else {
                    continue;
                };
                let Ok(column) = caps[3].parse::<u32>() else {
                    continue;
                };
                diagnostics.push(Diagnostic {
                    file: file.to_path_buf(),
                    line: reported_line,
                    column,
                    severity,
                    message,
                    source: "rustc".to_string(),
                    rule_id,
                });
            }
        }
    }
    diagnostics
}

async fn check_javac(project_root: &Path, file: &Path) -> CheckResult {
    let out_dir = std::env::temp_dir().join(format!("claude-lsp-javac-{}", std::process::id()));
    let _ = std::fs::create_dir_all(&out_dir);

    let mut cmd = Command::new("javac");
    cmd.current_dir(project_root)
        .arg("-Xlint")
        .arg("-d")
        .arg(&out_dir)
        .arg(file);

    let (_, _, stderr, timed_out) = run_checked(cmd).await;
    let _ = std::fs::remove_dir_all(&out_dir);

    CheckResult {
        diagnostics: parse_colon_format(&stderr, file, "javac", &["error", "warning"]),
        timed_out,
    }
}

async fn check_cc(project_root: &Path, file: &Path, compiler: &str) -> CheckResult {
    let mut cmd = Command::new(compiler);
    cmd.current_dir(project_root).arg("-fsyntax-only").arg(file);

    let (_, _, stderr, timed_out) = run_checked(cmd).await;
    CheckResult {
        diagnostics: parse_gcc_format(&stderr, file, compiler),
        timed_out,
    }
}

/// Parses `path:line:col: error|warning: message`, the format shared by
/// gcc and clang.
fn parse_gcc_format(output: &str, file: &Path, source: &str) -> Vec<Diagnostic> {
    let re = Regex::new(r"^(.+):(\d+):(\d+):\s*(error|warning|note):\s*(.+)$")
        .unwrap_or_else(|e| unreachable!("static regex is valid: {e}"));

    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let severity = match &caps[4] {
                "error" => Severity::Error,
                "warning" => Severity::Warning,
                _ => Severity::Info,
            };
            Some(Diagnostic {
                file: file.to_path_buf(),
                line: caps[2].parse().ok()?,
                column: caps[3].parse().ok()?,
                severity,
                message: caps[5].to_string(),
                source: source.to_string(),
                rule_id: None,
            })
        })
        .collect()
}

/// Parses `path:line: kind: message`, used by javac and similar tools
/// that report a line but no column.
fn parse_colon_format(output: &str, file: &Path, source: &str, kinds: &[&str]) -> Vec<Diagnostic> {
    let pattern = format!(r"^(.+):(\d+):\s*({}):\s*(.+)$", kinds.join("|"));
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };

    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let severity = if caps[3].contains("error") {
                Severity::Error
            } else {
                Severity::Warning
            };
            Some(Diagnostic {
                file: file.to_path_buf(),
                line: caps[2].parse().ok()?,
                column: 1,
                severity,
                message: caps[4].trim().to_string(),
                source: source.to_string(),
                rule_id: None,
            })
        })
        .collect()
}

async fn check_php(project_root: &Path, file: &Path) -> CheckResult {
    let mut cmd = Command::new("php");
    cmd.current_dir(project_root).arg("-l").arg(file);

    let (_, stdout, _, timed_out) = run_checked(cmd).await;
    let re = Regex::new(r"^PHP Parse error:\s*(.+?)\s+in\s+.+\s+on line\s+(\d+)")
        .unwrap_or_else(|e| unreachable!("static regex is valid: {e}"));

    let diagnostics = stdout
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            Some(Diagnostic {
                file: file.to_path_buf(),
                line: caps[2].parse().ok()?,
                column: 1,
                severity: Severity::Error,
                message: caps[1].to_string(),
                source: "php".to_string(),
                rule_id: None,
            })
        })
        .collect();

    CheckResult { diagnostics, timed_out }
}

async fn check_lua(project_root: &Path, file: &Path) -> CheckResult {
    let mut cmd = Command::new("luac");
    cmd.current_dir(project_root).arg("-p").arg(file);

    let (_, _, stderr, timed_out) = run_checked(cmd).await;
    let re = Regex::new(r"^luac\d*:\s*.+?:(\d+):\s*(.+)$")
        .unwrap_or_else(|e| unreachable!("static regex is valid: {e}"));

    let diagnostics = stderr
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            Some(Diagnostic {
                file: file.to_path_buf(),
                line: caps[1].parse().ok()?,
                column: 1,
                severity: Severity::Error,
                message: caps[2].trim().to_string(),
                source: "lua".to_string(),
                rule_id: None,
            })
        })
        .collect();

    CheckResult { diagnostics, timed_out }
}

async fn check_elixir(project_root: &Path, file: &Path) -> CheckResult {
    let mut cmd = Command::new("elixirc");
    cmd.current_dir(project_root).arg("--ignore-module-conflict").arg(file);

    let (_, _, stderr, timed_out) = run_checked(cmd).await;
    let re = Regex::new(r"^(?:\*\* )?\([A-Za-z.]*(?:Error|Warning)\)\s*(.+):(\d+):\s*(.+)$")
        .unwrap_or_else(|e| unreachable!("static regex is valid: {e}"));

    let diagnostics = stderr
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let severity = if line.contains("Warning") {
                Severity::Warning
            } else {
                Severity::Error
            };
            Some(Diagnostic {
                file: file.to_path_buf(),
                line: caps[2].parse().ok()?,
                column: 1,
                severity,
                message: caps[3].trim().to_string(),
                source: "elixir".to_string(),
                rule_id: None,
            })
        })
        .collect();

    CheckResult { diagnostics, timed_out }
}

async fn check_terraform(project_root: &Path, file: &Path) -> CheckResult {
    let dir = file.parent().unwrap_or(project_root);
    let mut cmd = Command::new("terraform");
    cmd.current_dir(dir).arg("validate").arg("-json").arg("-no-color");

    let (_, stdout, _, timed_out) = run_checked(cmd).await;
    let diagnostics = serde_json::from_str::<serde_json::Value>(&stdout)
        .ok()
        .and_then(|value| value.get("diagnostics").cloned())
        .and_then(|diags| diags.as_array().cloned())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| {
            let severity = match entry.get("severity").and_then(|v| v.as_str()) {
                Some("error") => Severity::Error,
                _ => Severity::Warning,
            };
            let message = entry.get("summary").and_then(|v| v.as_str())?.to_string();
            let range = entry.get("range")?;
            let filename = range.get("filename").and_then(|v| v.as_str())?;
            if !file.ends_with(filename) && !filename.ends_with(&*file.to_string_lossy()) {
                return None;
            }
            let start = range.get("start")?;
            Some(Diagnostic {
                file: file.to_path_buf(),
                line: u32::try_from(start.get("line")?.as_u64()?).ok()?,
                column: u32::try_from(start.get("column")?.as_u64()?).ok()?,
                severity,
                message,
                source: "terraform".to_string(),
                rule_id: None,
            })
        })
        .collect();

    CheckResult { diagnostics, timed_out }
}

fn null_device() -> &'static str {
    if cfg!(windows) {
        "NUL"
    } else {
        "/dev/null"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn parses_rustc_error_with_location() {
        let output = "error[E0308]: mismatched types\n --> src/main.rs:3:5\n  |\n";
        let diags = parse_rustc(output, Path::new("src/main.rs"));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line, 3);
        assert_eq!(diags[0].column, 5);
        assert_eq!(diags[0].severity, Severity::Error);
        assert_eq!(diags[0].rule_id.as_deref(), Some("E0308"));
    }

    #[test]
    fn parses_gcc_format_error() {
        let output = "foo.c:10:2: error: expected ';' before '}' token\n";
        let diags = parse_gcc_format(output, Path::new("foo.c"), "gcc");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line, 10);
        assert_eq!(diags[0].column, 2);
    }

    #[test]
    fn parses_colon_format_javac() {
        let output = "Foo.java:5: error: ';' expected\n";
        let diags = parse_colon_format(output, Path::new("Foo.java"), "javac", &["error", "warning"]);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line, 5);
        assert_eq!(diags[0].severity, Severity::Error);
    }
}
