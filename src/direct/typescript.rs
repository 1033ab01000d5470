// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! TypeScript direct-invocation checker.
//!
//! Locates the nearest `tsconfig.json`, synthesizes a temporary project
//! config that extends it and restricts `include` to the single target
//! file, and runs the compiler in no-emit mode against that config. When
//! no `tsconfig.json` exists, falls back to plain command-line flags.

use std::path::Path;

use ignore::WalkBuilder;
use regex::Regex;
use tokio::process::Command;

use crate::diagnostics::{Diagnostic, Severity};
use crate::direct::{find_upward, run_checked, CheckResult};

/// Checks `file` with `tsc --noEmit`, scoped to just that file via a
/// synthesized temporary tsconfig when one exists upward of the file.
pub async fn check(project_root: &Path, file: &Path) -> CheckResult {
    match find_upward(file, "tsconfig.json") {
        Some(config_dir) => check_with_synthesized_config(&config_dir, file).await,
        None => check_without_config(project_root, file).await,
    }
}

async fn check_with_synthesized_config(config_dir: &Path, file: &Path) -> CheckResult {
    let temp_config = config_dir.join(format!(".claude-lsp-tsconfig-{}.json", std::process::id()));

    let relative_file = file
        .strip_prefix(config_dir)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| file.to_path_buf());

    let synthesized = serde_json::json!({
        "extends": "./tsconfig.json",
        "compilerOptions": { "noEmit": true },
        "include": [relative_file.to_string_lossy()],
    });

    let write_result = std::fs::write(
        &temp_config,
        serde_json::to_string_pretty(&synthesized).unwrap_or_default(),
    );
    if write_result.is_err() {
        return check_without_config(config_dir, file).await;
    }

    let mut cmd = Command::new(crate::registry::resolve_direct_tool("typescript", config_dir, "tsc"));
    cmd.current_dir(config_dir)
        .arg("--noEmit")
        .arg("-p")
        .arg(&temp_config);

    let (_, stdout, _, timed_out) = run_checked(cmd).await;
    let _ = std::fs::remove_file(&temp_config);

    CheckResult {
        diagnostics: parse_tsc_output(&stdout, file),
        timed_out,
    }
}

/// Fallback when no `tsconfig.json` is found upward of the file: derive
/// compiler flags from the nearest `tsconfig.json` anywhere under the
/// project (a monorepo may keep one outside this file's own ancestry),
/// parsed comment-tolerantly since `tsconfig.json` permits `//` and
/// `/* */` comments. Falls back to conservative defaults if none is
/// found or it fails to parse.
async fn check_without_config(project_root: &Path, file: &Path) -> CheckResult {
    let options = find_any_tsconfig_compiler_options(project_root);
    let target = options.as_ref().and_then(|o| o.get("target")).and_then(|v| v.as_str()).unwrap_or("es2020");
    let module = options.as_ref().and_then(|o| o.get("module")).and_then(|v| v.as_str()).unwrap_or("esnext");
    let module_resolution = options
        .as_ref()
        .and_then(|o| o.get("moduleResolution"))
        .and_then(|v| v.as_str())
        .unwrap_or("node");

    let mut cmd = Command::new(crate::registry::resolve_direct_tool("typescript", project_root, "tsc"));
    cmd.current_dir(project_root)
        .arg("--noEmit")
        .arg("--target")
        .arg(target)
        .arg("--module")
        .arg(module)
        .arg("--moduleResolution")
        .arg(module_resolution)
        .arg("--skipLibCheck")
        .arg(file);

    let (_, stdout, _, timed_out) = run_checked(cmd).await;
    CheckResult {
        diagnostics: parse_tsc_output(&stdout, file),
        timed_out,
    }
}

/// Finds the nearest `tsconfig.json` under `project_root` (breadth-first
/// by walk order, capped at a shallow depth) and returns its parsed
/// `compilerOptions`, if any.
fn find_any_tsconfig_compiler_options(project_root: &Path) -> Option<serde_json::Value> {
    let walker = WalkBuilder::new(project_root).max_depth(Some(3)).hidden(true).git_ignore(true).build();

    for entry in walker.flatten() {
        if entry.file_name() != "tsconfig.json" {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let stripped = strip_json_comments(&text);
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&stripped) else {
            continue;
        };
        if let Some(options) = value.get("compilerOptions") {
            return Some(options.clone());
        }
    }
    None
}

/// Parses `path(line,col): error TSxxxx: message`, keeping only
/// diagnostics whose path matches the target file.
fn parse_tsc_output(output: &str, file: &Path) -> Vec<Diagnostic> {
    let re = Regex::new(r"^(.+)\((\d+),(\d+)\):\s*(error|warning)\s+(TS\d+):\s*(.+)$")
        .unwrap_or_else(|e| unreachable!("static regex is valid: {e}"));
    let file_name = file.file_name().map(std::ffi::OsStr::to_string_lossy);

    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            if let Some(expected) = &file_name {
                if !caps[1].ends_with(expected.as_ref()) {
                    return None;
                }
            }
            let severity = if &caps[4] == "error" {
                Severity::Error
            } else {
                Severity::Warning
            };
            Some(Diagnostic {
                file: file.to_path_buf(),
                line: caps[2].parse().ok()?,
                column: caps[3].parse().ok()?,
                severity,
                message: caps[6].to_string(),
                source: "typescript".to_string(),
                rule_id: Some(caps[5].to_string()),
            })
        })
        .collect()
}

/// Strips `//` and `/* */` comments from a `tsconfig.json`, which is not
/// strict JSON, so it can be parsed with a standard JSON parser.
#[must_use]
pub fn strip_json_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            result.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    result.push(escaped);
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                result.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            other => result.push(other),
        }
    }
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn parses_tsc_error_line() {
        let output = "test.ts(1,7): error TS2322: Type 'number' is not assignable to type 'string'.\n";
        let diags = parse_tsc_output(output, Path::new("test.ts"));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line, 1);
        assert_eq!(diags[0].column, 7);
        assert_eq!(diags[0].rule_id.as_deref(), Some("TS2322"));
        assert!(diags[0].message.contains("number"));
    }

    #[test]
    fn filters_diagnostics_for_other_files() {
        let output = "other.ts(1,1): error TS1000: unrelated\n";
        let diags = parse_tsc_output(output, Path::new("test.ts"));
        assert!(diags.is_empty());
    }

    #[test]
    fn strips_line_and_block_comments() {
        let input = "{\n  // comment\n  \"a\": 1, /* inline */ \"b\": 2\n}";
        let stripped = strip_json_comments(input);
        let parsed: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(parsed["a"], 1);
        assert_eq!(parsed["b"], 2);
    }

    #[test]
    fn finds_compiler_options_from_a_commented_tsconfig() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tsconfig.json"),
            "{\n  // strict mode\n  \"compilerOptions\": { \"target\": \"es2022\", \"module\": \"commonjs\" }\n}",
        )
        .unwrap();

        let options = find_any_tsconfig_compiler_options(dir.path()).unwrap();
        assert_eq!(options["target"], "es2022");
        assert_eq!(options["module"], "commonjs");
    }

    #[test]
    fn no_tsconfig_anywhere_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_any_tsconfig_compiler_options(dir.path()).is_none());
    }
}
