// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Scala direct-invocation checker: a best-effort classpath assembled
//! from standard build output directories, compiling the target file
//! together with its directory siblings when no build tool is
//! configured for full-project compilation.

use std::path::Path;

use regex::Regex;
use tokio::process::Command;

use crate::diagnostics::{Diagnostic, Severity};
use crate::direct::{find_upward, run_checked, CheckResult};

/// Known false-positive fragments emitted by `scalac` when compiling a
/// single file outside its full multi-module build graph.
const FALSE_POSITIVE_FRAGMENTS: &[&str] = &[
    "not found: type",
    "object sbt is not a member",
    "not found: value build",
];

/// Compiles `file`. When a build tool config is present the whole
/// project is compiled through it, since `scalac` alone cannot resolve
/// a multi-module build graph; otherwise falls back to a best-effort
/// classpath assembled from standard build output directories.
pub async fn check(project_root: &Path, file: &Path) -> CheckResult {
    if has_build_tool(project_root) {
        return check_with_build_tool(project_root, file).await;
    }

    let Some(dir) = file.parent() else {
        return CheckResult::default();
    };

    let siblings: Vec<_> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == "scala"))
                .collect()
        })
        .unwrap_or_default();

    let classpath = assemble_classpath(project_root);

    let mut cmd = Command::new("scalac");
    cmd.current_dir(project_root);
    if !classpath.is_empty() {
        cmd.arg("-classpath").arg(classpath);
    }
    cmd.arg("-d").arg(std::env::temp_dir());
    for sibling in &siblings {
        cmd.arg(sibling);
    }
    if siblings.is_empty() {
        cmd.arg(file);
    }

    let (_, _, stderr, timed_out) = run_checked(cmd).await;
    CheckResult {
        diagnostics: parse_scalac(&stderr, file),
        timed_out,
    }
}

/// Compiles the whole project through `sbt compile` and filters its
/// diagnostics down to the one file the caller asked about.
async fn check_with_build_tool(project_root: &Path, file: &Path) -> CheckResult {
    let mut cmd = Command::new("sbt");
    cmd.current_dir(project_root).arg("-batch").arg("compile");

    let (_, stdout, stderr, timed_out) = run_checked(cmd).await;
    let mut diagnostics = parse_scalac(&stdout, file);
    diagnostics.extend(parse_scalac(&stderr, file));
    CheckResult { diagnostics, timed_out }
}

fn assemble_classpath(project_root: &Path) -> String {
    let candidates = [
        "target/scala-2.13/classes",
        "target/scala-3/classes",
        "target/classes",
    ];
    let paths: Vec<String> = candidates
        .iter()
        .map(|candidate| project_root.join(candidate))
        .filter(|path| path.is_dir())
        .map(|path| path.to_string_lossy().into_owned())
        .collect();
    paths.join(":")
}

fn parse_scalac(output: &str, file: &Path) -> Vec<Diagnostic> {
    let re = Regex::new(r"^(.+\.scala):(\d+):\s*(error|warning):\s*(.+)$")
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
            let message = caps[4].trim();
            if FALSE_POSITIVE_FRAGMENTS.iter().any(|fragment| message.contains(fragment)) {
                return None;
            }
            let severity = if &caps[3] == "error" {
                Severity::Error
            } else {
                Severity::Warning
            };
            Some(Diagnostic {
                file: file.to_path_buf(),
                line: caps[2].parse().ok()?,
                column: 1,
                severity,
                message: message.to_string(),
                source: "scalac".to_string(),
                rule_id: None,
            })
        })
        .collect()
}

/// Returns `true` if a build tool config (sbt, mill) is present for the
/// project, indicating full-project compilation should be preferred
/// over this best-effort single-file path.
#[must_use]
pub fn has_build_tool(project_root: &Path) -> bool {
    find_upward(project_root, "build.sbt").is_some() || project_root.join("build.sc").exists()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn parses_real_syntax_error() {
        let output = "A.scala:3: error: ';' expected but '}' found.\n";
        let diags = parse_scalac(output, Path::new("A.scala"));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Error);
    }

    #[test]
    fn filters_multi_module_false_positives() {
        let output = "A.scala:1: error: not found: type Foo\n";
        let diags = parse_scalac(output, Path::new("A.scala"));
        assert!(diags.is_empty());
    }
}
