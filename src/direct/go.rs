// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Go direct-invocation checker: module-aware `go vet` when a `go.mod`
//! is present, a single-file `go vet` otherwise.

use std::path::Path;

use regex::Regex;
use tokio::process::Command;

use crate::diagnostics::{Diagnostic, Severity};
use crate::direct::{find_upward, run_checked, CheckResult};

/// Runs `go vet`, scoped to the owning module if one is found.
pub async fn check(project_root: &Path, file: &Path) -> CheckResult {
    let mut cmd = Command::new("go");
    cmd.arg("vet");

    if let Some(module_root) = find_upward(file, "go.mod") {
        cmd.current_dir(&module_root);
        let relative = file.strip_prefix(&module_root).unwrap_or(file);
        cmd.arg(format!("./{}", relative.display()));
    } else {
        cmd.current_dir(project_root).arg(file);
    }

    let (_, _, stderr, timed_out) = run_checked(cmd).await;
    CheckResult {
        diagnostics: parse_go_vet(&stderr, file),
        timed_out,
    }
}

fn parse_go_vet(output: &str, file: &Path) -> Vec<Diagnostic> {
    let re = Regex::new(r"^(.+\.go):(\d+):(\d+):\s*(.+)$")
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
            Some(Diagnostic {
                file: file.to_path_buf(),
                line: caps[2].parse().ok()?,
                column: caps[3].parse().ok()?,
                severity: Severity::Warning,
                message: caps[4].to_string(),
                source: "go vet".to_string(),
                rule_id: None,
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn parses_vet_output_for_target_file() {
        let output = "./main.go:12:2: Printf call has arguments but no formatting directives\n";
        let diags = parse_go_vet(output, Path::new("main.go"));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line, 12);
    }

    #[test]
    fn ignores_other_files_in_vet_output() {
        let output = "./other.go:1:1: unused variable\n";
        let diags = parse_go_vet(output, Path::new("main.go"));
        assert!(diags.is_empty());
    }
}
