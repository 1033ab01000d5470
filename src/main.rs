/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! `claude-lsp` CLI: the hook dispatcher entry point, a supervisor
//! launcher, and operator commands for inspecting and stopping running
//! supervisors.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]
#![allow(clippy::print_stderr, reason = "CLI tool needs to output to stderr")]

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use crossterm::tty::IsTty;
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use claude_lsp::config::Config;
use claude_lsp::discovery;
use claude_lsp::identity::ProjectRoot;
use claude_lsp::lsp::SessionManager;
use claude_lsp::paths;
use claude_lsp::supervisor::{self, http};

#[derive(Parser)]
#[command(name = "claude-lsp", about = "Local diagnostics sidecar for an AI coding assistant")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reads one hook event from stdin and reports diagnostics on stderr.
    Hook {
        /// Which kind of host event this is (e.g. `tool-use-completion`,
        /// `session-start`, `stop`).
        event_kind: String,
    },
    /// Runs diagnostics against a project or a single file directly.
    Diagnostics {
        /// Project root to check.
        #[arg(long)]
        root: PathBuf,
        /// Limit the check to a single file under `root`.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Starts a supervisor for a project root; blocks until it exits.
    Start {
        /// Project root the supervisor serves.
        #[arg(long)]
        root: PathBuf,
        /// Explicit configuration file, overriding the default location.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Stops the supervisor for a project root.
    Stop {
        /// Project root whose supervisor should be stopped.
        #[arg(long)]
        root: PathBuf,
    },
    /// Lists running supervisors.
    Status,
    /// Stops every running supervisor.
    KillAll,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Hook { event_kind } => run_hook(&event_kind).await,
        Commands::Diagnostics { root, file } => run_diagnostics(&root, file.as_deref()).await,
        Commands::Start { root, config } => run_start(&root, config).await,
        Commands::Stop { root } => run_stop(&root).await,
        Commands::Status => run_status().await,
        Commands::KillAll => run_kill_all().await,
    }
}

async fn run_hook(event_kind: &str) -> ExitCode {
    let mut input = String::new();
    if std::io::stdin().read_to_string(&mut input).is_err() {
        return ExitCode::from(0);
    }
    ExitCode::from(claude_lsp::dispatcher::run(event_kind, &input).await as u8)
}

async fn run_diagnostics(root: &std::path::Path, file: Option<&std::path::Path>) -> ExitCode {
    let Ok(project) = ProjectRoot::new(root) else {
        eprintln!("error: {} does not exist", root.display());
        return ExitCode::FAILURE;
    };
    let Ok(config) = Config::load(None) else {
        eprintln!("error: failed to load configuration");
        return ExitCode::FAILURE;
    };

    let manager = SessionManager::new(config.clone(), project.path().to_path_buf());
    let diagnostics = match file {
        Some(file) => discovery::check_file(&config, &manager, project.path(), file).await,
        None => {
            let languages = claude_lsp::registry::detect_languages(project.path());
            discovery::check_project_all(&config, &manager, project.path(), &languages).await
        }
    };
    manager.shutdown_all().await;

    let Ok(json) = serde_json::to_string_pretty(&diagnostics) else {
        eprintln!("error: failed to serialize diagnostics");
        return ExitCode::FAILURE;
    };
    println!("{json}");
    ExitCode::SUCCESS
}

async fn run_start(root: &std::path::Path, config_file: Option<PathBuf>) -> ExitCode {
    let Ok(project) = ProjectRoot::new(root) else {
        eprintln!("error: {} does not exist", root.display());
        return ExitCode::FAILURE;
    };
    let Ok(config) = Config::load(config_file) else {
        eprintln!("error: failed to load configuration");
        return ExitCode::FAILURE;
    };

    match supervisor::Supervisor::new(project, config).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: supervisor exited: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run_stop(root: &std::path::Path) -> ExitCode {
    let Ok(project) = ProjectRoot::new(root) else {
        eprintln!("error: {} does not exist", root.display());
        return ExitCode::FAILURE;
    };
    let socket = paths::socket_path(project.id());
    match http::request_json(&socket, "POST", "/shutdown", Duration::from_secs(2)).await {
        Ok(_) => {
            println!("stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("no running supervisor for {}: {err}", root.display());
            ExitCode::SUCCESS
        }
    }
}

#[derive(Serialize)]
struct StatusRow {
    id: String,
    project: String,
    uptime_secs: u64,
}

async fn discover_running_supervisors() -> Vec<StatusRow> {
    let dir = paths::runtime_dir();
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        let Some(id) = name.strip_prefix("claude-lsp-").and_then(|n| n.strip_suffix(".pid")) else {
            continue;
        };

        let socket = paths::socket_path(id);
        if let Ok(body) = http::request_json(&socket, "GET", "/health", Duration::from_millis(500)).await {
            rows.push(StatusRow {
                id: id.to_string(),
                project: body.get("project").and_then(|v| v.as_str()).unwrap_or("?").to_string(),
                uptime_secs: body.get("uptime_secs").and_then(serde_json::Value::as_u64).unwrap_or(0),
            });
        }
    }
    rows
}

async fn run_status() -> ExitCode {
    let rows = discover_running_supervisors().await;

    if std::io::stdout().is_tty() {
        print_status_table(&rows);
    } else {
        match serde_json::to_string_pretty(&rows) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("error: failed to serialize status: {err}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

fn print_status_table(rows: &[StatusRow]) {
    if rows.is_empty() {
        println!("no running supervisors");
        return;
    }

    let width = crossterm::terminal::size().map_or(80, |(columns, _)| columns as usize);
    let project_width = width.saturating_sub(28).max(20);

    println!("{:<project_width$}  {:>10}  {:<16}", "PROJECT", "UPTIME", "ID");
    for row in rows {
        println!(
            "{:<project_width$}  {:>10}  {:<16}",
            truncate(&row.project, project_width),
            format_uptime(row.uptime_secs),
            row.id
        );
    }
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        text.to_string()
    } else {
        format!("...{}", &text[text.len().saturating_sub(max_len - 3)..])
    }
}

fn format_uptime(seconds: u64) -> String {
    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else {
        format!("{}h{}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

async fn run_kill_all() -> ExitCode {
    let rows = discover_running_supervisors().await;
    if rows.is_empty() {
        println!("no running supervisors");
        return ExitCode::SUCCESS;
    }

    let mut failures = 0;
    for row in &rows {
        let socket = paths::socket_path(&row.id);
        match http::request_json(&socket, "POST", "/shutdown", Duration::from_secs(2)).await {
            Ok(_) => println!("stopped {}", row.project),
            Err(err) => {
                warn!(project = %row.project, error = %err, "failed to stop supervisor");
                eprintln!("failed to stop {}: {err}", row.project);
                failures += 1;
            }
        }
    }

    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
