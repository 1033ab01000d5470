// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Exercises [`claude_lsp::lsp`] against a real `mockls` child process
//! (not the in-process unit tests `src/bin/mockls.rs` carries itself),
//! covering the multiplexer behaviors that only show up across an actual
//! process boundary: the warmup period, generation-based diagnostics
//! waiting, restart-on-death, and the Metals readiness heuristic.

use std::time::Duration;

use claude_lsp::config::{Config, ServerConfig};
use claude_lsp::lsp::{DiagnosticsWaitResult, LspSession, SessionManager};
use claude_lsp::registry;

fn mockls_path() -> String {
    env!("CARGO_BIN_EXE_mockls").to_string()
}

fn extra_args(args: &[&str]) -> Vec<String> {
    args.iter().map(ToString::to_string).collect()
}

#[tokio::test]
async fn publishes_diagnostics_and_bumps_generation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec = registry::find("rust").expect("rust is a known language");
    let file = dir.path().join("main.rs");
    std::fs::write(&file, "fn main() {}\n").expect("write fixture");

    let session = LspSession::spawn(spec, dir.path(), &mockls_path(), &extra_args(&["--diagnostics-delay", "200"]))
        .await
        .expect("spawn mockls");
    session.initialize(dir.path(), None).await.expect("initialize");
    assert!(session.is_ready(), "non-scala sessions are ready as soon as initialize succeeds");

    let before = session.generation();
    session.did_open(&file, "rust", "fn main() {}\n").await.expect("did_open");

    let result = session.wait_for_diagnostics_update(before, Duration::from_secs(5)).await;
    assert_eq!(result, DiagnosticsWaitResult::Updated);

    let diagnostics = session.get_diagnostics(&file).await;
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].message.contains("mock diagnostic"));

    session.shutdown().await.expect("shutdown");
}

/// With nothing published yet, waiting should run out the clock rather
/// than declare the session inactive early just because it is within
/// [`claude_lsp::lsp::WARMUP_PERIOD`] — some real servers (pyright,
/// metals) stay silent until a file is opened.
#[tokio::test]
async fn wait_runs_out_the_clock_during_warmup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec = registry::find("rust").expect("rust is a known language");

    let session = LspSession::spawn(spec, dir.path(), &mockls_path(), &extra_args(&["--no-diagnostics"]))
        .await
        .expect("spawn mockls");
    session.initialize(dir.path(), None).await.expect("initialize");

    let started = std::time::Instant::now();
    let result = session.wait_for_diagnostics_update(0, Duration::from_millis(300)).await;
    assert_eq!(result, DiagnosticsWaitResult::Inactive);
    assert!(started.elapsed() >= Duration::from_millis(250), "should wait out the full timeout, not bail early");

    session.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn reports_server_died_after_crash() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec = registry::find("rust").expect("rust is a known language");
    let file = dir.path().join("main.rs");
    std::fs::write(&file, "fn main() {}\n").expect("write fixture");

    // drop-after 1: mockls exits right after answering `initialize`.
    let session = LspSession::spawn(spec, dir.path(), &mockls_path(), &extra_args(&["--drop-after", "1"]))
        .await
        .expect("spawn mockls");
    session.initialize(dir.path(), None).await.expect("initialize");

    let before = session.generation();
    let result = session.wait_for_diagnostics_update(before, Duration::from_secs(5)).await;
    assert_eq!(result, DiagnosticsWaitResult::ServerDied);
    assert!(!session.is_alive());
}

#[tokio::test]
async fn session_manager_restarts_a_dead_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = Config::default();
    config.server.insert(
        "rust".to_string(),
        ServerConfig {
            command: Some(mockls_path()),
            args: extra_args(&["--drop-after", "1"]),
            initialization_options: None,
            prefer_direct: false,
        },
    );
    let manager = SessionManager::new(config, dir.path().to_path_buf());

    let first = manager.get_session("rust").await.expect("spawn first session");
    // `--drop-after 1` means the child has already exited by the time
    // `initialize` returns; give the reader task a moment to notice EOF.
    tokio::time::timeout(Duration::from_secs(5), async {
        while first.is_alive() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("first session should die");

    let second = manager.get_session("rust").await.expect("spawn replacement session");
    assert!(second.is_ready());
    assert!(!std::sync::Arc::ptr_eq(&first, &second), "a dead session must be replaced, not reused");
}

/// Metals defers readiness until it logs its own "indexing complete"
/// message, distinct from the generic `$/progress` sequence every
/// language server gets from `--indexing-delay`.
#[tokio::test]
async fn scala_session_becomes_ready_on_metals_indexing_message() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec = registry::find("scala").expect("scala is a known language");

    let session = LspSession::spawn(
        spec,
        dir.path(),
        &mockls_path(),
        &extra_args(&["--indexing-delay", "200", "--log-message-on-indexing"]),
    )
    .await
    .expect("spawn mockls");
    session.initialize(dir.path(), None).await.expect("initialize");

    assert!(!session.is_ready(), "scala sessions wait for the indexing signal, not just the handshake");

    tokio::time::timeout(Duration::from_secs(5), async {
        while !session.is_ready() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("should become ready well before the 60s metals fallback timeout");

    session.shutdown().await.expect("shutdown");
}
