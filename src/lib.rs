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

//! A local diagnostics sidecar for an AI coding assistant.
//!
//! One supervisor process per project root multiplexes language-server
//! sessions (or, for languages with no configured server, shells out to
//! a direct-invocation checker) and serves deduplicated diagnostics for
//! files the assistant just touched over a Unix stream socket. A thin
//! hook dispatcher talks to that supervisor, starting one if none is
//! running, and falls back to checking a file directly when the
//! supervisor cannot be reached within its deadline.

/// Layered configuration: defaults, user config file, explicit file,
/// then environment variables.
pub mod config;
/// Diagnostic data model, fingerprinting, and system-message formatting.
pub mod diagnostics;
/// File discovery and the unifying LSP/direct-invocation back end trait.
pub mod discovery;
/// Direct-invocation diagnostics back end (no language server required).
pub mod direct;
/// The hook dispatcher: stdin event parsing and pending-check orchestration.
pub mod dispatcher;
/// Gitignore-aware file filtering shared by discovery and the registry.
pub mod ignore_engine;
/// Project identity: canonicalized roots and their stable fingerprint.
pub mod identity;
/// LSP client implementation and per-project session management.
pub mod lsp;
/// Path validation against a project root.
pub mod path_security;
/// Filesystem layout: runtime directory, socket/PID/start file paths.
pub mod paths;
/// Static language registry and project/language detection.
pub mod registry;
/// The per-project embedded dedup and pending-check store.
pub mod store;
/// The supervisor process: session multiplexing over a stream socket.
pub mod supervisor;
