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

/// Low-level session for communicating with one language-server process.
pub mod client;
/// Multiplexes one session per language.
pub mod manager;
/// LSP message protocol definitions.
pub mod protocol;
/// Server state and progress tracking.
pub mod state;

pub use client::{DiagnosticsWaitResult, LspSession, WARMUP_PERIOD};
pub use manager::SessionManager;
pub use state::{ProgressTracker, ServerState, ServerStatus};
