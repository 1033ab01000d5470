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

//! Multiplexes one [`LspSession`] per language, spawning lazily on first
//! use and restarting a session that has died.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::lsp::LspSession;
use crate::registry;

/// Owns the set of language-server sessions active for one project root.
pub struct SessionManager {
    config: Config,
    root: PathBuf,
    sessions: Mutex<HashMap<&'static str, Arc<LspSession>>>,
}

impl SessionManager {
    /// Creates a manager with no sessions spawned yet.
    #[must_use]
    pub fn new(config: Config, root: PathBuf) -> Self {
        Self {
            config,
            root,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns an initialized session for `language`, spawning (and
    /// restarting, if the previous instance died) as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the language is unknown, disabled by
    /// configuration, or the server process fails to spawn or initialize.
    pub async fn get_session(&self, language: &str) -> Result<Arc<LspSession>> {
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get(language) {
            if session.is_alive() {
                return Ok(session.clone());
            }
            warn!(language, "language server died, restarting");
            sessions.remove(language);
        }

        if self.config.is_direct_invocation_preferred(language) {
            return Err(anyhow!("language server disabled for '{language}' by configuration"));
        }

        let spec = registry::find(language).ok_or_else(|| anyhow!("unknown language '{language}'"))?;
        let command = self.config.lsp_command_for(language).unwrap_or(spec.lsp_command);
        let extra_args = self.config.lsp_args_for(language);
        let init_override = self.config.initialization_options_for(language);

        info!(language, command, "spawning language server");
        let session = LspSession::spawn(spec, &self.root, command, extra_args).await?;
        session.initialize(&self.root, init_override).await?;

        let session = Arc::new(session);
        sessions.insert(spec.name, session.clone());
        Ok(session)
    }

    /// Returns a snapshot of every currently active session.
    pub async fn active_sessions(&self) -> HashMap<&'static str, Arc<LspSession>> {
        self.sessions.lock().await.clone()
    }

    /// Shuts down one language's session, if active.
    pub async fn shutdown_session(&self, language: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.remove(language) {
            info!(language, "shutting down language server");
            if let Err(err) = session.shutdown().await {
                warn!(language, error = %err, "failed to shut down language server cleanly");
            }
        }
    }

    /// Shuts down every active session, e.g. on supervisor exit.
    pub async fn shutdown_all(&self) {
        let mut sessions = self.sessions.lock().await;
        for (language, session) in sessions.drain() {
            if let Err(err) = session.shutdown().await {
                warn!(language, error = %err, "failed to shut down language server cleanly");
            }
        }
    }
}
