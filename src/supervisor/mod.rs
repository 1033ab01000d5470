// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The supervisor process: one per project root, owning the LSP session
//! multiplexer and serving diagnostics over a Unix stream socket.
//!
//! The dispatcher is a thin client against this surface; direct
//! invocation is reachable both as a pluggable back end inside the
//! supervisor (see [`crate::discovery`]) and, when no supervisor answers
//! in time, directly from the dispatcher as a fallback.

/// Hand-rolled HTTP/1.1 framing over the stream socket.
pub mod http;
/// Per-client rolling-window request limiting.
pub mod rate_limit;

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::discovery;
use crate::identity::ProjectRoot;
use crate::lsp::SessionManager;
use crate::path_security::PathValidator;
use crate::paths;
use crate::registry;
use crate::supervisor::http::{Request, Response};
use crate::supervisor::rate_limit::RateLimiter;

/// Shared state for one supervisor process.
pub struct Supervisor {
    project: ProjectRoot,
    config: Config,
    sessions: SessionManager,
    validator: PathValidator,
    languages: HashSet<&'static str>,
    rate_limiter: RateLimiter,
    started_at: Instant,
    last_activity: AtomicI64,
    shutdown: Notify,
}

impl Supervisor {
    /// Builds a supervisor for `project`, detecting its languages up
    /// front.
    #[must_use]
    pub fn new(project: ProjectRoot, config: Config) -> Self {
        let languages = registry::detect_languages(project.path());
        let validator = PathValidator::new(project.path().to_path_buf());
        let sessions = SessionManager::new(config.clone(), project.path().to_path_buf());
        let rate_limiter = RateLimiter::new(config.rate_limit_per_minute);

        Self {
            project,
            config,
            sessions,
            validator,
            languages,
            rate_limiter,
            started_at: Instant::now(),
            last_activity: AtomicI64::new(0),
            shutdown: Notify::new(),
        }
    }

    /// Binds the project's stream socket, writes the PID/start files,
    /// and serves requests until idle for `config.idle_timeout` seconds
    /// or a `/shutdown` request arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime directory or socket cannot be
    /// prepared, or if binding the socket fails.
    pub async fn run(self) -> Result<()> {
        let id = self.project.id().to_string();
        paths::ensure_runtime_dir().context("preparing runtime directory")?;

        let socket_path = paths::socket_path(&id);
        if socket_path.exists() && UnixStream::connect(&socket_path).await.is_err() {
            debug!(path = %socket_path.display(), "removing stale socket");
            let _ = std::fs::remove_file(&socket_path);
        }

        let listener = bind_with_restricted_umask(&socket_path)?;
        std::fs::write(paths::pid_path(&id), std::process::id().to_string())
            .context("writing PID file")?;
        std::fs::write(paths::start_path(&id), now_secs().to_string())
            .context("writing start-time file")?;

        info!(project = %self.project.path().display(), socket = %socket_path.display(), "supervisor listening");

        let this = Arc::new(self);
        let idle_checker = tokio::spawn(idle_watch(this.clone()));

        loop {
            tokio::select! {
                () = this.shutdown.notified() => {
                    info!("shutdown requested");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let this = this.clone();
                            tokio::spawn(async move {
                                if let Err(err) = this.handle_connection(stream).await {
                                    warn!(error = %err, "connection handling failed");
                                }
                            });
                        }
                        Err(err) => warn!(error = %err, "accept failed"),
                    }
                }
            }
        }

        idle_checker.abort();
        this.sessions.shutdown_all().await;
        paths::cleanup_project_files(&id);
        Ok(())
    }

    async fn handle_connection(&self, mut stream: UnixStream) -> Result<()> {
        self.touch();
        if let Err(retry_after) = self.rate_limiter.check("local").await {
            let response = Response::too_many_requests(retry_after.as_secs().max(1));
            return http::serve_one(&mut stream, |_| async move { response }).await;
        }

        http::serve_one(&mut stream, |request| self.route(request)).await
    }

    async fn route(&self, request: Request) -> Response {
        match (request.method.as_str(), request.path.as_str()) {
            ("GET", "/health") => Response::json(&HealthBody {
                status: "healthy",
                uptime_secs: self.started_at.elapsed().as_secs(),
                project: self.project.path().to_string_lossy().into_owned(),
            }),
            ("GET", "/languages") => Response::json(&LanguagesBody {
                languages: self.languages.iter().copied().collect(),
            }),
            ("GET", "/diagnostics") => self.diagnostics_for_file(&request).await,
            ("GET", "/diagnostics/all") => {
                let diagnostics =
                    discovery::check_project_all(&self.config, &self.sessions, self.project.path(), &self.languages)
                        .await;
                Response::json(&DiagnosticsBody { diagnostics })
            }
            ("POST", "/shutdown") => {
                self.shutdown.notify_one();
                Response::json(&HealthBody {
                    status: "shutting down",
                    uptime_secs: self.started_at.elapsed().as_secs(),
                    project: self.project.path().to_string_lossy().into_owned(),
                })
            }
            _ => Response::not_found(),
        }
    }

    async fn diagnostics_for_file(&self, request: &Request) -> Response {
        let Some(file) = request.query_param("file") else {
            return Response::bad_request("missing 'file' query parameter");
        };
        let validated = match self.validator.validate_read(file) {
            Ok(path) => path,
            Err(err) => return Response::bad_request(&err.to_string()),
        };
        let diagnostics = discovery::check_file(&self.config, &self.sessions, self.project.path(), &validated).await;
        Response::json(&DiagnosticsBody { diagnostics })
    }

    fn touch(&self) {
        self.last_activity.store(now_secs(), Ordering::Relaxed);
    }
}

async fn idle_watch(supervisor: Arc<Supervisor>) {
    let idle_timeout = Duration::from_secs(supervisor.config.idle_timeout);
    supervisor.touch();

    loop {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let idle_for = now_secs() - supervisor.last_activity.load(Ordering::Relaxed);
        let idle_for = u64::try_from(idle_for).unwrap_or(0);
        if Duration::from_secs(idle_for) >= idle_timeout {
            info!(idle_for, "idle timeout reached, shutting down");
            supervisor.shutdown.notify_one();
            return;
        }
    }
}

/// Binds a Unix listener at `path` and immediately restricts its mode
/// to owner-only (`0o600`), so the socket is never briefly exposed at
/// whatever mode the process's ambient umask would otherwise leave it.
fn bind_with_restricted_umask(path: &std::path::Path) -> Result<UnixListener> {
    let listener =
        UnixListener::bind(path).with_context(|| format!("binding socket at {}", path.display()))?;
    set_owner_only_mode(path).with_context(|| format!("restricting permissions on {}", path.display()))?;
    Ok(listener)
}

#[cfg(unix)]
fn set_owner_only_mode(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only_mode(_path: &std::path::Path) -> std::io::Result<()> {
    Ok(())
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    uptime_secs: u64,
    project: String,
}

#[derive(Serialize)]
struct LanguagesBody {
    languages: Vec<&'static str>,
}

#[derive(Serialize)]
struct DiagnosticsBody {
    diagnostics: Vec<crate::diagnostics::Diagnostic>,
}
