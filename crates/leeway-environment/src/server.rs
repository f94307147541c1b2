// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP server for the leeway service.
//!
//! Routes:
//!
//! | Method | Path | Auth |
//! |--------|------|------|
//! | GET | `/health` | no |
//! | GET | `/object-types` | no |
//! | POST | `/simulations/new` | token |
//! | GET, POST | `/api/v1/simulations` | token |
//! | GET | `/api/v1/simulations/{uuid}` | token |
//! | GET | `/simulations/files/{filename}` | token |
//!
//! Every request passes the host allow-list first; requests for other hosts
//! are answered with 400.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use leeway_core::SimulationStore;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{ConfigError, Vars};
use crate::handlers;
use crate::intake::Intake;

/// Hosts accepted without configuration.
pub const DEFAULT_ALLOWED_HOSTS: [&str; 3] = [".localhost", "127.0.0.1", "[::1]"];

/// HTTP surface settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Accepted Host values. A leading dot matches the domain and its subdomains; `*` matches anything.
    pub allowed_hosts: Vec<String>,
    /// Directory simulation artifacts are served from.
    pub output_dir: PathBuf,
    /// URL prefix of served artifacts.
    pub files_url: String,
}

impl ServerConfig {
    /// Defaults plus one extra host per line of `LEEWAY_ALLOWED_HOSTS`.
    pub fn from_vars(vars: &Vars, output_dir: PathBuf) -> Result<Self, ConfigError> {
        let mut allowed_hosts: Vec<String> =
            DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect();
        if let Some(extra) = vars.get("ALLOWED_HOSTS") {
            allowed_hosts.extend(
                extra
                    .lines()
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(str::to_string),
            );
        }
        Ok(Self {
            allowed_hosts,
            output_dir,
            files_url: "/simulations/files/".to_string(),
        })
    }

    /// Public URL of an artifact.
    pub fn file_url(&self, name: &str) -> String {
        format!("{}{name}", self.files_url)
    }
}

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    /// Record storage.
    pub store: Arc<dyn SimulationStore>,
    /// Request intake.
    pub intake: Intake,
    /// Server settings.
    pub config: Arc<ServerConfig>,
    /// Process start, for the health endpoint.
    pub started_at: Instant,
}

impl AppState {
    /// Create state for a router.
    pub fn new(store: Arc<dyn SimulationStore>, intake: Intake, config: ServerConfig) -> Self {
        Self {
            store,
            intake,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/object-types", get(handlers::object_types))
        .route("/simulations/new", post(handlers::submit_form))
        .route(
            "/api/v1/simulations",
            get(handlers::list_simulations).post(handlers::create_simulation),
        )
        .route("/api/v1/simulations/{uuid}", get(handlers::get_simulation))
        .route("/simulations/files/{filename}", get(handlers::simulation_file))
        .layer(middleware::from_fn_with_state(state.clone(), check_host))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "HTTP server listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn check_host(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()));

    match host {
        Some(host) if host_allowed(&host, &state.config.allowed_hosts) => next.run(request).await,
        other => {
            warn!(host = ?other, "Rejected request for disallowed host");
            (StatusCode::BAD_REQUEST, "Bad Request (400)").into_response()
        }
    }
}

/// Check a Host header value (port allowed) against the allow-list.
pub fn host_allowed(host: &str, allowed: &[String]) -> bool {
    let host = strip_port(host.trim()).trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return false;
    }
    allowed.iter().any(|pattern| {
        let pattern = pattern.to_ascii_lowercase();
        if pattern == "*" {
            return true;
        }
        match pattern.strip_prefix('.') {
            Some(domain) => host == domain || host.ends_with(&pattern),
            None => host == pattern,
        }
    })
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal, keep the brackets.
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Vec<String> {
        DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect()
    }

    #[test]
    fn test_default_hosts() {
        let allowed = defaults();
        assert!(host_allowed("localhost", &allowed));
        assert!(host_allowed("localhost:8000", &allowed));
        assert!(host_allowed("app.localhost", &allowed));
        assert!(host_allowed("127.0.0.1:8000", &allowed));
        assert!(host_allowed("[::1]:8000", &allowed));
        assert!(host_allowed("[::1]", &allowed));
        assert!(!host_allowed("example.org", &allowed));
        assert!(!host_allowed("evil-localhost", &allowed));
        assert!(!host_allowed("", &allowed));
    }

    #[test]
    fn test_leading_dot_matches_subdomains() {
        let allowed = vec![".example.org".to_string(), "leeway.example.net".to_string()];
        assert!(host_allowed("example.org", &allowed));
        assert!(host_allowed("LEEWAY.Example.org", &allowed));
        assert!(host_allowed("leeway.example.net:443", &allowed));
        assert!(!host_allowed("other.example.net", &allowed));
        assert!(host_allowed("anything", &["*".to_string()]));
    }

    #[test]
    fn test_file_url() {
        let config = ServerConfig::from_vars(&Vars::default(), PathBuf::from("out")).unwrap();
        assert_eq!(config.file_url("a.png"), "/simulations/files/a.png");
    }
}
