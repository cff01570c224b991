//! HTTP control plane for the tunnerse relay.
//!
//! Builds the axum router for either routing mode and glues the four core
//! entry points (Register, Get, Response, Tunnel) plus Close and `/health`
//! to [`tunnerse_control::TunnelService`].

pub mod handlers;
pub mod models;
mod pages;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use tunnerse_control::TunnelService;

/// Relay server configuration.
pub struct RelayServerConfig {
    /// Address to bind the relay's HTTP surface.
    pub bind_addr: SocketAddr,
    /// Tunnel identity from Host header (true) or first path segment (false).
    pub subdomain: bool,
    /// Render browser-facing errors as static HTML pages instead of JSON.
    pub warns_on_html: bool,
    /// Inbound body cap for relayed requests.
    pub max_body_bytes: usize,
    /// Directory holding the static error pages.
    pub static_dir: PathBuf,
}

/// Application state shared across handlers.
pub struct AppState {
    pub service: Arc<TunnelService>,
    pub subdomain: bool,
    pub warns_on_html: bool,
    pub max_body_bytes: usize,
    pub static_dir: PathBuf,
}

/// The relay's HTTP server.
pub struct RelayServer {
    config: RelayServerConfig,
    state: Arc<AppState>,
}

impl RelayServer {
    pub fn new(config: RelayServerConfig, service: Arc<TunnelService>) -> Self {
        let state = Arc::new(AppState {
            service,
            subdomain: config.subdomain,
            warns_on_html: config.warns_on_html,
            max_body_bytes: config.max_body_bytes,
            static_dir: config.static_dir.clone(),
        });
        Self { config, state }
    }

    /// Build the router for the configured routing mode.
    pub fn build_router(&self) -> Router {
        let router = if self.config.subdomain {
            // Tunnel identity comes from the Host header; every unmatched
            // path is an external client request.
            Router::new()
                .route("/health", get(handlers::health))
                .route("/register", post(handlers::register))
                .route("/tunnel", get(handlers::agent_poll))
                .route("/response", post(handlers::agent_respond))
                .route("/close", post(handlers::close_tunnel))
                .route(
                    "/",
                    get(handlers::external_entry).head(handlers::external_entry),
                )
                .fallback(handlers::external_entry)
        } else {
            // Tunnel identity is the first path segment.
            Router::new()
                .route("/health", get(handlers::health))
                .route("/register", post(handlers::register))
                .route("/{name}/tunnel", get(handlers::agent_poll_path))
                .route("/{name}/response", post(handlers::agent_respond_path))
                .route("/{name}/close", post(handlers::close_tunnel_path))
                .route(
                    "/{name}",
                    get(handlers::external_entry_path).head(handlers::external_entry_path),
                )
                .route(
                    "/{name}/{*rest}",
                    get(handlers::external_entry_path).head(handlers::external_entry_path),
                )
                .route("/", get(handlers::home).head(handlers::home))
        };

        router
            .with_state(self.state.clone())
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve until the process exits.
    pub async fn start(self) -> Result<(), anyhow::Error> {
        let router = self.build_router();

        info!(
            addr = %self.config.bind_addr,
            subdomain = self.config.subdomain,
            "relay HTTP server starting"
        );

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        axum::serve(listener, router)
            .await
            .map_err(|e| anyhow::anyhow!("relay server error: {}", e))?;

        Ok(())
    }
}
