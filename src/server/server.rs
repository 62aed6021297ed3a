//! Gateway server implementation
//!
//! This module wires the gateway, the background poller and the HTTP
//! router together.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::api::create_router;
use crate::config::Config;
use crate::gateway::{Gateway, Poller};

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Aggregator core
    pub gateway: Arc<Gateway>,

    /// Server start time
    pub start_time: Instant,

    /// Fires on process shutdown; manual refreshes observe it too
    pub shutdown: CancellationToken,
}

// ============================================================================
// Gateway Server
// ============================================================================

/// Main gateway server
pub struct GatewayServer {
    config: Config,
    state: AppState,
}

impl GatewayServer {
    /// Create a new server from a validated configuration
    pub fn new(config: Config) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let gateway = Gateway::new(config.clone()).map_err(|e| ServerError::Init(e.to_string()))?;

        let state = AppState {
            gateway: Arc::new(gateway),
            start_time: Instant::now(),
            shutdown: CancellationToken::new(),
        };

        Ok(Self { config, state })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone(), &self.config.server.base_path);

        // Add CORS layer if enabled
        if self.config.server.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        // Add tracing layer if enabled
        if self.config.server.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Serve until `shutdown_signal` resolves
    ///
    /// Polling starts before the listener accepts connections; its first
    /// round crawls every source. On shutdown the poller is cancelled and
    /// awaited, so no crawl writes to the cache afterwards.
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.server.addr;

        let poller = Poller::spawn(
            self.state.gateway.clone(),
            self.config.polling_interval(),
            self.state.shutdown.child_token(),
        );

        tracing::info!(%addr, sources = self.config.feeds.len(), "Starting OPDS gateway");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        let shutdown = self.state.shutdown.clone();
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_signal.await;
                shutdown.cancel();
            })
            .await
            .map_err(|e| ServerError::Serve(e.to_string()));

        self.state.shutdown.cancel();
        poller.stop().await;

        tracing::info!("Gateway shutdown complete");
        served
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.server.addr,
            base_path: self.config.server.base_path.clone(),
            sources: self.config.feeds.len(),
            polling_interval_secs: self.config.polling.interval_secs,
            cors_enabled: self.config.server.enable_cors,
            request_logging_enabled: self.config.server.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub base_path: String,
    pub sources: usize,
    pub polling_interval_secs: u64,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "OPDS Gateway\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Base Path: {}\n\
             Sources: {}\n\
             Polling Interval: {}s\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.base_path,
            self.sources,
            self.polling_interval_secs,
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone, Error)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),

    /// Failed to bind to address
    #[error("Failed to bind: {0}")]
    Bind(String),

    /// Server error
    #[error("Server error: {0}")]
    Serve(String),
}

// ============================================================================
// Tests
// ============================================================================
