//! HTTP Server implementation
//!
//! This module provides the HTTP server using Axum framework with:
//! - Configurable host/port binding
//! - Graceful shutdown handling
//! - Health check endpoint
//! - CORS support for the presentation layer

use crate::api::handlers::AppState;
use crate::api::middleware::trace_id_middleware;
use crate::api::routes::build_api_routes;
use crate::core::config::ServerConfig;
use crate::core::Config;
use crate::extension::Dispatcher;
use axum::{
    extract::State,
    middleware,
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

/// HTTP API Server
pub struct ApiServer {
    router: Router,
    config: ServerConfig,
}

impl ApiServer {
    /// Create a server exposing `dispatcher` with the given configuration
    pub fn new(config: &Config, dispatcher: Arc<Dispatcher>) -> Self {
        let router = Self::build_router(AppState { dispatcher }, &config.security.allowed_origins);

        Self {
            router,
            config: config.server.clone(),
        }
    }

    /// Build the Axum router with all routes and middleware
    pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
        let health_router = Router::new()
            .route("/health", get(health_check))
            .with_state(state.clone());

        Router::new()
            .merge(health_router)
            .merge(build_api_routes(state))
            .layer(
                ServiceBuilder::new()
                    .layer(middleware::from_fn(trace_id_middleware))
                    .layer(TraceLayer::new_for_http())
                    .layer(Self::build_cors_layer(allowed_origins)),
            )
    }

    /// Build CORS layer from allowed origins configuration
    fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
        use tower_http::cors::Any;

        let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

        if allowed_origins.iter().any(|origin| origin == "*") {
            cors.allow_origin(Any)
        } else {
            let origins: Vec<_> = allowed_origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();
            cors.allow_origin(origins)
        }
    }

    /// Start the HTTP server and listen for requests
    ///
    /// Returns once a shutdown signal has been received and in-flight
    /// requests have drained.
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let socket_addr: SocketAddr = addr.parse()?;

        let listener = tokio::net::TcpListener::bind(socket_addr).await?;
        info!(addr = %socket_addr, "HTTP server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }
}

/// Health check endpoint handler
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let extensions = state.dispatcher.list_extensions().await;

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "extensions": extensions.len(),
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Initiating graceful shutdown...");
}
