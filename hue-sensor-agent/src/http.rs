//! HTTP server for the Prometheus metrics endpoint.

use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::metrics::{CONTENT_TYPE, SharedMetrics};

/// Path of the scrape endpoint.
pub const METRICS_PATH: &str = "/metrics";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    metrics: SharedMetrics,
}

/// Create the HTTP router.
fn create_router(metrics: SharedMetrics) -> Router {
    let state = AppState { metrics };

    Router::new()
        .route(METRICS_PATH, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the /metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.metrics.render();

    (StatusCode::OK, [("content-type", CONTENT_TYPE)], body).into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler(State(state): State<AppState>) -> Response {
    // Ready once the hub has answered at least once
    if state.metrics.polls() > 0 {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no hub poll succeeded yet\n",
        )
            .into_response()
    }
}

/// HTTP server configuration.
pub struct HttpServer {
    metrics: SharedMetrics,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(metrics: SharedMetrics) -> Self {
        Self { metrics }
    }

    /// Bind the metrics listener.
    ///
    /// Called before any task is spawned so an unusable port stops the agent
    /// at startup.
    pub async fn bind(listen_addr: SocketAddr) -> anyhow::Result<TcpListener> {
        TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("Failed to bind metrics endpoint to {}", listen_addr))
    }

    /// Serve on an already bound listener until the shutdown signal is received.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let router = create_router(self.metrics);
        let addr = listener.local_addr()?;

        info!(addr = %addr, path = METRICS_PATH, "HTTP server listening");

        // Run server with graceful shutdown
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
