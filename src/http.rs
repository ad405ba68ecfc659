//! HTTP endpoint exposing the gauges to Prometheus.

use crate::listener::shutdown_requested;
use crate::metrics::PrometheusRegistry;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

const METRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Build the router serving `/metrics` and `/health`.
pub fn router(registry: Arc<PrometheusRegistry>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(registry)
}

async fn metrics_handler(State(registry): State<Arc<PrometheusRegistry>>) -> Response {
    match registry.render() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", METRICS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Serve the exporter on `addr` until shutdown.
pub async fn serve(
    registry: Arc<PrometheusRegistry>,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Prometheus exporter listening");

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move {
            shutdown_requested(&mut shutdown).await;
            info!("Prometheus exporter shutting down");
        })
        .await
}
