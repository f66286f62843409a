//! Prometheus HTTP exporter
//!
//! Serves the controller registry in text exposition format on /metrics.

use crate::metrics::ControllerMetrics;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;

pub struct MetricsExporter {
    metrics: Arc<ControllerMetrics>,
    addr: SocketAddr,
}

impl MetricsExporter {
    pub fn new(metrics: Arc<ControllerMetrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    /// Serve /metrics and /health until the task is dropped.
    pub async fn serve(self) -> std::io::Result<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .with_state(self.metrics);

        tracing::info!("Prometheus exporter listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app.into_make_service()).await
    }
}

async fn metrics_handler(State(metrics): State<Arc<ControllerMetrics>>) -> Response {
    let encoder = TextEncoder::new();
    let families = metrics.registry().gather();

    let mut buffer = Vec::new();
    match encoder.encode(&families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("Content-Type", encoder.format_type())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
