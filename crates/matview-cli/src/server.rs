//! Health and metrics endpoints.
//!
//! `/health`, `/healthz` and `/readyz` are served on the health port and
//! `/metrics` on the metrics port. Both listeners stop when the shutdown
//! flag flips to true.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use matview_core::health::{HealthCheck, HealthStatus};
use matview_core::metrics::MaterializationMetrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared state for HTTP endpoints.
pub struct ServerState {
    pub health: Arc<HealthCheck>,
    pub metrics: Arc<MaterializationMetrics>,
}

fn health_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

fn metrics_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve `router` on `port` until shutdown. Bind failures are logged and
/// leave the pipeline running.
async fn serve(name: &'static str, port: u16, router: Router, mut shutdown: watch::Receiver<bool>) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(server = name, port, error = %e, "Failed to bind");
            return;
        }
    };
    info!(server = name, port, "HTTP server listening");

    let stop = async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    };
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(stop)
        .await
    {
        error!(server = name, error = %e, "HTTP server failed");
    }
}

/// Run the health and metrics servers until `shutdown_rx` flips to true.
pub async fn start_server(
    state: Arc<ServerState>,
    health_port: u16,
    metrics_port: u16,
    shutdown_rx: watch::Receiver<bool>,
) {
    tokio::join!(
        serve("health", health_port, health_router(state.clone()), shutdown_rx.clone()),
        serve("metrics", metrics_port, metrics_router(state), shutdown_rx),
    );
    info!("HTTP servers stopped");
}

fn availability(up: bool) -> StatusCode {
    if up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Full component report; 503 once any component is unhealthy.
async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let report = state.health.report();
    (availability(report.status != HealthStatus::Unhealthy), Json(report))
}

async fn healthz_handler(State(state): State<Arc<ServerState>>) -> StatusCode {
    availability(state.health.is_operational())
}

/// Ready while both tables are maintained.
async fn readyz_handler(State(state): State<Arc<ServerState>>) -> StatusCode {
    availability(state.health.is_ready())
}

async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.export_prometheus_text(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use matview_core::health::{table_component, CATALOG_COMPONENT};

    fn state() -> Arc<ServerState> {
        Arc::new(ServerState {
            health: Arc::new(HealthCheck::new()),
            metrics: Arc::new(MaterializationMetrics::new().unwrap()),
        })
    }

    #[tokio::test]
    async fn test_readyz_follows_pipeline() {
        let state = state();
        assert_eq!(
            readyz_handler(State(state.clone())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.health.pipeline_started();
        assert_eq!(readyz_handler(State(state.clone())).await, StatusCode::OK);
        assert_eq!(healthz_handler(State(state)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_degraded_catalog_is_still_available() {
        let state = state();
        state
            .health
            .mark_degraded(CATALOG_COMPONENT, "topic sales not in catalog");

        let response = health_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_unhealthy_table() {
        let state = state();
        state
            .health
            .mark_unhealthy(&table_component("sales"), "consumer failed");

        let response = health_handler(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            healthz_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let state = state();
        state.metrics.set_reference_data(2, 1);

        let response = metrics_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            PROMETHEUS_CONTENT_TYPE
        );
    }

    #[tokio::test]
    async fn test_servers_stop_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let server = tokio::spawn(start_server(state(), 0, 0, rx));

        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }
}
