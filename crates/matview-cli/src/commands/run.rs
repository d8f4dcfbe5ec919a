//! Run command implementation.

use crate::server::{start_server, ServerState};
use anyhow::Result;
use matview_core::engine::{Application, Collaborators};
use matview_core::health::{HealthCheck, CATALOG_COMPONENT};
use matview_core::metrics::MaterializationMetrics;
use matview_core::Config;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Bootstrap the pipeline and run until a termination signal or a fatal
/// error.
pub async fn run(
    mut config: Config,
    catalog_uri: Option<String>,
    metalake: Option<String>,
) -> Result<()> {
    // Apply CLI overrides
    if let Some(uri) = catalog_uri {
        config.catalog.uri = uri;
    }
    if let Some(m) = metalake {
        config.catalog.metalake = m;
    }
    config.validate()?;

    info!(
        catalog = %config.catalog.uri,
        metalake = %config.catalog.metalake,
        application_id = %config.kafka.application_id,
        "Starting materialization pipeline"
    );

    let health = Arc::new(HealthCheck::new());
    let metrics = Arc::new(MaterializationMetrics::new()?);

    let server_state = Arc::new(ServerState {
        health: Arc::clone(&health),
        metrics: Arc::clone(&metrics),
    });

    // Start HTTP servers
    let (server_shutdown_tx, server_shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(start_server(
        server_state,
        config.monitoring.health_port,
        config.monitoring.metrics_port,
        server_shutdown_rx,
    ));

    let result = match Collaborators::connect(&config).await {
        Ok(collaborators) => {
            let app = Application::new(config, health, Arc::clone(&metrics));
            app.run(collaborators, shutdown_signal()).await
        }
        Err(e) => {
            health.mark_unhealthy(CATALOG_COMPONENT, &e.to_string());
            metrics.record_error(e.category());
            Err(e)
        }
    };

    let _ = server_shutdown_tx.send(true);
    if let Err(e) = server.await {
        warn!(error = %e, "HTTP server task failed");
    }

    result?;
    info!("Materialization pipeline stopped");
    Ok(())
}

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal() -> String {
    #[cfg(unix)]
    {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                        "SIGINT".to_string()
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown");
                        "SIGTERM".to_string()
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl+C only");
                ctrl_c().await
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await
    }
}

async fn ctrl_c() -> String {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        return std::future::pending().await;
    }
    info!("Received Ctrl+C, initiating graceful shutdown");
    "SIGINT".to_string()
}
