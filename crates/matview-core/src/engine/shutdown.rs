//! Single-trigger shutdown.
//!
//! Stopping the pipeline, closing the catalog session and releasing the main
//! wait happen exactly once and in that order, no matter how many signals
//! arrive or from which task.

use crate::catalog::MetadataCatalog;
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A resource released during shutdown.
#[async_trait]
pub trait Closeable: Send + Sync {
    /// Release the resource. Must tolerate repeated calls.
    async fn close(&self) -> Result<()>;
}

/// Runs the close sequence once.
pub struct ShutdownCoordinator {
    triggered: AtomicBool,
    pipeline: Arc<dyn Closeable>,
    catalog: Arc<dyn MetadataCatalog>,
    stage_timeout: Duration,
    done_tx: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    /// Create a coordinator. Each close stage is bounded by `stage_timeout`.
    pub fn new(
        pipeline: Arc<dyn Closeable>,
        catalog: Arc<dyn MetadataCatalog>,
        stage_timeout: Duration,
    ) -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            triggered: AtomicBool::new(false),
            pipeline,
            catalog,
            stage_timeout,
            done_tx,
        }
    }

    /// Run the close sequence.
    ///
    /// Returns true for the call that performed the shutdown and false for
    /// every later call.
    pub async fn shutdown(&self, reason: &str) -> bool {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(reason = %reason, "Shutdown already in progress");
            return false;
        }

        info!(reason = %reason, "Shutting down");

        match tokio::time::timeout(self.stage_timeout, self.pipeline.close()).await {
            Ok(Ok(())) => info!("Pipeline stopped"),
            Ok(Err(e)) => warn!(error = %e, "Pipeline close failed"),
            Err(_) => warn!(timeout = ?self.stage_timeout, "Pipeline close timed out"),
        }

        match tokio::time::timeout(self.stage_timeout, self.catalog.close()).await {
            Ok(Ok(())) => info!("Catalog session closed"),
            Ok(Err(e)) => warn!(error = %e, "Catalog session close failed"),
            Err(_) => warn!(timeout = ?self.stage_timeout, "Catalog session close timed out"),
        }

        self.done_tx.send_replace(true);
        info!("Shutdown complete");
        true
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Whether the close sequence has finished.
    pub fn is_complete(&self) -> bool {
        *self.done_tx.borrow()
    }

    /// Wait until the close sequence has finished.
    pub async fn wait(&self) {
        let mut rx = self.done_tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}
