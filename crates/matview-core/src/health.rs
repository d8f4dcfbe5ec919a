//! Component health for the bootstrap stages and the table tasks.
//!
//! Every bootstrap stage and every table registers a component here. The
//! HTTP layer serves [`HealthCheck::report`] as JSON and derives liveness and
//! readiness from the same registry.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Metadata catalog session.
pub const CATALOG_COMPONENT: &str = "catalog";

/// Reference dataset.
pub const REFERENCE_DATA_COMPONENT: &str = "reference_data";

/// Component name of the table over `topic`.
pub fn table_component(topic: &str) -> String {
    format!("table:{}", topic)
}

/// State of one component. The reason travels with the non-healthy states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
    /// Registered, no outcome yet
    Unknown,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Degraded(_) => "degraded",
            ComponentStatus::Unhealthy(_) => "unhealthy",
            ComponentStatus::Unknown => "unknown",
        }
    }

    fn reason(&self) -> Option<&str> {
        match self {
            ComponentStatus::Degraded(reason) | ComponentStatus::Unhealthy(reason) => {
                Some(reason.as_str())
            }
            _ => None,
        }
    }
}

/// Worst state across all components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// One component in a [`HealthReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentReport {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&ComponentStatus> for ComponentReport {
    fn from(status: &ComponentStatus) -> Self {
        Self {
            status: status.as_str().to_string(),
            message: status.reason().map(str::to_string),
        }
    }
}

/// Point-in-time view of the registry, as served on `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub uptime_seconds: u64,
    pub pipeline_running: bool,
    pub components: BTreeMap<String, ComponentReport>,
}

/// Registry of component states plus the pipeline running flag.
pub struct HealthCheck {
    components: RwLock<BTreeMap<String, ComponentStatus>>,
    started_at: Instant,
    pipeline_running: AtomicBool,
}

impl HealthCheck {
    pub fn new() -> Self {
        Self {
            components: RwLock::new(BTreeMap::new()),
            started_at: Instant::now(),
            pipeline_running: AtomicBool::new(false),
        }
    }

    /// Track `name` as `Unknown`. A component that already reported keeps
    /// its state.
    pub fn register_component(&self, name: &str) {
        self.components
            .write()
            .entry(name.to_string())
            .or_insert(ComponentStatus::Unknown);
    }

    fn set(&self, name: &str, status: ComponentStatus) {
        self.components.write().insert(name.to_string(), status);
    }

    pub fn mark_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy);
    }

    pub fn mark_degraded(&self, name: &str, reason: &str) {
        self.set(name, ComponentStatus::Degraded(reason.to_string()));
    }

    pub fn mark_unhealthy(&self, name: &str, reason: &str) {
        self.set(name, ComponentStatus::Unhealthy(reason.to_string()));
    }

    pub fn component(&self, name: &str) -> Option<ComponentStatus> {
        self.components.read().get(name).cloned()
    }

    /// `Unhealthy` if any component is, else `Degraded` if any component
    /// is, else `Healthy`. Unknown components do not count against it.
    pub fn overall_status(&self) -> HealthStatus {
        self.components
            .read()
            .values()
            .map(|status| match status {
                ComponentStatus::Unhealthy(_) => HealthStatus::Unhealthy,
                ComponentStatus::Degraded(_) => HealthStatus::Degraded,
                _ => HealthStatus::Healthy,
            })
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }

    /// Liveness: nothing is unhealthy.
    pub fn is_operational(&self) -> bool {
        self.overall_status() != HealthStatus::Unhealthy
    }

    /// Readiness: the tables are being maintained and nothing is unhealthy.
    pub fn is_ready(&self) -> bool {
        self.is_pipeline_running() && self.is_operational()
    }

    pub fn pipeline_started(&self) {
        self.pipeline_running.store(true, Ordering::SeqCst);
    }

    pub fn pipeline_stopped(&self) {
        self.pipeline_running.store(false, Ordering::SeqCst);
    }

    pub fn is_pipeline_running(&self) -> bool {
        self.pipeline_running.load(Ordering::SeqCst)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn report(&self) -> HealthReport {
        let components = self
            .components
            .read()
            .iter()
            .map(|(name, status)| (name.clone(), ComponentReport::from(status)))
            .collect();

        HealthReport {
            status: self.overall_status(),
            uptime_seconds: self.uptime_seconds(),
            pipeline_running: self.is_pipeline_running(),
            components,
        }
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}
