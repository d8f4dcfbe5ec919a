//! Application bootstrap.
//!
//! Stages run strictly in order:
//! `Created -> ConfigLoaded -> CatalogResolved -> ReferenceDataLoaded ->
//! TopologyBuilt -> Started -> ShutdownRequested -> Stopped`.
//! Every stage that talks to an external collaborator is time-boxed and any
//! stage failure aborts the bootstrap.

use super::shutdown::ShutdownCoordinator;
use crate::catalog::{
    CatalogResolver, ClusterConfigProvider, GravitinoClient, MetadataCatalog,
    ResolvedClusterConfig,
};
use crate::config::Config;
use crate::health::{table_component, HealthCheck, CATALOG_COMPONENT, REFERENCE_DATA_COMPONENT};
use crate::metrics::MaterializationMetrics;
use crate::reference::{ReferenceDataLoader, ReferenceTable};
use crate::registry::{ApicurioRegistryClient, RegistryAvroDecoder, SchemaRegistry};
use crate::storage::{ObjectStoreFileSystem, StorageCredentials, VirtualFileSystem};
use crate::streams::{MaterializationBuilder, RecordObserver, StreamsRuntime};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Upper bound on each close stage.
const SHUTDOWN_STAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Bootstrap progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootstrapStage {
    Created,
    ConfigLoaded,
    CatalogResolved,
    ReferenceDataLoaded,
    TopologyBuilt,
    Started,
    ShutdownRequested,
    Stopped,
}

impl BootstrapStage {
    /// Stage name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapStage::Created => "created",
            BootstrapStage::ConfigLoaded => "config_loaded",
            BootstrapStage::CatalogResolved => "catalog_resolved",
            BootstrapStage::ReferenceDataLoaded => "reference_data_loaded",
            BootstrapStage::TopologyBuilt => "topology_built",
            BootstrapStage::Started => "started",
            BootstrapStage::ShutdownRequested => "shutdown_requested",
            BootstrapStage::Stopped => "stopped",
        }
    }
}

/// External services the application depends on.
#[derive(Clone)]
pub struct Collaborators {
    /// Metadata catalog session
    pub catalog: Arc<dyn MetadataCatalog>,
    /// Source of broker endpoints
    pub cluster: Arc<dyn ClusterConfigProvider>,
    /// Reference data storage
    pub vfs: Arc<dyn VirtualFileSystem>,
    /// Schema registry
    pub registry: Arc<dyn SchemaRegistry>,
}

impl Collaborators {
    /// Open the catalog session and create the production clients.
    pub async fn connect(config: &Config) -> Result<Self> {
        let catalog: Arc<dyn MetadataCatalog> = Arc::new(
            timed(
                "catalog session",
                config.catalog.request_timeout(),
                GravitinoClient::connect(&config.catalog),
            )
            .await?,
        );

        let cluster = Arc::new(CatalogResolver::new(
            catalog.clone(),
            config.catalog.topic_namespace.clone(),
        ));
        let vfs = Arc::new(
            ObjectStoreFileSystem::new(
                StorageCredentials::from(&config.storage),
                config.storage.request_timeout(),
            )
            .with_catalog(catalog.clone()),
        );
        let registry = Arc::new(ApicurioRegistryClient::new(&config.schema_registry)?);

        Ok(Self {
            catalog,
            cluster,
            vfs,
            registry,
        })
    }
}

/// Output of a successful bootstrap, ready to start.
pub struct Prepared {
    /// Broker endpoints and topic validation
    pub cluster: ResolvedClusterConfig,
    /// Reference dataset
    pub reference: Arc<ReferenceTable>,
    /// Pipeline, not yet started
    pub runtime: Arc<StreamsRuntime>,
}

/// Drives the bootstrap and the running phase.
pub struct Application {
    config: Config,
    health: Arc<HealthCheck>,
    metrics: Arc<MaterializationMetrics>,
    observer: Option<Arc<dyn RecordObserver>>,
    stage_timeout: Option<Duration>,
    stage: Mutex<BootstrapStage>,
}

impl Application {
    pub fn new(config: Config, health: Arc<HealthCheck>, metrics: Arc<MaterializationMetrics>) -> Self {
        Self {
            config,
            health,
            metrics,
            observer: None,
            stage_timeout: None,
            stage: Mutex::new(BootstrapStage::Created),
        }
    }

    /// Replace the default logging observer on both tables.
    pub fn with_observer(mut self, observer: Arc<dyn RecordObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Use one timeout for every stage instead of the per-service request
    /// timeouts.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    pub fn stage(&self) -> BootstrapStage {
        *self.stage.lock()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn health(&self) -> Arc<HealthCheck> {
        self.health.clone()
    }

    pub fn metrics(&self) -> Arc<MaterializationMetrics> {
        self.metrics.clone()
    }

    fn advance(&self, next: BootstrapStage) {
        let mut stage = self.stage.lock();
        info!(from = stage.as_str(), to = next.as_str(), "Bootstrap stage");
        *stage = next;
    }

    fn timeout_or(&self, fallback: Duration) -> Duration {
        self.stage_timeout.unwrap_or(fallback)
    }

    /// Run every stage up to `TopologyBuilt`.
    pub async fn prepare(&self, collaborators: &Collaborators) -> Result<Prepared> {
        self.config.validate()?;
        self.advance(BootstrapStage::ConfigLoaded);

        self.health.register_component(CATALOG_COMPONENT);
        self.health.register_component(REFERENCE_DATA_COMPONENT);

        let cluster = self.resolve_cluster(collaborators).await?;
        self.advance(BootstrapStage::CatalogResolved);

        let reference = self.load_reference_data(collaborators).await?;
        self.advance(BootstrapStage::ReferenceDataLoaded);

        let runtime = self.build_runtime(&cluster, collaborators)?;
        self.advance(BootstrapStage::TopologyBuilt);

        Ok(Prepared {
            cluster,
            reference,
            runtime,
        })
    }

    async fn resolve_cluster(&self, collaborators: &Collaborators) -> Result<ResolvedClusterConfig> {
        let catalog_name = &self.config.catalog.messaging_catalog;
        let topics = self.config.topics();

        let cluster = timed(
            "catalog resolution",
            self.timeout_or(self.config.catalog.request_timeout()),
            collaborators.cluster.resolve(catalog_name, &topics),
        )
        .await
        .map_err(|e| {
            self.health.mark_unhealthy(CATALOG_COMPONENT, &e.to_string());
            e
        })?;

        let missing: Vec<&str> = cluster.missing_topics().collect();
        if missing.is_empty() {
            self.health.mark_healthy(CATALOG_COMPONENT);
        } else {
            warn!(topics = ?missing, "Topics missing from catalog, continuing with configured names");
            self.health.mark_degraded(
                CATALOG_COMPONENT,
                &format!("topics not in catalog: {}", missing.join(", ")),
            );
        }

        Ok(cluster)
    }

    async fn load_reference_data(&self, collaborators: &Collaborators) -> Result<Arc<ReferenceTable>> {
        let path = self.config.reference_data.resolved_path()?;
        let loader = ReferenceDataLoader::new(collaborators.vfs.as_ref());

        let report = timed(
            "reference data load",
            self.timeout_or(self.config.storage.request_timeout()),
            loader.load(&path),
        )
        .await
        .map_err(|e| {
            self.health.mark_unhealthy(REFERENCE_DATA_COMPONENT, &e.to_string());
            e
        })?;

        let discarded = report.discard_count();
        self.metrics.set_reference_data(report.table.len(), discarded);
        if discarded == 0 {
            self.health.mark_healthy(REFERENCE_DATA_COMPONENT);
        } else {
            self.health.mark_degraded(
                REFERENCE_DATA_COMPONENT,
                &format!("{} rows skipped", discarded),
            );
        }

        Ok(Arc::new(report.table))
    }

    fn build_runtime(
        &self,
        cluster: &ResolvedClusterConfig,
        collaborators: &Collaborators,
    ) -> Result<Arc<StreamsRuntime>> {
        let mut builder = MaterializationBuilder::new(&self.config, cluster);
        if let Some(ref observer) = self.observer {
            builder = builder.with_observer(observer.clone());
        }

        let runtime_config = builder.build_config()?;
        let topology = builder.build_topology()?;
        for source in topology.sources() {
            self.health.register_component(&table_component(&source.topic));
        }

        let decoder = Arc::new(RegistryAvroDecoder::from_config(
            collaborators.registry.clone(),
            &self.config.schema_registry,
        ));

        Ok(Arc::new(
            StreamsRuntime::new(runtime_config, topology, decoder)
                .with_metrics(self.metrics.clone())
                .with_health(self.health.clone()),
        ))
    }

    /// Bootstrap, run until `signal` resolves or a table fails, then shut
    /// down.
    ///
    /// `signal` yields the shutdown reason. The catalog session is closed on
    /// every exit path.
    pub async fn run<S>(&self, collaborators: Collaborators, signal: S) -> Result<()>
    where
        S: Future<Output = String>,
    {
        let prepared = match self.prepare(&collaborators).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(stage = self.stage().as_str(), error = %e, "Bootstrap failed");
                self.metrics.record_error(e.category());
                if let Err(close_err) = collaborators.catalog.close().await {
                    warn!(error = %close_err, "Catalog session close failed");
                }
                return Err(e);
            }
        };

        info!(
            bootstrap_servers = %prepared.cluster.bootstrap_servers,
            reference_records = prepared.reference.len(),
            "Bootstrap complete"
        );

        let runtime = prepared.runtime;
        let coordinator = ShutdownCoordinator::new(
            runtime.clone(),
            collaborators.catalog.clone(),
            SHUTDOWN_STAGE_TIMEOUT,
        );

        let started = self.start(&runtime);
        let outcome = match started {
            Ok(mut fatal) => {
                self.advance(BootstrapStage::Started);
                tokio::select! {
                    reason = signal => Ok(reason),
                    Some(e) = fatal.recv() => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        self.advance(BootstrapStage::ShutdownRequested);
        let reason = match &outcome {
            Ok(reason) => reason.clone(),
            Err(e) => {
                error!(error = %e, "Pipeline failed");
                self.metrics.record_error(e.category());
                "fatal error".to_string()
            }
        };

        coordinator.shutdown(&reason).await;
        coordinator.wait().await;
        self.advance(BootstrapStage::Stopped);

        outcome.map(|_| ())
    }

    fn start(&self, runtime: &StreamsRuntime) -> Result<crate::streams::FatalErrors> {
        if runtime.config().clean_up_on_start && runtime.clean_up()? {
            info!(
                application_id = %runtime.config().application_id,
                "Removed local state from a previous run"
            );
        }
        runtime.start()
    }
}

/// Await `future`, failing with [`Error::Timeout`] after `limit`.
pub async fn timed<T, F>(stage: &str, limit: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "{} did not complete within {:?}",
            stage, limit
        ))),
    }
}
