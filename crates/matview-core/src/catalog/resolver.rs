//! Cluster configuration discovery.
//!
//! Broker endpoints come from the messaging catalog's properties. Topic
//! lookups are soft: a topic the catalog does not know is reported, never
//! raised, since the broker remains the authority on topic existence.

use super::MetadataCatalog;
use crate::error::CatalogError;
use crate::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Catalog property holding the broker endpoints.
pub const BOOTSTRAP_SERVERS_PROPERTY: &str = "bootstrap.servers";

/// Topic property reported as the partition hint.
pub const PARTITIONS_PROPERTY: &str = "partitions";

/// Outcome of looking up one topic in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicValidationResult {
    /// Topic name as configured
    pub topic_name: String,
    /// Whether the catalog knows the topic
    pub exists: bool,
    /// Value of the topic's `partitions` property, when known
    pub partition_hint: Option<String>,
}

impl TopicValidationResult {
    fn missing(topic: &str) -> Self {
        Self {
            topic_name: topic.to_string(),
            exists: false,
            partition_hint: None,
        }
    }
}

/// Connection parameters discovered at boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClusterConfig {
    /// Comma-separated broker endpoints
    pub bootstrap_servers: String,
    /// True when every expected topic was found in the catalog
    pub validated: bool,
    /// Per-topic validation results, in request order
    pub topics: Vec<TopicValidationResult>,
}

impl ResolvedClusterConfig {
    /// Topics the catalog did not know.
    pub fn missing_topics(&self) -> impl Iterator<Item = &str> {
        self.topics
            .iter()
            .filter(|t| !t.exists)
            .map(|t| t.topic_name.as_str())
    }
}

/// Source of cluster connection parameters.
#[async_trait]
pub trait ClusterConfigProvider: Send + Sync {
    /// Resolve broker endpoints from `catalog_name` and validate `topics`.
    ///
    /// Fails only when the endpoints cannot be determined. Missing topics
    /// are reported in the result.
    async fn resolve(&self, catalog_name: &str, topics: &[String])
        -> Result<ResolvedClusterConfig>;
}

/// Provider backed by the metadata catalog.
pub struct CatalogResolver {
    catalog: Arc<dyn MetadataCatalog>,
    topic_namespace: String,
}

impl CatalogResolver {
    /// Create a resolver that looks topics up under `topic_namespace`.
    pub fn new(catalog: Arc<dyn MetadataCatalog>, topic_namespace: impl Into<String>) -> Self {
        Self {
            catalog,
            topic_namespace: topic_namespace.into(),
        }
    }

    async fn validate_topic(&self, catalog_name: &str, topic: &str) -> TopicValidationResult {
        match self
            .catalog
            .load_topic(catalog_name, &self.topic_namespace, topic)
            .await
        {
            Ok(Some(info)) => {
                let partition_hint = info.properties.get(PARTITIONS_PROPERTY).cloned();
                info!(
                    topic = %topic,
                    partitions = %partition_hint.as_deref().unwrap_or("unknown"),
                    "Topic found in catalog"
                );
                TopicValidationResult {
                    topic_name: topic.to_string(),
                    exists: true,
                    partition_hint,
                }
            }
            Ok(None) => {
                warn!(
                    topic = %topic,
                    catalog = %catalog_name,
                    "Topic not found in catalog, it may still exist in the broker"
                );
                TopicValidationResult::missing(topic)
            }
            Err(e) => {
                warn!(
                    topic = %topic,
                    catalog = %catalog_name,
                    error = %e,
                    "Topic lookup failed, it may still exist in the broker"
                );
                TopicValidationResult::missing(topic)
            }
        }
    }
}

#[async_trait]
impl ClusterConfigProvider for CatalogResolver {
    async fn resolve(
        &self,
        catalog_name: &str,
        topics: &[String],
    ) -> Result<ResolvedClusterConfig> {
        let catalog = self.catalog.load_catalog(catalog_name).await?;
        let bootstrap_servers = bootstrap_servers_from(catalog_name, &catalog.properties)?;
        info!(
            catalog = %catalog_name,
            bootstrap_servers = %bootstrap_servers,
            "Resolved broker endpoints from catalog"
        );

        let results: Vec<_> = join_all(
            topics
                .iter()
                .map(|topic| self.validate_topic(catalog_name, topic)),
        )
        .await;

        Ok(ResolvedClusterConfig {
            bootstrap_servers,
            validated: results.iter().all(|r| r.exists),
            topics: results,
        })
    }
}

/// Provider backed by a fixed property map.
#[derive(Debug, Clone, Default)]
pub struct StaticClusterConfigProvider {
    properties: HashMap<String, String>,
    topics: HashMap<String, Option<String>>,
}

impl StaticClusterConfigProvider {
    /// Provider reporting `bootstrap_servers` for every catalog.
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        let mut properties = HashMap::new();
        properties.insert(BOOTSTRAP_SERVERS_PROPERTY.to_string(), bootstrap_servers.into());
        Self {
            properties,
            topics: HashMap::new(),
        }
    }

    /// Provider reporting an arbitrary property set.
    pub fn from_properties(properties: HashMap<String, String>) -> Self {
        Self {
            properties,
            topics: HashMap::new(),
        }
    }

    /// Register a known topic with an optional partition hint.
    pub fn with_topic(mut self, topic: impl Into<String>, partitions: Option<&str>) -> Self {
        self.topics
            .insert(topic.into(), partitions.map(str::to_string));
        self
    }
}

#[async_trait]
impl ClusterConfigProvider for StaticClusterConfigProvider {
    async fn resolve(
        &self,
        catalog_name: &str,
        topics: &[String],
    ) -> Result<ResolvedClusterConfig> {
        let bootstrap_servers = bootstrap_servers_from(catalog_name, &self.properties)?;

        let results: Vec<_> = topics
            .iter()
            .map(|topic| match self.topics.get(topic) {
                Some(hint) => TopicValidationResult {
                    topic_name: topic.clone(),
                    exists: true,
                    partition_hint: hint.clone(),
                },
                None => {
                    warn!(topic = %topic, "Topic not registered in static configuration");
                    TopicValidationResult::missing(topic)
                }
            })
            .collect();

        Ok(ResolvedClusterConfig {
            bootstrap_servers,
            validated: results.iter().all(|r| r.exists),
            topics: results,
        })
    }
}

fn bootstrap_servers_from(
    catalog_name: &str,
    properties: &HashMap<String, String>,
) -> Result<String> {
    properties
        .get(BOOTSTRAP_SERVERS_PROPERTY)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            CatalogError::MissingProperty {
                catalog: catalog_name.to_string(),
                property: BOOTSTRAP_SERVERS_PROPERTY.to_string(),
            }
            .into()
        })
}
