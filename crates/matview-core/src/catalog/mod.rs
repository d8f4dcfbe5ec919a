//! Metadata catalog integration.
//!
//! The catalog is the only source of broker endpoints. It is also queried
//! for topic metadata (soft validation) and fileset storage locations.

mod client;
pub mod rest_api;
mod resolver;

pub use client::GravitinoClient;
pub use resolver::{
    CatalogResolver, ClusterConfigProvider, ResolvedClusterConfig, StaticClusterConfigProvider,
    TopicValidationResult, BOOTSTRAP_SERVERS_PROPERTY, PARTITIONS_PROPERTY,
};

use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// A catalog loaded from the metadata service.
#[derive(Debug, Clone, Default)]
pub struct CatalogInfo {
    /// Catalog name
    pub name: String,
    /// Catalog properties
    pub properties: HashMap<String, String>,
}

/// Topic metadata registered in a messaging catalog.
#[derive(Debug, Clone, Default)]
pub struct TopicInfo {
    /// Topic name
    pub name: String,
    /// Topic properties
    pub properties: HashMap<String, String>,
}

/// Fileset metadata registered in a fileset catalog.
#[derive(Debug, Clone, Default)]
pub struct FilesetInfo {
    /// Fileset name
    pub name: String,
    /// Backing storage location
    pub storage_location: String,
    /// Fileset properties
    pub properties: HashMap<String, String>,
}

/// An open session against the metadata catalog.
#[async_trait]
pub trait MetadataCatalog: Send + Sync {
    /// Load a catalog and its properties.
    async fn load_catalog(&self, name: &str) -> Result<CatalogInfo>;

    /// Load a topic under `namespace` in `catalog`.
    ///
    /// Returns `Ok(None)` when the catalog does not know the topic.
    async fn load_topic(
        &self,
        catalog: &str,
        namespace: &str,
        topic: &str,
    ) -> Result<Option<TopicInfo>>;

    /// Load a fileset.
    async fn load_fileset(&self, catalog: &str, schema: &str, fileset: &str)
        -> Result<FilesetInfo>;

    /// Release the session. Calling this more than once is a no-op.
    async fn close(&self) -> Result<()>;
}
