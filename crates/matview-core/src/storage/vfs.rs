//! Virtual filesystem over object storage.
//!
//! Paths are resolved in two steps: `gvfs://` fileset paths are mapped to
//! their backing storage location through the metadata catalog, then the
//! physical location is read through `object_store`.

use crate::catalog::MetadataCatalog;
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const GVFS_PREFIX: &str = "gvfs://fileset/";

/// A parsed virtual path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualPath {
    /// `gvfs://fileset/{catalog}/{schema}/{fileset}/{sub_path}`
    Fileset {
        /// Fileset catalog
        catalog: String,
        /// Fileset schema
        schema: String,
        /// Fileset name
        fileset: String,
        /// Path inside the fileset
        sub_path: String,
    },
    /// `s3://bucket/key` or `s3a://bucket/key`
    S3 {
        /// Bucket name
        bucket: String,
        /// Object key
        key: String,
    },
    /// `file:///path` or a plain local path
    Local(PathBuf),
}

impl VirtualPath {
    /// Parse a path string.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |message: &str| StorageError::InvalidPath {
            path: path.to_string(),
            message: message.to_string(),
        };

        if let Some(rest) = path.strip_prefix(GVFS_PREFIX) {
            let mut parts = rest.splitn(4, '/');
            let catalog = parts.next().filter(|s| !s.is_empty());
            let schema = parts.next().filter(|s| !s.is_empty());
            let fileset = parts.next().filter(|s| !s.is_empty());
            let sub_path = parts.next().unwrap_or("").trim_matches('/');

            return match (catalog, schema, fileset) {
                (Some(catalog), Some(schema), Some(fileset)) => Ok(VirtualPath::Fileset {
                    catalog: catalog.to_string(),
                    schema: schema.to_string(),
                    fileset: fileset.to_string(),
                    sub_path: sub_path.to_string(),
                }),
                _ => Err(invalid("expected gvfs://fileset/{catalog}/{schema}/{fileset}/{path}").into()),
            };
        }

        if path.starts_with("gvfs://") {
            return Err(invalid("only gvfs://fileset/ paths are supported").into());
        }

        let s3_rest = path
            .strip_prefix("s3a://")
            .or_else(|| path.strip_prefix("s3://"));
        if let Some(rest) = s3_rest {
            let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
            let key = key.trim_start_matches('/');
            if bucket.is_empty() || key.is_empty() {
                return Err(invalid("expected s3://{bucket}/{key}").into());
            }
            return Ok(VirtualPath::S3 {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        if let Some(rest) = path.strip_prefix("file://") {
            return Ok(VirtualPath::Local(PathBuf::from(rest)));
        }

        if path.contains("://") {
            return Err(invalid("unsupported scheme").into());
        }

        if path.trim().is_empty() {
            return Err(invalid("empty path").into());
        }

        Ok(VirtualPath::Local(PathBuf::from(path)))
    }
}

/// Endpoint and credentials for the S3-compatible store.
#[derive(Debug, Clone, Default)]
pub struct StorageCredentials {
    /// Endpoint URL (MinIO or similar); absent means AWS
    pub endpoint: Option<String>,
    /// Access key ID
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
    /// Region
    pub region: Option<String>,
}

impl From<&StorageConfig> for StorageCredentials {
    fn from(config: &StorageConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
            region: Some(config.region.clone()),
        }
    }
}

/// Read access to whole files addressed by virtual path.
#[async_trait]
pub trait VirtualFileSystem: Send + Sync {
    /// Read the full contents at `path`.
    async fn open(&self, path: &str) -> Result<Bytes>;
}

/// Virtual filesystem backed by `object_store`.
pub struct ObjectStoreFileSystem {
    credentials: StorageCredentials,
    catalog: Option<Arc<dyn MetadataCatalog>>,
    timeout: Duration,
}

impl ObjectStoreFileSystem {
    /// Create a filesystem without fileset support.
    pub fn new(credentials: StorageCredentials, timeout: Duration) -> Self {
        Self {
            credentials,
            catalog: None,
            timeout,
        }
    }

    /// Resolve `gvfs://` paths through `catalog`.
    pub fn with_catalog(mut self, catalog: Arc<dyn MetadataCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Map a virtual path to a physical location.
    pub async fn resolve(&self, path: &str) -> Result<VirtualPath> {
        match VirtualPath::parse(path)? {
            VirtualPath::Fileset {
                catalog,
                schema,
                fileset,
                sub_path,
            } => {
                let metadata = self.catalog.as_ref().ok_or_else(|| StorageError::InvalidPath {
                    path: path.to_string(),
                    message: "fileset paths need a metadata catalog".into(),
                })?;

                let info = metadata.load_fileset(&catalog, &schema, &fileset).await?;
                let location = if sub_path.is_empty() {
                    info.storage_location.clone()
                } else {
                    format!("{}/{}", info.storage_location.trim_end_matches('/'), sub_path)
                };
                debug!(path = %path, location = %location, "Resolved fileset path");

                match VirtualPath::parse(&location)? {
                    VirtualPath::Fileset { .. } => Err(StorageError::InvalidPath {
                        path: location,
                        message: "fileset storage location points to another fileset".into(),
                    }
                    .into()),
                    physical => Ok(physical),
                }
            }
            physical => Ok(physical),
        }
    }

    /// Build a store for `bucket` with path-style addressing.
    fn s3_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        use object_store::aws::AmazonS3Builder;

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_virtual_hosted_style_request(false)
            .with_client_options(ClientOptions::new().with_timeout(self.timeout));

        if let Some(ref region) = self.credentials.region {
            builder = builder.with_region(region);
        }

        if let Some(ref access_key) = self.credentials.access_key_id {
            builder = builder.with_access_key_id(access_key);
        }

        if let Some(ref secret_key) = self.credentials.secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }

        if let Some(ref endpoint) = self.credentials.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::Build(e.to_string()))?;

        Ok(Arc::new(store))
    }

    async fn read_local(&self, path: &std::path::Path) -> Result<Bytes> {
        use object_store::local::LocalFileSystem;

        let display = path.display().to_string();
        let location = ObjectPath::from_filesystem_path(path).map_err(|e| StorageError::Read {
            path: display.clone(),
            message: e.to_string(),
        })?;

        let store = LocalFileSystem::new();
        read_object(&store, &location, &display).await
    }
}

async fn read_object(store: &dyn ObjectStore, location: &ObjectPath, display: &str) -> Result<Bytes> {
    let result = store.get(location).await.map_err(|e| StorageError::Read {
        path: display.to_string(),
        message: e.to_string(),
    })?;

    let bytes = result.bytes().await.map_err(|e| StorageError::Read {
        path: display.to_string(),
        message: e.to_string(),
    })?;

    Ok(bytes)
}

#[async_trait]
impl VirtualFileSystem for ObjectStoreFileSystem {
    async fn open(&self, path: &str) -> Result<Bytes> {
        let bytes = match self.resolve(path).await? {
            VirtualPath::S3 { bucket, key } => {
                let store = self.s3_store(&bucket)?;
                let display = format!("s3://{}/{}", bucket, key);
                read_object(store.as_ref(), &ObjectPath::from(key.as_str()), &display).await?
            }
            VirtualPath::Local(local) => self.read_local(&local).await?,
            VirtualPath::Fileset { .. } => {
                return Err(StorageError::InvalidPath {
                    path: path.to_string(),
                    message: "unresolved fileset path".into(),
                }
                .into())
            }
        };

        info!(path = %path, bytes = bytes.len(), "Opened virtual file");
        Ok(bytes)
    }
}
