//! REST client for the Gravitino metadata service.

use super::rest_api::{self, ErrorResponse, ACCEPT_HEADER};
use super::{CatalogInfo, FilesetInfo, MetadataCatalog, TopicInfo};
use crate::config::CatalogConfig;
use crate::error::CatalogError;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Session against a single metalake.
pub struct GravitinoClient {
    client: Client,
    base_uri: String,
    metalake: String,
    closed: AtomicBool,
}

impl GravitinoClient {
    /// Open a session.
    ///
    /// Verifies the metalake exists; any failure here means the process has
    /// no way to discover its brokers.
    pub async fn connect(config: &CatalogConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let session = Self {
            client,
            base_uri: config.uri.trim_end_matches('/').to_string(),
            metalake: config.metalake.clone(),
            closed: AtomicBool::new(false),
        };

        let path = session.metalake_path();
        let response = session
            .client
            .get(session.url(&path))
            .header("Accept", ACCEPT_HEADER)
            .send()
            .await
            .map_err(|e| CatalogError::SessionOpen {
                uri: config.uri.clone(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::SessionOpen {
                uri: config.uri.clone(),
                message: describe_error(status, &body),
            }
            .into());
        }

        let metalake: rest_api::MetalakeResponse = response.json().await.map_err(|e| {
            CatalogError::SessionOpen {
                uri: config.uri.clone(),
                message: format!("invalid metalake response: {}", e),
            }
        })?;

        info!(
            uri = %session.base_uri,
            metalake = %metalake.metalake.name,
            "Catalog session opened"
        );
        Ok(session)
    }

    /// Metalake this session is scoped to.
    pub fn metalake(&self) -> &str {
        &self.metalake
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn metalake_path(&self) -> String {
        format!("/api/metalakes/{}", self.metalake)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_uri, path)
    }

    /// GET `path` and decode the body, mapping 404 to `Ok(None)`.
    async fn get_json<T>(&self, path: &str) -> Result<Option<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        if self.is_closed() {
            return Err(CatalogError::SessionClosed.into());
        }

        debug!(path = %path, "Catalog request");
        let response = self
            .client
            .get(self.url(path))
            .header("Accept", ACCEPT_HEADER)
            .send()
            .await
            .map_err(|e| CatalogError::Request {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            let body = response.json::<T>().await.map_err(|e| CatalogError::Request {
                path: path.to_string(),
                message: format!("invalid response body: {}", e),
            })?;
            return Ok(Some(body));
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if let Ok(error) = serde_json::from_str::<ErrorResponse>(&body) {
            if error.is_not_found() {
                return Ok(None);
            }
        }

        Err(CatalogError::Request {
            path: path.to_string(),
            message: describe_error(status, &body),
        }
        .into())
    }
}

/// Render an error body, preferring the structured message.
fn describe_error(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(error) => format!("{} {}: {}", status, error.error_type, error.message),
        Err(_) => format!("{}: {}", status, body),
    }
}

#[async_trait]
impl MetadataCatalog for GravitinoClient {
    async fn load_catalog(&self, name: &str) -> Result<CatalogInfo> {
        let path = format!("{}/catalogs/{}", self.metalake_path(), name);
        let response: rest_api::CatalogResponse =
            self.get_json(&path).await?.ok_or_else(|| CatalogError::NotFound {
                kind: "Catalog".into(),
                name: name.to_string(),
            })?;

        Ok(CatalogInfo {
            name: response.catalog.name,
            properties: response.catalog.properties,
        })
    }

    async fn load_topic(
        &self,
        catalog: &str,
        namespace: &str,
        topic: &str,
    ) -> Result<Option<TopicInfo>> {
        let path = format!(
            "{}/catalogs/{}/schemas/{}/topics/{}",
            self.metalake_path(),
            catalog,
            namespace,
            topic
        );
        let response: Option<rest_api::TopicResponse> = self.get_json(&path).await?;

        Ok(response.map(|r| TopicInfo {
            name: r.topic.name,
            properties: r.topic.properties,
        }))
    }

    async fn load_fileset(
        &self,
        catalog: &str,
        schema: &str,
        fileset: &str,
    ) -> Result<FilesetInfo> {
        let path = format!(
            "{}/catalogs/{}/schemas/{}/filesets/{}",
            self.metalake_path(),
            catalog,
            schema,
            fileset
        );
        let response: rest_api::FilesetResponse =
            self.get_json(&path).await?.ok_or_else(|| CatalogError::NotFound {
                kind: "Fileset".into(),
                name: format!("{}.{}.{}", catalog, schema, fileset),
            })?;

        Ok(FilesetInfo {
            name: response.fileset.name,
            storage_location: response.fileset.storage_location,
            properties: response.fileset.properties,
        })
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Catalog session already closed");
            return Ok(());
        }
        info!(metalake = %self.metalake, "Catalog session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> CatalogConfig {
        CatalogConfig {
            // Port 9 (discard) is not expected to run an HTTP server.
            uri: "http://127.0.0.1:9".into(),
            metalake: "metalake_demo".into(),
            messaging_catalog: "kafka_catalog".into(),
            topic_namespace: "default".into(),
            request_timeout_seconds: 2,
        }
    }

    #[tokio::test]
    async fn test_connect_failure_is_session_error() {
        let err = GravitinoClient::connect(&unreachable_config())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Catalog(CatalogError::SessionOpen { .. })
        ));
        assert_eq!(err.category(), crate::error::ErrorCategory::FatalIo);
    }

    #[test]
    fn test_describe_error_prefers_structured_body() {
        let body = r#"{"code":1003,"type":"NoSuchCatalogException","message":"missing"}"#;
        let text = describe_error(StatusCode::NOT_FOUND, body);
        assert!(text.contains("NoSuchCatalogException"));
        assert!(text.contains("missing"));

        let text = describe_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(text.contains("502"));
        assert!(text.contains("upstream down"));
    }
}
