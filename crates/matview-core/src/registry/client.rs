//! Schema registry REST client (Apicurio v2 API).

use crate::config::SchemaRegistryConfig;
use crate::error::RegistryError;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

/// Response header carrying the global id of the returned artifact.
pub const GLOBAL_ID_HEADER: &str = "X-Registry-GlobalId";

/// A schema fetched by subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredSchema {
    /// Global id, when the registry reported one
    pub global_id: Option<i64>,
    /// Raw schema text
    pub schema: String,
}

/// Source of decoding schemas.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Fetch the schema registered under `global_id`.
    async fn schema_by_id(&self, global_id: i64) -> Result<String>;

    /// Fetch the latest schema registered for `subject`.
    async fn latest_schema(&self, subject: &str) -> Result<RegisteredSchema>;
}

/// HTTP client for an Apicurio registry.
pub struct ApicurioRegistryClient {
    client: Client,
    base_url: String,
}

impl ApicurioRegistryClient {
    /// Create a client for the configured registry.
    pub fn new(config: &SchemaRegistryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    /// Registry base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, url: String, missing: impl FnOnce() -> String) -> Result<reqwest::Response> {
        debug!(url = %url, "Registry request");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RegistryError::Request {
                url: url.clone(),
                message: e.to_string(),
            })?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(RegistryError::SchemaNotFound(missing()).into()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(RegistryError::Request {
                    url,
                    message: format!("{}: {}", status, body),
                }
                .into())
            }
        }
    }
}

async fn read_body(url: &str, response: reqwest::Response) -> Result<String> {
    response.text().await.map_err(|e| {
        RegistryError::Request {
            url: url.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

#[async_trait]
impl SchemaRegistry for ApicurioRegistryClient {
    async fn schema_by_id(&self, global_id: i64) -> Result<String> {
        let url = format!("{}/ids/globalIds/{}", self.base_url, global_id);
        let response = self
            .get(url.clone(), || format!("global id {}", global_id))
            .await?;
        read_body(&url, response).await
    }

    async fn latest_schema(&self, subject: &str) -> Result<RegisteredSchema> {
        let url = format!("{}/groups/default/artifacts/{}", self.base_url, subject);
        let response = self
            .get(url.clone(), || format!("subject {}", subject))
            .await?;

        let global_id = response
            .headers()
            .get(GLOBAL_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok());
        let schema = read_body(&url, response).await?;

        Ok(RegisteredSchema { global_id, schema })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeserializationErrorPolicy, IdHandler};

    fn config(url: &str) -> SchemaRegistryConfig {
        SchemaRegistryConfig {
            url: url.into(),
            find_latest: true,
            id_handler: IdHandler::Legacy4Byte,
            deserialization_error_policy: DeserializationErrorPolicy::Fail,
            request_timeout_seconds: 2,
        }
    }

    #[test]
    fn test_base_url_trimmed() {
        let client = ApicurioRegistryClient::new(&config("http://apicurio:8080/apis/registry/v2/"))
            .unwrap();
        assert_eq!(client.base_url(), "http://apicurio:8080/apis/registry/v2");
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_request_error() {
        let client = ApicurioRegistryClient::new(&config("http://127.0.0.1:9/apis/registry/v2"))
            .unwrap();
        let err = client.schema_by_id(1).await.unwrap_err();
        assert!(matches!(err, Error::Registry(RegistryError::Request { .. })));
    }
}
