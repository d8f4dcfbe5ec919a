//! Metadata catalog REST API types.
//!
//! Wire types for the Gravitino REST API. Only the read endpoints used at
//! bootstrap are modelled.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Media type requested on every call.
pub const ACCEPT_HEADER: &str = "application/vnd.gravitino.v1+json";

/// Metalake response (`GET /api/metalakes/{metalake}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetalakeResponse {
    /// Response code (0 on success)
    #[serde(default)]
    pub code: i32,
    /// Metalake body
    pub metalake: MetalakeDto,
}

/// Metalake body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetalakeDto {
    /// Metalake name
    pub name: String,
    /// Free-form comment
    #[serde(default)]
    pub comment: Option<String>,
    /// Metalake properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Catalog response (`GET .../catalogs/{catalog}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogResponse {
    /// Response code (0 on success)
    #[serde(default)]
    pub code: i32,
    /// Catalog body
    pub catalog: CatalogDto,
}

/// Catalog body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDto {
    /// Catalog name
    pub name: String,
    /// Catalog type (messaging, fileset, relational)
    #[serde(rename = "type", default)]
    pub catalog_type: Option<String>,
    /// Provider (kafka, hadoop)
    #[serde(default)]
    pub provider: Option<String>,
    /// Free-form comment
    #[serde(default)]
    pub comment: Option<String>,
    /// Catalog properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Topic response (`GET .../schemas/{namespace}/topics/{topic}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicResponse {
    /// Response code (0 on success)
    #[serde(default)]
    pub code: i32,
    /// Topic body
    pub topic: TopicDto,
}

/// Topic body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicDto {
    /// Topic name
    pub name: String,
    /// Free-form comment
    #[serde(default)]
    pub comment: Option<String>,
    /// Topic properties (`partitions`, `replication-factor`, ...)
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Fileset response (`GET .../schemas/{schema}/filesets/{fileset}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesetResponse {
    /// Response code (0 on success)
    #[serde(default)]
    pub code: i32,
    /// Fileset body
    pub fileset: FilesetDto,
}

/// Fileset body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesetDto {
    /// Fileset name
    pub name: String,
    /// Fileset type (managed, external)
    #[serde(rename = "type", default)]
    pub fileset_type: Option<String>,
    /// Backing storage location (e.g. s3a://bucket/path)
    #[serde(rename = "storageLocation")]
    pub storage_location: String,
    /// Fileset properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// Error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code
    pub code: i32,
    /// Exception type (e.g. NoSuchTopicException)
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error message
    #[serde(default)]
    pub message: String,
    /// Server-side stack (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<String>>,
}

impl ErrorResponse {
    /// Whether the server reported a missing object.
    pub fn is_not_found(&self) -> bool {
        self.error_type.starts_with("NoSuch") || self.error_type.contains("NotFound")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_response_deserialization() {
        let json = r#"{
            "code": 0,
            "catalog": {
                "name": "kafka_catalog",
                "type": "messaging",
                "provider": "kafka",
                "comment": "cluster",
                "properties": {"bootstrap.servers": "kafka:9092"}
            }
        }"#;

        let response: CatalogResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.catalog.name, "kafka_catalog");
        assert_eq!(response.catalog.catalog_type.as_deref(), Some("messaging"));
        assert_eq!(
            response.catalog.properties.get("bootstrap.servers").map(String::as_str),
            Some("kafka:9092")
        );
    }

    #[test]
    fn test_topic_response_without_properties() {
        let json = r#"{"code": 0, "topic": {"name": "sales"}}"#;
        let response: TopicResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.topic.name, "sales");
        assert!(response.topic.properties.is_empty());
    }

    #[test]
    fn test_fileset_response_deserialization() {
        let json = r#"{
            "code": 0,
            "fileset": {
                "name": "products",
                "type": "external",
                "storageLocation": "s3a://inventory/products"
            }
        }"#;
        let response: FilesetResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.fileset.storage_location, "s3a://inventory/products");
    }

    #[test]
    fn test_error_response() {
        let json = r#"{
            "code": 1003,
            "type": "NoSuchTopicException",
            "message": "Topic default.sales does not exist"
        }"#;
        let error: ErrorResponse = serde_json::from_str(json).unwrap();
        assert_eq!(error.code, 1003);
        assert!(error.is_not_found());
    }
}
