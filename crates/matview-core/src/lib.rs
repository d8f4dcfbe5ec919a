//! Matview Core - catalog-bootstrapped materialized views over Kafka
//!
//! This library resolves broker endpoints from a metadata catalog, loads a
//! reference dataset from object storage and keeps continuously updated
//! key/latest-value tables over Kafka topics with:
//!
//! - Runtime discovery of infrastructure endpoints
//! - Schema-registry aware Avro decoding
//! - Local checkpoints and committed offsets for exactly-once visibility
//! - Single-trigger ordered shutdown

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod kafka;
pub mod metrics;
pub mod reference;
pub mod registry;
pub mod storage;
pub mod streams;

// Re-export commonly used types
pub use config::Config;
pub use error::{CatalogError, ErrorCategory, KafkaError, RegistryError, StorageError};
pub use error::{Error, Result};
