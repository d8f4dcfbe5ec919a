//! Error types for matview core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for matview operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for matview.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metadata catalog error
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Kafka-related error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Schema registry error
    #[error("Schema registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Object storage / virtual filesystem error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Reference dataset could not be parsed as a whole
    #[error("Reference data error: {0}")]
    ReferenceData(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An external call did not answer in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

/// Coarse failure classes used when reporting fatal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or malformed configuration, discovered before processing starts
    FatalConfiguration,
    /// An external collaborator could not be reached or read
    FatalIo,
    /// Failure after the pipeline started running
    RuntimeFatal,
}

impl ErrorCategory {
    /// Label used in structured log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::FatalConfiguration => "fatal_configuration",
            ErrorCategory::FatalIo => "fatal_io",
            ErrorCategory::RuntimeFatal => "runtime_fatal",
        }
    }
}

impl Error {
    /// Classify this error for logging.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) => ErrorCategory::FatalConfiguration,
            Error::Catalog(CatalogError::MissingProperty { .. }) => {
                ErrorCategory::FatalConfiguration
            }
            Error::Catalog(_)
            | Error::Storage(_)
            | Error::ReferenceData(_)
            | Error::Io(_)
            | Error::Timeout(_) => ErrorCategory::FatalIo,
            Error::Kafka(_)
            | Error::Registry(_)
            | Error::Serialization(_)
            | Error::Shutdown => ErrorCategory::RuntimeFatal,
        }
    }
}

/// Metadata catalog errors.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Could not open a session against the catalog server
    #[error("Failed to open catalog session at {uri}: {message}")]
    SessionOpen { uri: String, message: String },

    /// Catalog request failed
    #[error("Request to {path} failed: {message}")]
    Request { path: String, message: String },

    /// Named object does not exist in the catalog
    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    /// A required property was absent or empty
    #[error("Property '{property}' not found in catalog '{catalog}' properties")]
    MissingProperty { catalog: String, property: String },

    /// Session was already closed
    #[error("Catalog session closed")]
    SessionClosed,
}

/// Kafka-specific errors.
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Failed to create a client against the brokers
    #[error("Connection failed to {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Topic metadata could not be fetched
    #[error("Metadata fetch failed for topic {topic}: {message}")]
    Metadata { topic: String, message: String },

    /// Partition assignment error
    #[error("Partition assignment error: {0}")]
    PartitionAssignment(String),

    /// Offset commit failed
    #[error("Offset commit failed: {0}")]
    OffsetCommit(String),

    /// Error surfaced while consuming
    #[error("Consume error on {topic}: {message}")]
    Consume { topic: String, message: String },

    /// Runtime used in the wrong lifecycle state
    #[error("Invalid runtime state: {0}")]
    InvalidState(String),
}

/// Schema registry errors.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Registry request failed
    #[error("Registry request to {url} failed: {message}")]
    Request { url: String, message: String },

    /// Schema lookup returned nothing
    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    /// Schema text could not be parsed
    #[error("Invalid schema {id}: {message}")]
    InvalidSchema { id: String, message: String },

    /// Payload could not be decoded
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

/// Object storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Virtual path is malformed or uses an unsupported scheme
    #[error("Invalid path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    /// Store could not be constructed
    #[error("Failed to build object store: {0}")]
    Build(String),

    /// Object could not be read
    #[error("Failed to read {path}: {message}")]
    Read { path: String, message: String },
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(err.to_string())
    }
}
