//! Configuration structures for matview.
//!
//! Configuration is loaded from TOML files, then overridden by environment
//! variables, then by CLI flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Metadata catalog configuration
    pub catalog: CatalogConfig,

    /// Reference dataset location
    pub reference_data: ReferenceDataConfig,

    /// Object storage credentials used by the virtual filesystem
    #[serde(default)]
    pub storage: StorageConfig,

    /// Kafka / table runtime configuration
    pub kafka: KafkaConfig,

    /// Schema registry configuration
    pub schema_registry: SchemaRegistryConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Metadata catalog configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Catalog server URI
    pub uri: String,

    /// Metalake (metadata domain) name
    pub metalake: String,

    /// Messaging catalog holding the broker endpoints
    pub messaging_catalog: String,

    /// Namespace under which topics are registered
    #[serde(default = "default_topic_namespace")]
    pub topic_namespace: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl CatalogConfig {
    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Reference dataset configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReferenceDataConfig {
    /// Explicit virtual path (gvfs://, s3://, s3a://, file:// or local)
    #[serde(default)]
    pub path: Option<String>,

    /// Fileset catalog name
    #[serde(default)]
    pub fileset_catalog: Option<String>,

    /// Fileset schema name
    #[serde(default)]
    pub fileset_schema: Option<String>,

    /// Fileset name
    #[serde(default)]
    pub fileset_name: Option<String>,

    /// File inside the fileset (used when `path` is not set)
    #[serde(default = "default_reference_file_name")]
    pub file_name: String,
}

impl ReferenceDataConfig {
    /// Resolve the virtual path of the reference dataset.
    ///
    /// An explicit `path` wins; otherwise the path is derived from the
    /// fileset catalog, schema and name.
    pub fn resolved_path(&self) -> crate::Result<String> {
        if let Some(path) = self.path.as_deref().filter(|p| !p.trim().is_empty()) {
            return Ok(path.trim().to_string());
        }

        match (
            self.fileset_catalog.as_deref(),
            self.fileset_schema.as_deref(),
            self.fileset_name.as_deref(),
        ) {
            (Some(catalog), Some(schema), Some(fileset))
                if !catalog.is_empty() && !schema.is_empty() && !fileset.is_empty() =>
            {
                Ok(format!(
                    "gvfs://fileset/{}/{}/{}/{}",
                    catalog,
                    schema,
                    fileset,
                    self.file_name.trim_start_matches('/')
                ))
            }
            _ => Err(crate::Error::Config(
                "Reference data path required (set reference_data.path or the fileset catalog, schema and name)"
                    .into(),
            )),
        }
    }
}

/// Object storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// S3-compatible endpoint (MinIO or similar)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Access key ID
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Secret access key
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Region reported to the store
    #[serde(default = "default_region")]
    pub region: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            region: default_region(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl StorageConfig {
    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Kafka and table runtime configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Clickstream topic name
    pub clickstream_topic: String,

    /// Sales topic name
    pub sales_topic: String,

    /// Application identity (consumer group and state directory name)
    pub application_id: String,

    /// Auto offset reset strategy
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,

    /// Commit interval in milliseconds
    #[serde(default = "default_commit_interval_ms")]
    pub commit_interval_ms: u64,

    /// Processing guarantee
    #[serde(default)]
    pub processing_guarantee: ProcessingGuarantee,

    /// Local state directory root
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Wipe local state for this application before starting
    #[serde(default = "default_clean_up_on_start")]
    pub clean_up_on_start: bool,

    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,

    /// Metadata fetch timeout in milliseconds
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,

    /// Security configuration
    #[serde(default)]
    pub security: KafkaSecurityConfig,
}

impl KafkaConfig {
    /// Commit interval as a duration.
    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }
}

/// Kafka auto offset reset strategy.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// Start from earliest offset
    #[default]
    Earliest,
    /// Start from latest offset
    Latest,
}

impl OffsetReset {
    /// Value understood by librdkafka.
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

impl std::str::FromStr for OffsetReset {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(OffsetReset::Earliest),
            "latest" => Ok(OffsetReset::Latest),
            other => Err(crate::Error::Config(format!(
                "Unknown offset reset policy: {}",
                other
            ))),
        }
    }
}

/// Processing guarantee.
///
/// Exactly-once is the only level the runtime implements; any other value
/// fails deserialization.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingGuarantee {
    /// Read-committed consumption, deduplicated apply, atomic checkpoints
    #[default]
    ExactlyOnceV2,
}

/// Kafka security configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KafkaSecurityConfig {
    /// Security protocol (PLAINTEXT, SSL, SASL_SSL, SASL_PLAINTEXT)
    pub protocol: Option<String>,

    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512)
    pub sasl_mechanism: Option<String>,

    /// SASL username
    pub sasl_username: Option<String>,

    /// SASL password
    pub sasl_password: Option<String>,

    /// SSL CA certificate location
    pub ssl_ca_location: Option<PathBuf>,
}

/// Schema registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemaRegistryConfig {
    /// Registry base URL (e.g. http://localhost:8080/apis/registry/v2)
    pub url: String,

    /// Fall back to the latest schema of the subject when no id is embedded
    #[serde(default = "default_find_latest")]
    pub find_latest: bool,

    /// How the embedded schema id is encoded
    #[serde(default)]
    pub id_handler: IdHandler,

    /// What to do with a record that cannot be decoded
    #[serde(default)]
    pub deserialization_error_policy: DeserializationErrorPolicy,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl SchemaRegistryConfig {
    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Encoding of the schema id that follows the magic byte.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdHandler {
    /// 4-byte big-endian global id (Confluent-compatible producers)
    #[default]
    Legacy4Byte,
    /// 8-byte big-endian global id (registry-native)
    Default,
}

impl IdHandler {
    /// Number of bytes the id occupies on the wire.
    pub fn id_size(&self) -> usize {
        match self {
            IdHandler::Legacy4Byte => 4,
            IdHandler::Default => 8,
        }
    }
}

/// Policy for records whose value cannot be decoded.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeserializationErrorPolicy {
    /// Stop the runtime (default)
    #[default]
    Fail,
    /// Skip the record with a warning
    LogAndContinue,
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Metrics HTTP port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Health check HTTP port
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            health_port: default_health_port(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_topic_namespace() -> String {
    "default".to_string()
}
fn default_request_timeout_seconds() -> u64 {
    30
}
fn default_reference_file_name() -> String {
    "products.csv".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_commit_interval_ms() -> u64 {
    5000
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("/tmp/matview-state")
}
fn default_clean_up_on_start() -> bool {
    true
}
fn default_session_timeout_ms() -> u32 {
    30000
}
fn default_metadata_timeout_ms() -> u64 {
    10000
}
fn default_find_latest() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_health_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from a TOML file and apply environment overrides.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> crate::Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// A variable that is set always wins over the file value.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> crate::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GRAVITINO_SERVER_URI") {
            self.catalog.uri = v;
        }
        if let Some(v) = lookup("GRAVITINO_METALAKE") {
            self.catalog.metalake = v;
        }
        if let Some(v) = lookup("GRAVITINO_MESSAGING_CATALOG") {
            self.catalog.messaging_catalog = v;
        }
        if let Some(v) = lookup("GRAVITINO_FILESET_CATALOG") {
            self.reference_data.fileset_catalog = Some(v);
        }
        if let Some(v) = lookup("GRAVITINO_FILESET_SCHEMA") {
            self.reference_data.fileset_schema = Some(v);
        }
        if let Some(v) = lookup("GRAVITINO_FILESET_NAME") {
            self.reference_data.fileset_name = Some(v);
        }
        if let Some(v) = lookup("PRODUCT_CSV_PATH") {
            self.reference_data.path = Some(v);
        }
        if let Some(v) = lookup("S3_ENDPOINT") {
            self.storage.endpoint = Some(v);
        }
        if let Some(v) = lookup("S3_ACCESS_KEY") {
            self.storage.access_key_id = Some(v);
        }
        if let Some(v) = lookup("S3_SECRET_KEY") {
            self.storage.secret_access_key = Some(v);
        }
        if let Some(v) = lookup("S3_REGION") {
            self.storage.region = v;
        }
        if let Some(v) = lookup("CLICKSTREAM_TOPIC") {
            self.kafka.clickstream_topic = v;
        }
        if let Some(v) = lookup("SALES_TOPIC") {
            self.kafka.sales_topic = v;
        }
        if let Some(v) = lookup("KAFKA_APPLICATION_ID") {
            self.kafka.application_id = v;
        }
        if let Some(v) = lookup("KAFKA_AUTO_OFFSET_RESET") {
            self.kafka.auto_offset_reset = v.parse()?;
        }
        if let Some(v) = lookup("KAFKA_COMMIT_INTERVAL_MS") {
            self.kafka.commit_interval_ms = v.trim().parse().map_err(|_| {
                crate::Error::Config(format!("KAFKA_COMMIT_INTERVAL_MS is not a number: {}", v))
            })?;
        }
        if let Some(v) = lookup("KAFKA_STATE_DIR") {
            self.kafka.state_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("APICURIO_REGISTRY_URL") {
            self.schema_registry.url = v;
        }
        if let Some(v) = lookup("APICURIO_FIND_LATEST") {
            self.schema_registry.find_latest = v.trim().parse().map_err(|_| {
                crate::Error::Config(format!("APICURIO_FIND_LATEST is not a boolean: {}", v))
            })?;
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.catalog.uri.trim().is_empty() {
            return Err(crate::Error::Config("Catalog URI is required".into()));
        }

        if self.catalog.metalake.trim().is_empty() {
            return Err(crate::Error::Config("Catalog metalake is required".into()));
        }

        if self.catalog.messaging_catalog.trim().is_empty() {
            return Err(crate::Error::Config(
                "Messaging catalog name is required".into(),
            ));
        }

        if self.kafka.clickstream_topic.trim().is_empty() {
            return Err(crate::Error::Config("Clickstream topic is required".into()));
        }

        if self.kafka.sales_topic.trim().is_empty() {
            return Err(crate::Error::Config("Sales topic is required".into()));
        }

        if self.kafka.application_id.trim().is_empty() {
            return Err(crate::Error::Config("Application id is required".into()));
        }

        if self.kafka.commit_interval_ms == 0 {
            return Err(crate::Error::Config(
                "Commit interval must be greater than zero".into(),
            ));
        }

        if self.schema_registry.url.trim().is_empty() {
            return Err(crate::Error::Config(
                "Schema registry URL is required".into(),
            ));
        }

        if self.kafka.clickstream_topic.trim() == self.kafka.sales_topic.trim() {
            return Err(crate::Error::Config(format!(
                "Clickstream and sales topics must differ, both are '{}'",
                self.kafka.sales_topic
            )));
        }

        self.reference_data.resolved_path()?;

        Ok(())
    }

    /// The two source topics in table order.
    pub fn topics(&self) -> Vec<String> {
        vec![
            self.kafka.clickstream_topic.clone(),
            self.kafka.sales_topic.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
[catalog]
uri = "http://localhost:8090"
metalake = "metalake_demo"
messaging_catalog = "kafka_catalog"

[reference_data]
fileset_catalog = "fileset_catalog"
fileset_schema = "inventory"
fileset_name = "products"

[storage]
endpoint = "http://localhost:9000"
access_key_id = "minio"
secret_access_key = "minio123"

[kafka]
clickstream_topic = "clickstream"
sales_topic = "sales"
application_id = "product-recommendation"

[schema_registry]
url = "http://localhost:8081/apis/registry/v2"
"#;

    fn sample_config() -> Config {
        toml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_sample_config_defaults() {
        let config = sample_config();
        assert_eq!(config.catalog.topic_namespace, "default");
        assert_eq!(config.catalog.request_timeout_seconds, 30);
        assert_eq!(config.kafka.auto_offset_reset, OffsetReset::Earliest);
        assert_eq!(config.kafka.commit_interval_ms, 5000);
        assert_eq!(
            config.kafka.processing_guarantee,
            ProcessingGuarantee::ExactlyOnceV2
        );
        assert!(config.kafka.clean_up_on_start);
        assert!(config.schema_registry.find_latest);
        assert_eq!(config.schema_registry.id_handler, IdHandler::Legacy4Byte);
        assert_eq!(
            config.schema_registry.deserialization_error_policy,
            DeserializationErrorPolicy::Fail
        );
        assert_eq!(config.storage.region, "us-east-1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reference_path_from_fileset() {
        let config = sample_config();
        assert_eq!(
            config.reference_data.resolved_path().unwrap(),
            "gvfs://fileset/fileset_catalog/inventory/products/products.csv"
        );
    }

    #[test]
    fn test_explicit_reference_path_wins() {
        let mut config = sample_config();
        config.reference_data.path = Some("s3a://bucket/products.csv".into());
        assert_eq!(
            config.reference_data.resolved_path().unwrap(),
            "s3a://bucket/products.csv"
        );
    }

    #[test]
    fn test_reference_path_missing() {
        let config = ReferenceDataConfig::default();
        let err = config.resolved_path().unwrap_err();
        assert!(err.to_string().contains("Reference data path"));
    }

    #[test]
    fn test_config_validation_missing_registry_url() {
        let mut config = sample_config();
        config.schema_registry.url = "".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Schema registry URL"));
    }

    #[test]
    fn test_config_validation_missing_topic() {
        let mut config = sample_config();
        config.kafka.sales_topic = " ".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Sales topic"));
    }

    #[test]
    fn test_config_validation_identical_topics() {
        let mut config = sample_config();
        config.kafka.sales_topic = "clickstream".into();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn test_config_validation_zero_commit_interval() {
        let mut config = sample_config();
        config.kafka.commit_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = sample_config();
        let env: HashMap<&str, &str> = HashMap::from([
            ("GRAVITINO_SERVER_URI", "http://gravitino:8090"),
            ("APICURIO_REGISTRY_URL", "http://apicurio:8080/apis/registry/v2"),
            ("S3_ACCESS_KEY", "override-key"),
            ("S3_SECRET_KEY", "override-secret"),
            ("CLICKSTREAM_TOPIC", "clicks-v2"),
            ("SALES_TOPIC", "sales-v2"),
            ("KAFKA_AUTO_OFFSET_RESET", "latest"),
            ("KAFKA_COMMIT_INTERVAL_MS", "1000"),
            ("APICURIO_FIND_LATEST", "false"),
        ]);

        config
            .apply_overrides_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.catalog.uri, "http://gravitino:8090");
        assert_eq!(
            config.schema_registry.url,
            "http://apicurio:8080/apis/registry/v2"
        );
        assert_eq!(config.storage.access_key_id.as_deref(), Some("override-key"));
        assert_eq!(
            config.storage.secret_access_key.as_deref(),
            Some("override-secret")
        );
        assert_eq!(config.topics(), vec!["clicks-v2", "sales-v2"]);
        assert_eq!(config.kafka.auto_offset_reset, OffsetReset::Latest);
        assert_eq!(config.kafka.commit_interval_ms, 1000);
        assert!(!config.schema_registry.find_latest);
    }

    #[test]
    fn test_env_overrides_absent_keep_file_values() {
        let mut config = sample_config();
        config.apply_overrides_from(|_| None).unwrap();
        assert_eq!(config.catalog.uri, "http://localhost:8090");
        assert_eq!(config.kafka.clickstream_topic, "clickstream");
    }

    #[test]
    fn test_env_override_malformed_values() {
        let mut config = sample_config();
        let err = config
            .apply_overrides_from(|k| {
                (k == "KAFKA_COMMIT_INTERVAL_MS").then(|| "soon".to_string())
            })
            .unwrap_err();
        assert!(err.to_string().contains("KAFKA_COMMIT_INTERVAL_MS"));

        let err = config
            .apply_overrides_from(|k| (k == "KAFKA_AUTO_OFFSET_RESET").then(|| "middle".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("offset reset"));
    }

    #[test]
    fn test_unsupported_processing_guarantee_rejected() {
        let content = SAMPLE.replace(
            "application_id = \"product-recommendation\"",
            "application_id = \"product-recommendation\"\nprocessing_guarantee = \"at_least_once\"",
        );
        assert!(toml::from_str::<Config>(&content).is_err());
    }

    #[test]
    fn test_id_handler_sizes() {
        assert_eq!(IdHandler::Legacy4Byte.id_size(), 4);
        assert_eq!(IdHandler::Default.id_size(), 8);
    }

    #[test]
    fn test_default_monitoring_config() {
        let config = MonitoringConfig::default();
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.health_port, 8080);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_level.as_directive(), "info");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.kafka.application_id, "product-recommendation");
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config =
            toml::from_str(include_str!("../../../config/matview.toml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.reference_data.resolved_path().unwrap(),
            "gvfs://fileset/fileset_catalog/inventory/products/products.csv"
        );
        assert_eq!(config.monitoring.log_format, LogFormat::Json);
    }
}
