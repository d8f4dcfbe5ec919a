//! Materialization builder: runtime configuration and table topology.

use super::state::StateDirectory;
use super::topology::{LoggingObserver, RecordObserver, Topology};
use crate::catalog::ResolvedClusterConfig;
use crate::config::{
    Config, DeserializationErrorPolicy, IdHandler, KafkaSecurityConfig, OffsetReset,
    ProcessingGuarantee,
};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How record keys are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDecoding {
    /// UTF-8 text
    Utf8,
}

/// How record values are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDecoding {
    /// Avro resolved through the schema registry
    RegistryAvro,
}

/// Tunables of the table runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Application identity (consumer group, state directory)
    pub application_id: String,
    /// Broker endpoints discovered from the catalog
    pub bootstrap_servers: String,
    /// Key decoding
    pub key_decoding: KeyDecoding,
    /// Value decoding
    pub value_decoding: ValueDecoding,
    /// Schema registry URL
    pub schema_registry_url: String,
    /// Use the latest subject schema when no id is embedded
    pub find_latest: bool,
    /// Encoding of the embedded schema id
    pub id_handler: IdHandler,
    /// What to do with undecodable records
    pub deserialization_error_policy: DeserializationErrorPolicy,
    /// Start position when no local checkpoint exists
    pub auto_offset_reset: OffsetReset,
    /// Interval between checkpoint + offset commits
    pub commit_interval: Duration,
    /// Processing guarantee
    pub processing_guarantee: ProcessingGuarantee,
    /// Root of the local state directories
    pub state_dir: PathBuf,
    /// Wipe local state before starting
    pub clean_up_on_start: bool,
    /// Consumer session timeout
    pub session_timeout_ms: u32,
    /// Metadata fetch timeout
    pub metadata_timeout: Duration,
    /// Broker security settings
    pub security: KafkaSecurityConfig,
}

impl RuntimeConfig {
    /// Consumer properties derived from this configuration.
    pub fn client_properties(&self) -> BTreeMap<String, String> {
        let mut props = BTreeMap::new();
        let mut set = |k: &str, v: String| {
            props.insert(k.to_string(), v);
        };

        set("bootstrap.servers", self.bootstrap_servers.clone());
        set("group.id", self.application_id.clone());
        set("client.id", format!("{}-consumer", self.application_id));
        // Offsets are committed only after the checkpoint is durable
        set("enable.auto.commit", "false".into());
        set("enable.auto.offset.store", "false".into());
        set("auto.offset.reset", self.auto_offset_reset.as_str().into());
        set("session.timeout.ms", self.session_timeout_ms.to_string());
        set("enable.partition.eof", "false".into());

        match self.processing_guarantee {
            ProcessingGuarantee::ExactlyOnceV2 => {
                set("isolation.level", "read_committed".into());
            }
        }

        if let Some(ref protocol) = self.security.protocol {
            set("security.protocol", protocol.clone());
        }
        if let Some(ref mechanism) = self.security.sasl_mechanism {
            set("sasl.mechanism", mechanism.clone());
        }
        if let Some(ref username) = self.security.sasl_username {
            set("sasl.username", username.clone());
        }
        if let Some(ref password) = self.security.sasl_password {
            set("sasl.password", password.clone());
        }
        if let Some(ref path) = self.security.ssl_ca_location {
            set("ssl.ca.location", path.to_string_lossy().into_owned());
        }

        props
    }

    /// Local state directory of this application.
    pub fn state_directory(&self) -> StateDirectory {
        StateDirectory::new(&self.state_dir, &self.application_id)
    }
}

/// Builds the runtime configuration and the two-table topology.
pub struct MaterializationBuilder<'a> {
    config: &'a Config,
    bootstrap_servers: String,
    observer: Arc<dyn RecordObserver>,
}

impl<'a> MaterializationBuilder<'a> {
    /// Create a builder for the resolved cluster.
    pub fn new(config: &'a Config, cluster: &ResolvedClusterConfig) -> Self {
        Self {
            config,
            bootstrap_servers: cluster.bootstrap_servers.clone(),
            observer: Arc::new(LoggingObserver),
        }
    }

    /// Replace the default logging observer.
    pub fn with_observer(mut self, observer: Arc<dyn RecordObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Assemble the runtime configuration.
    pub fn build_config(&self) -> Result<RuntimeConfig> {
        let kafka = &self.config.kafka;
        let registry = &self.config.schema_registry;

        if self.bootstrap_servers.trim().is_empty() {
            return Err(Error::Config("Broker endpoints are required".into()));
        }
        if registry.url.trim().is_empty() {
            return Err(Error::Config("Schema registry URL is required".into()));
        }
        if kafka.application_id.trim().is_empty() {
            return Err(Error::Config("Application id is required".into()));
        }

        Ok(RuntimeConfig {
            application_id: kafka.application_id.clone(),
            bootstrap_servers: self.bootstrap_servers.clone(),
            key_decoding: KeyDecoding::Utf8,
            value_decoding: ValueDecoding::RegistryAvro,
            schema_registry_url: registry.url.clone(),
            find_latest: registry.find_latest,
            id_handler: registry.id_handler,
            deserialization_error_policy: registry.deserialization_error_policy,
            auto_offset_reset: kafka.auto_offset_reset,
            commit_interval: kafka.commit_interval(),
            processing_guarantee: kafka.processing_guarantee,
            state_dir: kafka.state_dir.clone(),
            clean_up_on_start: kafka.clean_up_on_start,
            session_timeout_ms: kafka.session_timeout_ms,
            metadata_timeout: Duration::from_millis(kafka.metadata_timeout_ms),
            security: kafka.security.clone(),
        })
    }

    /// Build the clickstream and sales tables.
    pub fn build_topology(&self) -> Result<Topology> {
        let kafka = &self.config.kafka;
        let topics = [
            ("clickstream", kafka.clickstream_topic.as_str()),
            ("sales", kafka.sales_topic.as_str()),
        ];

        for (role, topic) in topics {
            if topic.trim().is_empty() {
                return Err(Error::Config(format!("{} topic is required", role)));
            }
        }

        let mut topology = Topology::new(self.observer.clone());
        for (role, topic) in topics {
            topology.add_table(topic);
            info!(role, topic = %topic, "Table registered");
        }

        info!(description = %topology.describe(), "Topology built");
        Ok(topology)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TopicValidationResult;

    fn config() -> Config {
        toml::from_str(
            r#"
[catalog]
uri = "http://localhost:8090"
metalake = "metalake_demo"
messaging_catalog = "kafka_catalog"

[reference_data]
path = "products.csv"

[kafka]
clickstream_topic = "clickstream"
sales_topic = "sales"
application_id = "product-recommendation"

[schema_registry]
url = "http://localhost:8081/apis/registry/v2"
"#,
        )
        .unwrap()
    }

    fn cluster() -> ResolvedClusterConfig {
        ResolvedClusterConfig {
            bootstrap_servers: "kafka:9092".into(),
            validated: false,
            topics: vec![TopicValidationResult {
                topic_name: "sales".into(),
                exists: false,
                partition_hint: None,
            }],
        }
    }

    #[test]
    fn test_build_config_defaults() {
        let config = config();
        let runtime = MaterializationBuilder::new(&config, &cluster())
            .build_config()
            .unwrap();

        assert_eq!(runtime.application_id, "product-recommendation");
        assert_eq!(runtime.bootstrap_servers, "kafka:9092");
        assert_eq!(runtime.key_decoding, KeyDecoding::Utf8);
        assert_eq!(runtime.value_decoding, ValueDecoding::RegistryAvro);
        assert!(runtime.find_latest);
        assert_eq!(runtime.id_handler, IdHandler::Legacy4Byte);
        assert_eq!(runtime.auto_offset_reset, OffsetReset::Earliest);
        assert_eq!(runtime.commit_interval, Duration::from_millis(5000));
        assert_eq!(runtime.processing_guarantee, ProcessingGuarantee::ExactlyOnceV2);
    }

    #[test]
    fn test_client_properties() {
        let config = config();
        let runtime = MaterializationBuilder::new(&config, &cluster())
            .build_config()
            .unwrap();
        let props = runtime.client_properties();

        assert_eq!(props["bootstrap.servers"], "kafka:9092");
        assert_eq!(props["group.id"], "product-recommendation");
        assert_eq!(props["isolation.level"], "read_committed");
        assert_eq!(props["enable.auto.commit"], "false");
        assert_eq!(props["auto.offset.reset"], "earliest");
        assert!(!props.contains_key("security.protocol"));
    }

    #[test]
    fn test_missing_registry_url_is_fatal() {
        let mut config = config();
        config.schema_registry.url = String::new();
        let err = MaterializationBuilder::new(&config, &cluster())
            .build_config()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_bootstrap_servers_is_fatal() {
        let config = config();
        let mut cluster = cluster();
        cluster.bootstrap_servers = " ".into();
        assert!(MaterializationBuilder::new(&config, &cluster)
            .build_config()
            .is_err());
    }

    #[test]
    fn test_build_topology_uses_configured_topics() {
        // The sales topic is unknown to the catalog; it is still built.
        let config = config();
        let topology = MaterializationBuilder::new(&config, &cluster())
            .build_topology()
            .unwrap();

        let topics: Vec<_> = topology.sources().iter().map(|s| s.topic.as_str()).collect();
        assert_eq!(topics, vec!["clickstream", "sales"]);
    }

    #[test]
    fn test_missing_topic_is_fatal() {
        let mut config = config();
        config.kafka.clickstream_topic = String::new();
        let err = MaterializationBuilder::new(&config, &cluster())
            .build_topology()
            .err()
            .unwrap();
        assert!(err.to_string().contains("clickstream topic"));
    }
}
