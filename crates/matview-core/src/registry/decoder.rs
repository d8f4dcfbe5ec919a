//! Registry-aware Avro value decoding.
//!
//! Wire format: `[0x00][global id, 4 or 8 bytes big-endian][avro datum]`.
//! Payloads without the header are decoded with the subject's latest schema
//! when find-latest is enabled.

use super::client::SchemaRegistry;
use crate::config::{IdHandler, SchemaRegistryConfig};
use crate::error::RegistryError;
use crate::Result;
use apache_avro::types::Value;
use apache_avro::Schema;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Leading byte of a payload that embeds a schema id.
pub const MAGIC_BYTE: u8 = 0x00;

/// Subject holding the value schema of `topic`.
pub fn value_subject(topic: &str) -> String {
    format!("{}-value", topic)
}

/// Split a payload into its embedded global id and Avro body.
///
/// Returns `None` when the payload does not start with the magic byte or is
/// too short to hold an id.
pub fn parse_header(payload: &[u8], id_handler: IdHandler) -> Option<(i64, &[u8])> {
    let id_size = id_handler.id_size();
    if payload.len() < 1 + id_size || payload[0] != MAGIC_BYTE {
        return None;
    }

    let id_bytes = &payload[1..1 + id_size];
    let global_id = match id_handler {
        IdHandler::Legacy4Byte => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(id_bytes);
            i64::from(u32::from_be_bytes(buf))
        }
        IdHandler::Default => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(id_bytes);
            i64::from_be_bytes(buf)
        }
    };

    Some((global_id, &payload[1 + id_size..]))
}

/// Decodes record values against schemas held in the registry.
pub struct RegistryAvroDecoder {
    registry: Arc<dyn SchemaRegistry>,
    id_handler: IdHandler,
    find_latest: bool,
    by_id: DashMap<i64, Arc<Schema>>,
    by_subject: DashMap<String, Arc<Schema>>,
}

impl RegistryAvroDecoder {
    /// Create a decoder.
    pub fn new(registry: Arc<dyn SchemaRegistry>, id_handler: IdHandler, find_latest: bool) -> Self {
        Self {
            registry,
            id_handler,
            find_latest,
            by_id: DashMap::new(),
            by_subject: DashMap::new(),
        }
    }

    /// Create a decoder from configuration.
    pub fn from_config(registry: Arc<dyn SchemaRegistry>, config: &SchemaRegistryConfig) -> Self {
        Self::new(registry, config.id_handler, config.find_latest)
    }

    /// Number of cached schemas (by id and by subject).
    pub fn cached_schemas(&self) -> usize {
        self.by_id.len() + self.by_subject.len()
    }

    /// Decode a value read from `topic`.
    pub async fn decode(&self, topic: &str, payload: &[u8]) -> Result<Value> {
        let (schema, body) = match parse_header(payload, self.id_handler) {
            Some((global_id, body)) => (self.schema_for_id(global_id).await?, body),
            None if self.find_latest => (self.latest_for_topic(topic).await?, payload),
            None => {
                return Err(RegistryError::Deserialization(format!(
                    "record on {} has no embedded schema id and find-latest is disabled",
                    topic
                ))
                .into())
            }
        };

        let mut reader = body;
        apache_avro::from_avro_datum(&schema, &mut reader, None)
            .map_err(|e| RegistryError::Deserialization(format!("{}: {}", topic, e)).into())
    }

    /// Decode a value and render it as JSON.
    pub async fn decode_json(&self, topic: &str, payload: &[u8]) -> Result<serde_json::Value> {
        let value = self.decode(topic, payload).await?;
        serde_json::Value::try_from(value)
            .map_err(|e| RegistryError::Deserialization(format!("{}: {}", topic, e)).into())
    }

    async fn schema_for_id(&self, global_id: i64) -> Result<Arc<Schema>> {
        if let Some(schema) = self.by_id.get(&global_id) {
            return Ok(schema.clone());
        }

        let text = self.registry.schema_by_id(global_id).await?;
        let schema = Arc::new(parse_schema(&global_id.to_string(), &text)?);
        debug!(global_id, "Cached schema by global id");
        self.by_id.insert(global_id, schema.clone());
        Ok(schema)
    }

    async fn latest_for_topic(&self, topic: &str) -> Result<Arc<Schema>> {
        let subject = value_subject(topic);
        if let Some(schema) = self.by_subject.get(&subject) {
            return Ok(schema.clone());
        }

        let registered = self.registry.latest_schema(&subject).await?;
        let schema = Arc::new(parse_schema(&subject, &registered.schema)?);
        debug!(subject = %subject, global_id = ?registered.global_id, "Cached latest schema");
        if let Some(global_id) = registered.global_id {
            self.by_id.insert(global_id, schema.clone());
        }
        self.by_subject.insert(subject, schema.clone());
        Ok(schema)
    }
}

fn parse_schema(id: &str, text: &str) -> Result<Schema> {
    Schema::parse_str(text).map_err(|e| {
        RegistryError::InvalidSchema {
            id: id.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}
