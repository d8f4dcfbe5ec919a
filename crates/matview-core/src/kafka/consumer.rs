//! Kafka consumer for table sources.
//!
//! Each table source owns one consumer. Partitions are assigned explicitly
//! (a table covers every partition of its topic), auto-commit is disabled and
//! only committed transactional records are read.

use crate::streams::RuntimeConfig;
use crate::{Error, KafkaError, Result};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Where a partition starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Earliest available offset
    Beginning,
    /// Next offset produced after assignment
    End,
    /// A specific offset
    Offset(i64),
}

impl StartPosition {
    fn to_offset(self) -> Offset {
        match self {
            StartPosition::Beginning => Offset::Beginning,
            StartPosition::End => Offset::End,
            StartPosition::Offset(o) => Offset::Offset(o),
        }
    }
}

/// Builder for a table source consumer.
pub struct TableConsumerBuilder<'a> {
    config: &'a RuntimeConfig,
    topic: String,
}

impl<'a> TableConsumerBuilder<'a> {
    /// Create a builder for `topic`.
    pub fn new(config: &'a RuntimeConfig, topic: impl Into<String>) -> Self {
        Self {
            config,
            topic: topic.into(),
        }
    }

    /// Build the consumer. No partitions are assigned yet.
    pub fn build(self) -> Result<TableConsumer> {
        let mut client_config = ClientConfig::new();
        for (key, value) in self.config.client_properties() {
            client_config.set(key, value);
        }

        let consumer: StreamConsumer = client_config.create().map_err(|e| {
            Error::Kafka(KafkaError::ConnectionFailed {
                broker: self.config.bootstrap_servers.clone(),
                message: e.to_string(),
            })
        })?;

        info!(
            topic = %self.topic,
            group = %self.config.application_id,
            servers = %self.config.bootstrap_servers,
            "Table consumer created"
        );

        Ok(TableConsumer {
            consumer: Arc::new(consumer),
            topic: self.topic,
        })
    }
}

/// Consumer bound to one topic.
#[derive(Clone)]
pub struct TableConsumer {
    consumer: Arc<StreamConsumer>,
    topic: String,
}

impl TableConsumer {
    /// Topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Fetch the partition ids of the topic.
    pub async fn partitions(&self, timeout: Duration) -> Result<Vec<i32>> {
        let consumer = self.consumer.clone();
        let topic = self.topic.clone();

        let metadata = tokio::task::spawn_blocking(move || {
            consumer.fetch_metadata(Some(topic.as_str()), timeout)
        })
        .await
        .map_err(|e| metadata_error(&self.topic, e.to_string()))?
        .map_err(|e| metadata_error(&self.topic, e.to_string()))?;

        let topic = metadata
            .topics()
            .iter()
            .find(|t| t.name() == self.topic)
            .ok_or_else(|| metadata_error(&self.topic, "topic missing from metadata".into()))?;

        if let Some(err) = topic.error() {
            return Err(metadata_error(&self.topic, format!("{:?}", err)));
        }

        let mut partitions: Vec<i32> = topic.partitions().iter().map(|p| p.id()).collect();
        if partitions.is_empty() {
            return Err(metadata_error(&self.topic, "topic has no partitions".into()));
        }
        partitions.sort_unstable();
        Ok(partitions)
    }

    /// Assign partitions with explicit start positions.
    pub fn assign(&self, starts: &[(i32, StartPosition)]) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        for (partition, start) in starts {
            tpl.add_partition_offset(&self.topic, *partition, start.to_offset())
                .map_err(|e| Error::Kafka(KafkaError::PartitionAssignment(e.to_string())))?;
        }

        self.consumer
            .assign(&tpl)
            .map_err(|e| Error::Kafka(KafkaError::PartitionAssignment(e.to_string())))?;

        info!(topic = %self.topic, assignment = ?starts, "Partitions assigned");
        Ok(())
    }

    /// Receive the next message.
    pub async fn recv(&self) -> Result<KafkaMessage> {
        match self.consumer.recv().await {
            Ok(msg) => Ok(Self::convert_message(&msg)),
            Err(e) => Err(Error::Kafka(KafkaError::Consume {
                topic: self.topic.clone(),
                message: e.to_string(),
            })),
        }
    }

    /// Commit applied offsets, given as (partition, last applied offset).
    pub fn commit_offsets(&self, offsets: &[(i32, i64)], mode: CommitMode) -> Result<()> {
        if offsets.is_empty() {
            return Ok(());
        }

        let mut tpl = TopicPartitionList::new();
        for (partition, offset) in offsets {
            // Kafka convention: the committed offset is the next one to read
            tpl.add_partition_offset(&self.topic, *partition, Offset::Offset(offset + 1))
                .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?;
        }

        self.consumer
            .commit(&tpl, mode)
            .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?;

        debug!(topic = %self.topic, offsets = ?offsets, "Offsets committed");
        Ok(())
    }

    /// Commit synchronously on a blocking thread.
    pub async fn commit_offsets_sync(&self, offsets: Vec<(i32, i64)>) -> Result<()> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.commit_offsets(&offsets, CommitMode::Sync))
            .await
            .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?
    }

    /// Convert a borrowed message to an owned KafkaMessage.
    fn convert_message(msg: &BorrowedMessage) -> KafkaMessage {
        KafkaMessage {
            key: msg.key().map(|k| k.to_vec()),
            value: msg.payload().map(|v| v.to_vec()),
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            timestamp: msg.timestamp().to_millis().unwrap_or(0),
            headers: Self::extract_headers(msg),
        }
    }

    /// Extract headers from a message.
    fn extract_headers(msg: &BorrowedMessage) -> Vec<(String, Vec<u8>)> {
        msg.headers()
            .map(|headers| {
                (0..headers.count())
                    .map(|i| {
                        let header = headers.get(i);
                        (header.key.to_string(), header.value.unwrap_or(&[]).to_vec())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn metadata_error(topic: &str, message: String) -> Error {
    Error::Kafka(KafkaError::Metadata {
        topic: topic.to_string(),
        message,
    })
}

/// A Kafka message with all metadata.
#[derive(Debug, Clone)]
pub struct KafkaMessage {
    /// Message key (optional)
    pub key: Option<Vec<u8>>,

    /// Message value; `None` is a tombstone
    pub value: Option<Vec<u8>>,

    /// Topic name
    pub topic: String,

    /// Partition number
    pub partition: i32,

    /// Offset within the partition
    pub offset: i64,

    /// Message timestamp (milliseconds since epoch)
    pub timestamp: i64,

    /// Message headers
    pub headers: Vec<(String, Vec<u8>)>,
}

impl KafkaMessage {
    /// Get the message key as a string.
    pub fn key_str(&self) -> Option<&str> {
        self.key.as_ref().and_then(|k| std::str::from_utf8(k).ok())
    }

    /// Whether the record deletes its key.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}
