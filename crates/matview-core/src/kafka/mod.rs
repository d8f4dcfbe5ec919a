//! Kafka consumers for table sources.

mod consumer;
mod offset;

pub use consumer::{KafkaMessage, StartPosition, TableConsumer, TableConsumerBuilder};
pub use offset::OffsetTracker;
