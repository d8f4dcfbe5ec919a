//! Schema registry integration.

mod client;
mod decoder;

pub use client::{ApicurioRegistryClient, RegisteredSchema, SchemaRegistry, GLOBAL_ID_HEADER};
pub use decoder::{parse_header, value_subject, RegistryAvroDecoder, MAGIC_BYTE};
