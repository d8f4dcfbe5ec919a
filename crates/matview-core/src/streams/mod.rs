//! Materialized tables over Kafka topics.
//!
//! [`MaterializationBuilder`] turns the application config and the resolved
//! cluster into a [`RuntimeConfig`] and a [`Topology`]; [`StreamsRuntime`]
//! runs the topology and keeps each view current.

mod builder;
mod runtime;
mod state;
mod topology;
mod view;

pub use builder::{KeyDecoding, MaterializationBuilder, RuntimeConfig, ValueDecoding};
pub use runtime::{FatalErrors, RuntimeState, StreamsRuntime};
pub use state::StateDirectory;
pub use topology::{store_name, LoggingObserver, RecordObserver, TableSource, Topology};
pub use view::{ApplyOutcome, MaterializedView, ViewCheckpoint, ViewEntry, ViewUpdate};
