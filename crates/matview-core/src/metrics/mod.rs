//! Metrics collection and export.

mod prometheus;

pub use self::prometheus::MaterializationMetrics;
