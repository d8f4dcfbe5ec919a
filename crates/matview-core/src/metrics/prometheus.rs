//! Prometheus metrics export.

use crate::error::ErrorCategory;
use crate::streams::ApplyOutcome;
use crate::{Error, Result};
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

const NAMESPACE: &str = "matview";

/// Commit duration buckets in seconds.
const COMMIT_DURATION_BUCKETS: [f64; 7] = [0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0];

/// Materialization metrics, labelled by topic where it applies.
pub struct MaterializationMetrics {
    registry: Registry,

    // === COUNTERS ===
    records_applied: IntCounterVec,
    tombstones: IntCounterVec,
    duplicates_skipped: IntCounterVec,
    null_keys_skipped: IntCounterVec,
    deserialization_errors: IntCounterVec,
    commits: IntCounterVec,
    errors: IntCounterVec,

    // === GAUGES ===
    view_size: IntGaugeVec,
    reference_records: IntGauge,
    reference_rows_discarded: IntGauge,

    // === HISTOGRAM ===
    commit_duration: HistogramVec,
}

fn register<T>(registry: &Registry, metric: T) -> Result<T>
where
    T: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(metric.clone()))
        .map_err(|e| Error::Config(format!("Failed to register metric: {}", e)))?;
    Ok(metric)
}

fn counter_vec(registry: &Registry, name: &str, help: &str, label: &str) -> Result<IntCounterVec> {
    let metric = IntCounterVec::new(Opts::new(name, help).namespace(NAMESPACE), &[label])
        .map_err(|e| Error::Config(format!("Invalid metric {}: {}", name, e)))?;
    register(registry, metric)
}

impl MaterializationMetrics {
    /// Create metrics on a fresh registry.
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics on an existing registry.
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let records_applied = counter_vec(
            &registry,
            "records_applied_total",
            "Records applied to a view (inserts and updates)",
            "topic",
        )?;
        let tombstones = counter_vec(
            &registry,
            "tombstones_total",
            "Tombstones applied to a view",
            "topic",
        )?;
        let duplicates_skipped = counter_vec(
            &registry,
            "duplicates_skipped_total",
            "Records at or below the applied offset",
            "topic",
        )?;
        let null_keys_skipped = counter_vec(
            &registry,
            "null_keys_skipped_total",
            "Records without a usable key",
            "topic",
        )?;
        let deserialization_errors = counter_vec(
            &registry,
            "deserialization_errors_total",
            "Records whose value could not be decoded",
            "topic",
        )?;
        let commits = counter_vec(
            &registry,
            "commits_total",
            "Checkpoint and offset commits",
            "topic",
        )?;
        let errors = counter_vec(&registry, "errors_total", "Fatal errors by category", "category")?;

        let view_size = IntGaugeVec::new(
            Opts::new("view_size", "Keys held by a view").namespace(NAMESPACE),
            &["topic"],
        )
        .map_err(|e| Error::Config(e.to_string()))?;
        let view_size = register(&registry, view_size)?;

        let reference_records = IntGauge::with_opts(
            Opts::new("reference_records", "Reference records loaded").namespace(NAMESPACE),
        )
        .map_err(|e| Error::Config(e.to_string()))?;
        let reference_records = register(&registry, reference_records)?;

        let reference_rows_discarded = IntGauge::with_opts(
            Opts::new("reference_rows_discarded", "Reference rows skipped").namespace(NAMESPACE),
        )
        .map_err(|e| Error::Config(e.to_string()))?;
        let reference_rows_discarded = register(&registry, reference_rows_discarded)?;

        let commit_duration = HistogramVec::new(
            HistogramOpts::new("commit_duration_seconds", "Checkpoint and offset commit time")
                .namespace(NAMESPACE)
                .buckets(COMMIT_DURATION_BUCKETS.to_vec()),
            &["topic"],
        )
        .map_err(|e| Error::Config(e.to_string()))?;
        let commit_duration = register(&registry, commit_duration)?;

        Ok(Self {
            registry,
            records_applied,
            tombstones,
            duplicates_skipped,
            null_keys_skipped,
            deserialization_errors,
            commits,
            errors,
            view_size,
            reference_records,
            reference_rows_discarded,
            commit_duration,
        })
    }

    /// Record the outcome of applying one record.
    pub fn record_apply(&self, topic: &str, outcome: ApplyOutcome) {
        let counter = match outcome {
            ApplyOutcome::Inserted | ApplyOutcome::Updated => &self.records_applied,
            ApplyOutcome::Deleted | ApplyOutcome::DeleteIgnored => &self.tombstones,
            ApplyOutcome::Duplicate => &self.duplicates_skipped,
            ApplyOutcome::SkippedNullKey => &self.null_keys_skipped,
        };
        counter.with_label_values(&[topic]).inc();
    }

    /// Record a value that failed to decode.
    pub fn record_deserialization_error(&self, topic: &str) {
        self.deserialization_errors.with_label_values(&[topic]).inc();
    }

    /// Record a completed commit.
    pub fn record_commit(&self, topic: &str, duration: Duration) {
        self.commits.with_label_values(&[topic]).inc();
        self.commit_duration
            .with_label_values(&[topic])
            .observe(duration.as_secs_f64());
    }

    /// Record a fatal error.
    pub fn record_error(&self, category: ErrorCategory) {
        self.errors.with_label_values(&[category.as_str()]).inc();
    }

    /// Set the number of keys held by a view.
    pub fn set_view_size(&self, topic: &str, size: usize) {
        self.view_size
            .with_label_values(&[topic])
            .set(size as i64);
    }

    /// Set the reference data load result.
    pub fn set_reference_data(&self, records: usize, discarded: usize) {
        self.reference_records.set(records as i64);
        self.reference_rows_discarded.set(discarded as i64);
    }

    /// Records applied to `topic`.
    pub fn records_applied(&self, topic: &str) -> u64 {
        self.records_applied.with_label_values(&[topic]).get()
    }

    /// Tombstones applied to `topic`.
    pub fn tombstones(&self, topic: &str) -> u64 {
        self.tombstones.with_label_values(&[topic]).get()
    }

    /// Duplicates skipped on `topic`.
    pub fn duplicates_skipped(&self, topic: &str) -> u64 {
        self.duplicates_skipped.with_label_values(&[topic]).get()
    }

    /// Deserialization errors on `topic`.
    pub fn deserialization_errors(&self, topic: &str) -> u64 {
        self.deserialization_errors.with_label_values(&[topic]).get()
    }

    /// Commits on `topic`.
    pub fn commits(&self, topic: &str) -> u64 {
        self.commits.with_label_values(&[topic]).get()
    }

    /// Underlying registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Export in Prometheus text format.
    pub fn export_prometheus_text(&self) -> String {
        let families = self.registry.gather();
        TextEncoder::new()
            .encode_to_string(&families)
            .unwrap_or_else(|e| format!("# failed to encode metrics: {}\n", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_counters() {
        let metrics = MaterializationMetrics::new().unwrap();

        metrics.record_apply("sales", ApplyOutcome::Inserted);
        metrics.record_apply("sales", ApplyOutcome::Updated);
        metrics.record_apply("sales", ApplyOutcome::Deleted);
        metrics.record_apply("sales", ApplyOutcome::Duplicate);
        metrics.record_apply("clickstream", ApplyOutcome::Inserted);

        assert_eq!(metrics.records_applied("sales"), 2);
        assert_eq!(metrics.tombstones("sales"), 1);
        assert_eq!(metrics.duplicates_skipped("sales"), 1);
        assert_eq!(metrics.records_applied("clickstream"), 1);
    }

    #[test]
    fn test_commit_metrics() {
        let metrics = MaterializationMetrics::new().unwrap();
        metrics.record_commit("sales", Duration::from_millis(20));
        metrics.record_commit("sales", Duration::from_millis(30));
        assert_eq!(metrics.commits("sales"), 2);
        assert_eq!(metrics.commits("clickstream"), 0);
    }

    #[test]
    fn test_prometheus_text_export() {
        let metrics = MaterializationMetrics::new().unwrap();

        metrics.record_apply("sales", ApplyOutcome::Inserted);
        metrics.record_deserialization_error("sales");
        metrics.record_commit("sales", Duration::from_millis(20));
        metrics.record_error(ErrorCategory::RuntimeFatal);
        metrics.set_view_size("sales", 42);
        metrics.set_reference_data(100, 3);

        let output = metrics.export_prometheus_text();

        assert!(output.contains("# TYPE matview_records_applied_total counter"));
        assert!(output.contains("matview_records_applied_total{topic=\"sales\"} 1"));
        assert!(output.contains("matview_deserialization_errors_total{topic=\"sales\"} 1"));
        assert!(output.contains("matview_errors_total{category=\"runtime_fatal\"} 1"));
        assert!(output.contains("# TYPE matview_view_size gauge"));
        assert!(output.contains("matview_view_size{topic=\"sales\"} 42"));
        assert!(output.contains("matview_reference_records 100"));
        assert!(output.contains("matview_reference_rows_discarded 3"));
        assert!(output.contains("# TYPE matview_commit_duration_seconds histogram"));
        assert!(output.contains("matview_commit_duration_seconds_count{topic=\"sales\"} 1"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        let _first = MaterializationMetrics::with_registry(registry.clone()).unwrap();
        assert!(MaterializationMetrics::with_registry(registry).is_err());
    }
}
