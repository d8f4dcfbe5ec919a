//! Table runtime.
//!
//! One task per table source. A task restores its view from the local
//! checkpoint, assigns every partition of its topic, applies records in
//! offset order and periodically writes a checkpoint before committing the
//! applied offsets. Fatal task errors are reported on the channel returned
//! by [`StreamsRuntime::start`].

use super::builder::RuntimeConfig;
use super::topology::{RecordObserver, TableSource, Topology};
use super::view::{ApplyOutcome, MaterializedView, ViewUpdate};
use crate::config::{DeserializationErrorPolicy, OffsetReset};
use crate::engine::Closeable;
use crate::health::{table_component, HealthCheck};
use crate::kafka::{KafkaMessage, OffsetTracker, StartPosition, TableConsumer, TableConsumerBuilder};
use crate::metrics::MaterializationMetrics;
use crate::registry::RegistryAvroDecoder;
use crate::{Error, KafkaError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Lifecycle of the runtime. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Built, not started
    Created,
    /// Table tasks running
    Started,
    /// Close in progress
    Stopping,
    /// Closed
    Stopped,
}

/// Receiver of fatal errors raised by table tasks.
pub type FatalErrors = mpsc::UnboundedReceiver<Error>;

/// Handle to the running pipeline.
pub struct StreamsRuntime {
    config: RuntimeConfig,
    topology: Topology,
    decoder: Arc<RegistryAvroDecoder>,
    metrics: Option<Arc<MaterializationMetrics>>,
    health: Option<Arc<HealthCheck>>,
    state: Mutex<RuntimeState>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamsRuntime {
    /// Create a runtime in the `Created` state.
    pub fn new(config: RuntimeConfig, topology: Topology, decoder: Arc<RegistryAvroDecoder>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            topology,
            decoder,
            metrics: None,
            health: None,
            state: Mutex::new(RuntimeState::Created),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Report into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<MaterializationMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Report into `health`.
    pub fn with_health(mut self, health: Arc<HealthCheck>) -> Self {
        self.health = Some(health);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RuntimeState {
        *self.state.lock()
    }

    /// Runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Pipeline graph.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Read handle to the view over `topic`.
    pub fn view(&self, topic: &str) -> Option<Arc<MaterializedView>> {
        self.topology.view(topic)
    }

    /// Remove local state left by a previous run of this application.
    ///
    /// Only valid before `start`.
    pub fn clean_up(&self) -> Result<bool> {
        let state = self.state();
        if state != RuntimeState::Created {
            return Err(Error::Kafka(KafkaError::InvalidState(format!(
                "clean up is only allowed before start (state: {:?})",
                state
            ))));
        }
        self.config.state_directory().clean_up()
    }

    /// Spawn one task per table source.
    pub fn start(&self) -> Result<FatalErrors> {
        {
            let mut state = self.state.lock();
            if *state != RuntimeState::Created {
                return Err(Error::Kafka(KafkaError::InvalidState(format!(
                    "cannot start from state {:?}",
                    *state
                ))));
            }
            *state = RuntimeState::Started;
        }

        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        let mut tasks = self.tasks.lock();

        for source in self.topology.sources() {
            let task = TableTask {
                config: self.config.clone(),
                source: source.clone(),
                decoder: self.decoder.clone(),
                observer: self.topology.observer(),
                metrics: self.metrics.clone(),
                health: self.health.clone(),
                tracker: OffsetTracker::new(),
            };
            let shutdown = self.shutdown_tx.subscribe();
            let fatal_tx = fatal_tx.clone();

            tasks.push(tokio::spawn(async move {
                let topic = task.source.topic.clone();
                let health = task.health.clone();
                if let Err(e) = task.run(shutdown).await {
                    error!(topic = %topic, error = %e, "Table task failed");
                    if let Some(health) = health {
                        health.mark_unhealthy(&table_component(&topic), &e.to_string());
                    }
                    let _ = fatal_tx.send(e);
                }
            }));
        }

        if let Some(ref health) = self.health {
            health.pipeline_started();
        }
        info!(
            application_id = %self.config.application_id,
            tables = self.topology.sources().len(),
            "Runtime started"
        );
        Ok(fatal_rx)
    }

    /// Stop all table tasks. Repeated calls are no-ops.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                RuntimeState::Created => {
                    *state = RuntimeState::Stopped;
                    info!("Runtime closed before start");
                    return Ok(());
                }
                RuntimeState::Stopping | RuntimeState::Stopped => {
                    debug!(state = ?*state, "Runtime already closing");
                    return Ok(());
                }
                RuntimeState::Started => *state = RuntimeState::Stopping,
            }
        }

        info!("Stopping runtime");
        self.shutdown_tx.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Table task did not finish cleanly");
            }
        }

        *self.state.lock() = RuntimeState::Stopped;
        if let Some(ref health) = self.health {
            health.pipeline_stopped();
        }
        info!("Runtime stopped");
        Ok(())
    }
}

#[async_trait]
impl Closeable for StreamsRuntime {
    async fn close(&self) -> Result<()> {
        StreamsRuntime::close(self).await
    }
}

/// Work of one table source.
struct TableTask {
    config: RuntimeConfig,
    source: TableSource,
    decoder: Arc<RegistryAvroDecoder>,
    observer: Arc<dyn RecordObserver>,
    metrics: Option<Arc<MaterializationMetrics>>,
    health: Option<Arc<HealthCheck>>,
    tracker: OffsetTracker,
}

impl TableTask {
    async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let topic = self.source.topic.clone();
        let view = self.source.view();
        let state_dir = self.config.state_directory();

        if let Some(checkpoint) = state_dir.read_checkpoint(&self.source.store_name)? {
            info!(
                topic = %topic,
                entries = checkpoint.entries.len(),
                "Restoring view from checkpoint"
            );
            view.restore(checkpoint);
            for (partition, offset) in view.positions() {
                self.tracker.update_applied(&topic, partition, offset);
            }
        }

        let consumer = TableConsumerBuilder::new(&self.config, topic.as_str()).build()?;
        let partitions = tokio::select! {
            partitions = consumer.partitions(self.config.metadata_timeout) => partitions?,
            _ = shutdown.changed() => return Ok(()),
        };

        let starts: Vec<(i32, StartPosition)> = partitions
            .iter()
            .map(|&p| (p, self.start_position(view.position(p))))
            .collect();
        consumer.assign(&starts)?;

        if let Some(ref health) = self.health {
            health.mark_healthy(&table_component(&topic));
        }

        let interval = self.config.commit_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.commit(&consumer, &view, false).await?,
                message = consumer.recv() => {
                    self.apply_message(message?, &view).await?;
                }
            }
        }

        self.commit(&consumer, &view, true).await?;
        info!(topic = %topic, keys = view.len(), "Table task stopped");
        Ok(())
    }

    fn start_position(&self, applied: Option<i64>) -> StartPosition {
        match applied {
            Some(offset) => StartPosition::Offset(offset + 1),
            None => match self.config.auto_offset_reset {
                OffsetReset::Earliest => StartPosition::Beginning,
                OffsetReset::Latest => StartPosition::End,
            },
        }
    }

    /// Decode and apply one record. Returns `None` when the record was
    /// skipped before reaching the view.
    async fn apply_message(
        &self,
        message: KafkaMessage,
        view: &MaterializedView,
    ) -> Result<Option<ApplyOutcome>> {
        let topic = self.source.topic.as_str();

        if view
            .position(message.partition)
            .is_some_and(|position| message.offset <= position)
        {
            self.record(ApplyOutcome::Duplicate);
            return Ok(Some(ApplyOutcome::Duplicate));
        }

        let key = match message.key_str() {
            Some(key) => Some(key.to_string()),
            None => {
                warn!(
                    topic = %topic,
                    partition = message.partition,
                    offset = message.offset,
                    "Skipping record without a UTF-8 key"
                );
                None
            }
        };

        let value = match (&key, message.value.as_deref()) {
            (Some(_), Some(payload)) => match self.decoder.decode_json(topic, payload).await {
                Ok(value) => Some(value),
                Err(e) => match self.config.deserialization_error_policy {
                    DeserializationErrorPolicy::Fail => return Err(e),
                    DeserializationErrorPolicy::LogAndContinue => {
                        warn!(
                            topic = %topic,
                            partition = message.partition,
                            offset = message.offset,
                            error = %e,
                            "Skipping undecodable record"
                        );
                        if let Some(ref metrics) = self.metrics {
                            metrics.record_deserialization_error(topic);
                        }
                        if view.skip(message.partition, message.offset) {
                            self.tracker
                                .update_applied(topic, message.partition, message.offset);
                        }
                        return Ok(None);
                    }
                },
            },
            _ => None,
        };

        let observed = value.clone();
        let outcome = view.apply(ViewUpdate {
            key: key.clone(),
            value,
            partition: message.partition,
            offset: message.offset,
            timestamp: message.timestamp,
        });
        self.record(outcome);

        if outcome != ApplyOutcome::Duplicate {
            self.tracker
                .update_applied(topic, message.partition, message.offset);
        }

        if let (Some(key), true) = (key, is_change(outcome)) {
            self.observer.observe(topic, &key, observed.as_ref());
        }

        Ok(Some(outcome))
    }

    fn record(&self, outcome: ApplyOutcome) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_apply(&self.source.topic, outcome);
        }
    }

    /// Write the checkpoint, then commit the offsets it covers.
    async fn commit(&self, consumer: &TableConsumer, view: &MaterializedView, last: bool) -> Result<()> {
        let topic = self.source.topic.as_str();
        let pending = self.tracker.pending(topic);
        if pending.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        self.config
            .state_directory()
            .write_checkpoint(&view.checkpoint())?;

        let result = consumer.commit_offsets_sync(pending.clone()).await;
        if !self.settle_commit(&pending, result, last)? {
            return Ok(());
        }

        if let Some(ref metrics) = self.metrics {
            metrics.record_commit(topic, started.elapsed());
            metrics.set_view_size(topic, view.len());
        }
        debug!(
            topic = %topic,
            partitions = pending.len(),
            keys = view.len(),
            final_commit = last,
            "Committed"
        );
        Ok(())
    }

    /// Record the outcome of an offset commit. Offsets count as committed
    /// only once the broker acknowledged them. A failed periodic commit
    /// leaves them pending for the next tick; a failed final commit is an
    /// error.
    fn settle_commit(&self, pending: &[(i32, i64)], result: Result<()>, last: bool) -> Result<bool> {
        let topic = self.source.topic.as_str();
        match result {
            Ok(()) => {
                for (partition, offset) in pending {
                    self.tracker.mark_committed(topic, *partition, *offset);
                }
                Ok(true)
            }
            Err(e) if !last => {
                warn!(topic = %topic, error = %e, "Offset commit failed, retrying on next interval");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

fn is_change(outcome: ApplyOutcome) -> bool {
    matches!(
        outcome,
        ApplyOutcome::Inserted
            | ApplyOutcome::Updated
            | ApplyOutcome::Deleted
            | ApplyOutcome::DeleteIgnored
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IdHandler, KafkaSecurityConfig, ProcessingGuarantee};
    use crate::registry::{RegisteredSchema, SchemaRegistry, MAGIC_BYTE};
    use crate::streams::{KeyDecoding, LoggingObserver, ValueDecoding};
    use apache_avro::types::Value;
    use apache_avro::Schema;
    use std::path::Path;
    use std::time::Duration;

    const SALE_SCHEMA: &str = r#"{
        "type": "record",
        "name": "Sale",
        "fields": [{"name": "product_id", "type": "string"}, {"name": "amount", "type": "int"}]
    }"#;

    struct OneSchemaRegistry;

    #[async_trait]
    impl SchemaRegistry for OneSchemaRegistry {
        async fn schema_by_id(&self, _global_id: i64) -> Result<String> {
            Ok(SALE_SCHEMA.to_string())
        }

        async fn latest_schema(&self, _subject: &str) -> Result<RegisteredSchema> {
            Ok(RegisteredSchema {
                global_id: Some(1),
                schema: SALE_SCHEMA.to_string(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        seen: Mutex<Vec<(String, Option<serde_json::Value>)>>,
    }

    impl RecordObserver for RecordingObserver {
        fn observe(&self, _topic: &str, key: &str, value: Option<&serde_json::Value>) {
            self.seen.lock().push((key.to_string(), value.cloned()));
        }
    }

    fn runtime_config(state_dir: &Path, policy: DeserializationErrorPolicy) -> RuntimeConfig {
        RuntimeConfig {
            application_id: "product-recommendation".into(),
            bootstrap_servers: "127.0.0.1:1".into(),
            key_decoding: KeyDecoding::Utf8,
            value_decoding: ValueDecoding::RegistryAvro,
            schema_registry_url: "http://localhost:8081".into(),
            find_latest: false,
            id_handler: IdHandler::Legacy4Byte,
            deserialization_error_policy: policy,
            auto_offset_reset: OffsetReset::Earliest,
            commit_interval: Duration::from_millis(100),
            processing_guarantee: ProcessingGuarantee::ExactlyOnceV2,
            state_dir: state_dir.to_path_buf(),
            clean_up_on_start: true,
            session_timeout_ms: 6000,
            metadata_timeout: Duration::from_millis(500),
            security: KafkaSecurityConfig::default(),
        }
    }

    fn decoder() -> Arc<RegistryAvroDecoder> {
        Arc::new(RegistryAvroDecoder::new(
            Arc::new(OneSchemaRegistry),
            IdHandler::Legacy4Byte,
            false,
        ))
    }

    fn sale(product: &str, amount: i32) -> Vec<u8> {
        let schema = Schema::parse_str(SALE_SCHEMA).unwrap();
        let datum = apache_avro::to_avro_datum(
            &schema,
            Value::Record(vec![
                ("product_id".into(), Value::String(product.into())),
                ("amount".into(), Value::Int(amount)),
            ]),
        )
        .unwrap();
        let mut payload = vec![MAGIC_BYTE, 0, 0, 0, 1];
        payload.extend(datum);
        payload
    }

    fn message(key: Option<&[u8]>, value: Option<Vec<u8>>, offset: i64) -> KafkaMessage {
        KafkaMessage {
            key: key.map(|k| k.to_vec()),
            value,
            topic: "sales".into(),
            partition: 0,
            offset,
            timestamp: 0,
            headers: vec![],
        }
    }

    fn task(
        state_dir: &Path,
        policy: DeserializationErrorPolicy,
        observer: Arc<dyn RecordObserver>,
    ) -> (TableTask, Arc<MaterializationMetrics>) {
        let metrics = Arc::new(MaterializationMetrics::new().unwrap());
        let task = TableTask {
            config: runtime_config(state_dir, policy),
            source: TableSource::new("sales"),
            decoder: decoder(),
            observer,
            metrics: Some(metrics.clone()),
            health: None,
            tracker: OffsetTracker::new(),
        };
        (task, metrics)
    }

    #[tokio::test]
    async fn test_apply_message_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let (task, metrics) = task(dir.path(), DeserializationErrorPolicy::Fail, observer.clone());
        let view = task.source.view();

        let outcome = task
            .apply_message(message(Some(b"P100"), Some(sale("P100", 5)), 0), &view)
            .await
            .unwrap();
        assert_eq!(outcome, Some(ApplyOutcome::Inserted));
        assert_eq!(view.get("P100").unwrap()["amount"], 5);

        let outcome = task
            .apply_message(message(Some(b"P100"), Some(sale("P100", 7)), 1), &view)
            .await
            .unwrap();
        assert_eq!(outcome, Some(ApplyOutcome::Updated));

        // Redelivered offset
        let outcome = task
            .apply_message(message(Some(b"P100"), Some(sale("P100", 9)), 1), &view)
            .await
            .unwrap();
        assert_eq!(outcome, Some(ApplyOutcome::Duplicate));
        assert_eq!(view.get("P100").unwrap()["amount"], 7);

        let outcome = task
            .apply_message(message(Some(b"P100"), None, 2), &view)
            .await
            .unwrap();
        assert_eq!(outcome, Some(ApplyOutcome::Deleted));
        assert!(view.is_empty());

        assert_eq!(metrics.records_applied("sales"), 2);
        assert_eq!(metrics.duplicates_skipped("sales"), 1);
        assert_eq!(metrics.tombstones("sales"), 1);
        assert_eq!(task.tracker.pending("sales"), vec![(0, 2)]);

        let seen = observer.seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], ("P100".to_string(), None));
    }

    #[tokio::test]
    async fn test_null_key_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let (task, _) = task(dir.path(), DeserializationErrorPolicy::Fail, observer.clone());
        let view = task.source.view();

        let outcome = task
            .apply_message(message(None, Some(sale("P1", 1)), 0), &view)
            .await
            .unwrap();
        assert_eq!(outcome, Some(ApplyOutcome::SkippedNullKey));

        let outcome = task
            .apply_message(message(Some(&[0xff, 0xfe]), Some(sale("P1", 1)), 1), &view)
            .await
            .unwrap();
        assert_eq!(outcome, Some(ApplyOutcome::SkippedNullKey));

        assert!(view.is_empty());
        assert_eq!(view.position(0), Some(1));
        assert!(observer.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_record_fails_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let (task, _) = task(
            dir.path(),
            DeserializationErrorPolicy::Fail,
            Arc::new(LoggingObserver),
        );
        let view = task.source.view();

        let result = task
            .apply_message(message(Some(b"P1"), Some(vec![0x05, 0x01]), 0), &view)
            .await;
        assert!(result.is_err());
        assert_eq!(view.position(0), None);
    }

    #[tokio::test]
    async fn test_undecodable_record_log_and_continue() {
        let dir = tempfile::tempdir().unwrap();
        let (task, metrics) = task(
            dir.path(),
            DeserializationErrorPolicy::LogAndContinue,
            Arc::new(LoggingObserver),
        );
        let view = task.source.view();

        let outcome = task
            .apply_message(message(Some(b"P1"), Some(vec![0x05, 0x01]), 0), &view)
            .await
            .unwrap();
        assert_eq!(outcome, None);
        assert_eq!(metrics.deserialization_errors("sales"), 1);
        assert_eq!(view.position(0), Some(0));
        assert!(view.is_empty());
    }

    #[tokio::test]
    async fn test_failed_periodic_commit_stays_pending() {
        let dir = tempfile::tempdir().unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let (task, _) = task(dir.path(), DeserializationErrorPolicy::Fail, observer);
        let view = task.source.view();

        task.apply_message(message(Some(b"P1"), Some(sale("P1", 1)), 4), &view)
            .await
            .unwrap();
        let pending = task.tracker.pending("sales");
        let failure = || -> Result<()> {
            Err(Error::Kafka(KafkaError::OffsetCommit("coordinator unavailable".into())))
        };

        assert!(!task.settle_commit(&pending, failure(), false).unwrap());
        assert_eq!(task.tracker.get_committed("sales", 0), None);
        assert_eq!(task.tracker.pending("sales"), vec![(0, 4)]);

        assert!(task.settle_commit(&pending, failure(), true).is_err());
        assert_eq!(task.tracker.get_committed("sales", 0), None);

        assert!(task.settle_commit(&pending, Ok(()), false).unwrap());
        assert_eq!(task.tracker.get_committed("sales", 0), Some(4));
        assert!(task.tracker.pending("sales").is_empty());
    }

    #[test]
    fn test_start_position() {
        let dir = tempfile::tempdir().unwrap();
        let (mut task, _) = task(
            dir.path(),
            DeserializationErrorPolicy::Fail,
            Arc::new(LoggingObserver),
        );
        assert_eq!(task.start_position(Some(41)), StartPosition::Offset(42));
        assert_eq!(task.start_position(None), StartPosition::Beginning);

        task.config.auto_offset_reset = OffsetReset::Latest;
        assert_eq!(task.start_position(None), StartPosition::End);
    }

    fn runtime(state_dir: &Path) -> StreamsRuntime {
        let mut topology = Topology::new(Arc::new(LoggingObserver));
        topology.add_table("clickstream");
        topology.add_table("sales");
        StreamsRuntime::new(
            runtime_config(state_dir, DeserializationErrorPolicy::Fail),
            topology,
            decoder(),
        )
    }

    #[tokio::test]
    async fn test_close_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime(dir.path());
        assert_eq!(runtime.state(), RuntimeState::Created);

        runtime.close().await.unwrap();
        assert_eq!(runtime.state(), RuntimeState::Stopped);

        // Idempotent
        runtime.close().await.unwrap();
        assert_eq!(runtime.state(), RuntimeState::Stopped);

        assert!(runtime.start().is_err());
        assert!(runtime.clean_up().is_err());
    }

    #[tokio::test]
    async fn test_clean_up_removes_application_state() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime(dir.path());

        let view = runtime.view("sales").unwrap();
        view.apply(ViewUpdate {
            key: Some("P1".into()),
            value: Some(serde_json::json!(1)),
            partition: 0,
            offset: 0,
            timestamp: 0,
        });
        let state_dir = runtime.config().state_directory();
        state_dir.write_checkpoint(&view.checkpoint()).unwrap();
        assert!(state_dir.path().exists());

        assert!(runtime.clean_up().unwrap());
        assert!(!state_dir.path().exists());
    }

    #[tokio::test]
    async fn test_unreachable_broker_reports_fatal_error() {
        let dir = tempfile::tempdir().unwrap();
        let health = Arc::new(HealthCheck::new());
        let runtime = runtime(dir.path()).with_health(health.clone());

        let mut fatal = runtime.start().unwrap();
        assert_eq!(runtime.state(), RuntimeState::Started);
        assert!(runtime.start().is_err());

        let err = tokio::time::timeout(Duration::from_secs(30), fatal.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, Error::Kafka(_)));
        assert!(!health.is_operational());

        runtime.close().await.unwrap();
        runtime.close().await.unwrap();
        assert_eq!(runtime.state(), RuntimeState::Stopped);
        assert!(!health.is_pipeline_running());
    }
}
