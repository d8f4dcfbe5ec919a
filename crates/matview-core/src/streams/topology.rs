//! Pipeline graph: table sources, their stores and the record observer.

use super::view::MaterializedView;
use std::fmt::Write;
use std::sync::Arc;
use tracing::debug;

/// Side channel notified of every record applied to a view.
///
/// Observers must not mutate view state; they see the record after it has
/// been applied.
pub trait RecordObserver: Send + Sync {
    /// Called with the key and decoded value (`None` for a tombstone).
    fn observe(&self, topic: &str, key: &str, value: Option<&serde_json::Value>);
}

/// Observer that logs each record at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl RecordObserver for LoggingObserver {
    fn observe(&self, topic: &str, key: &str, value: Option<&serde_json::Value>) {
        match value {
            Some(value) => debug!(topic = %topic, key = %key, value = %value, "Table update"),
            None => debug!(topic = %topic, key = %key, "Table delete"),
        }
    }
}

/// One topic read into one view.
#[derive(Debug, Clone)]
pub struct TableSource {
    /// Source node name
    pub name: String,
    /// Topic read by the source
    pub topic: String,
    /// State store backing the view
    pub store_name: String,
    view: Arc<MaterializedView>,
}

impl TableSource {
    /// Create a source for `topic` with an empty view.
    pub fn new(topic: &str) -> Self {
        let store_name = store_name(topic);
        Self {
            name: format!("table-source-{}", topic),
            topic: topic.to_string(),
            view: Arc::new(MaterializedView::new(store_name.clone(), topic)),
            store_name,
        }
    }

    /// View fed by this source.
    pub fn view(&self) -> Arc<MaterializedView> {
        self.view.clone()
    }
}

/// State store name of the table over `topic`.
pub fn store_name(topic: &str) -> String {
    format!("{}-STATE-STORE", topic)
}

/// The built pipeline.
pub struct Topology {
    sources: Vec<TableSource>,
    observer: Arc<dyn RecordObserver>,
}

impl Topology {
    /// Empty topology with the given observer.
    pub fn new(observer: Arc<dyn RecordObserver>) -> Self {
        Self {
            sources: Vec::new(),
            observer,
        }
    }

    /// Add a table over `topic`. Returns the view handle.
    pub fn add_table(&mut self, topic: &str) -> Arc<MaterializedView> {
        let source = TableSource::new(topic);
        let view = source.view();
        self.sources.push(source);
        view
    }

    /// Table sources in insertion order.
    pub fn sources(&self) -> &[TableSource] {
        &self.sources
    }

    /// View over `topic`.
    pub fn view(&self, topic: &str) -> Option<Arc<MaterializedView>> {
        self.sources
            .iter()
            .find(|s| s.topic == topic)
            .map(TableSource::view)
    }

    /// Record observer.
    pub fn observer(&self) -> Arc<dyn RecordObserver> {
        self.observer.clone()
    }

    /// Human-readable rendering of the graph.
    pub fn describe(&self) -> String {
        let mut out = String::from("Topology:\n");
        for (index, source) in self.sources.iter().enumerate() {
            let _ = writeln!(out, "  Sub-topology: {}", index);
            let _ = writeln!(
                out,
                "    Source: {} (topics: [{}])",
                source.name, source.topic
            );
            let _ = writeln!(out, "      --> table-{}", source.topic);
            let _ = writeln!(
                out,
                "    Processor: table-{} (stores: [{}])",
                source.topic, source.store_name
            );
            let _ = writeln!(out, "      --> observer-{}", source.topic);
            let _ = writeln!(out, "    Processor: observer-{} (stores: [])", source.topic);
        }
        out
    }
}
