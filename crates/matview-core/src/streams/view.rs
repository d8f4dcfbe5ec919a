//! Materialized key/latest-value views.
//!
//! A view has a single writer (its source task) and any number of readers.
//! Entries and per-partition positions live under one lock so readers never
//! observe a value without the position that produced it.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Latest value held for a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewEntry {
    /// Decoded value
    pub value: serde_json::Value,
    /// Partition the value was read from
    pub partition: i32,
    /// Offset of the record that produced the value
    pub offset: i64,
    /// Record timestamp (milliseconds since epoch)
    pub timestamp: i64,
}

/// A decoded record ready to be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewUpdate {
    /// UTF-8 key; `None` when the record had no usable key
    pub key: Option<String>,
    /// Decoded value; `None` is a tombstone
    pub value: Option<serde_json::Value>,
    /// Source partition
    pub partition: i32,
    /// Source offset
    pub offset: i64,
    /// Record timestamp (milliseconds since epoch)
    pub timestamp: i64,
}

/// Effect of applying one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// New key
    Inserted,
    /// Existing key overwritten
    Updated,
    /// Tombstone removed the key
    Deleted,
    /// Tombstone for a key the view does not hold
    DeleteIgnored,
    /// Offset at or below the partition position; nothing changed
    Duplicate,
    /// Record had no usable key; position advanced, nothing stored
    SkippedNullKey,
}

/// Serializable image of a view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewCheckpoint {
    /// Store name
    pub store: String,
    /// Source topic
    pub topic: String,
    /// Last applied offset per partition
    pub positions: BTreeMap<i32, i64>,
    /// View contents
    pub entries: BTreeMap<String, ViewEntry>,
    /// When the checkpoint was taken
    pub written_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Default)]
struct ViewState {
    entries: HashMap<String, ViewEntry>,
    positions: HashMap<i32, i64>,
}

/// Continuously updated key -> latest value table for one topic.
#[derive(Debug)]
pub struct MaterializedView {
    store: String,
    topic: String,
    state: RwLock<ViewState>,
}

impl MaterializedView {
    /// Create an empty view.
    pub fn new(store: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            topic: topic.into(),
            state: RwLock::new(ViewState::default()),
        }
    }

    /// Store name.
    pub fn store(&self) -> &str {
        &self.store
    }

    /// Source topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Apply one record.
    pub fn apply(&self, update: ViewUpdate) -> ApplyOutcome {
        let mut state = self.state.write();

        if let Some(&position) = state.positions.get(&update.partition) {
            if update.offset <= position {
                return ApplyOutcome::Duplicate;
            }
        }
        state.positions.insert(update.partition, update.offset);

        let Some(key) = update.key else {
            return ApplyOutcome::SkippedNullKey;
        };

        match update.value {
            Some(value) => {
                let entry = ViewEntry {
                    value,
                    partition: update.partition,
                    offset: update.offset,
                    timestamp: update.timestamp,
                };
                match state.entries.insert(key, entry) {
                    Some(_) => ApplyOutcome::Updated,
                    None => ApplyOutcome::Inserted,
                }
            }
            None => match state.entries.remove(&key) {
                Some(_) => ApplyOutcome::Deleted,
                None => ApplyOutcome::DeleteIgnored,
            },
        }
    }

    /// Advance a partition position without touching the contents.
    ///
    /// Returns false when `offset` was already applied.
    pub fn skip(&self, partition: i32, offset: i64) -> bool {
        let mut state = self.state.write();
        match state.positions.get(&partition) {
            Some(&position) if offset <= position => false,
            _ => {
                state.positions.insert(partition, offset);
                true
            }
        }
    }

    /// Latest value for `key`.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.state.read().entries.get(key).map(|e| e.value.clone())
    }

    /// Latest entry for `key`, with its source position.
    pub fn entry(&self, key: &str) -> Option<ViewEntry> {
        self.state.read().entries.get(key).cloned()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Whether the view holds no keys.
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Last applied offset of `partition`.
    pub fn position(&self, partition: i32) -> Option<i64> {
        self.state.read().positions.get(&partition).copied()
    }

    /// Last applied offset of every partition.
    pub fn positions(&self) -> BTreeMap<i32, i64> {
        self.state
            .read()
            .positions
            .iter()
            .map(|(p, o)| (*p, *o))
            .collect()
    }

    /// Copy of the contents.
    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.state
            .read()
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Capture a consistent checkpoint.
    pub fn checkpoint(&self) -> ViewCheckpoint {
        let state = self.state.read();
        ViewCheckpoint {
            store: self.store.clone(),
            topic: self.topic.clone(),
            positions: state.positions.iter().map(|(p, o)| (*p, *o)).collect(),
            entries: state
                .entries
                .iter()
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect(),
            written_at: chrono::Utc::now(),
        }
    }

    /// Replace the contents with a checkpoint.
    pub fn restore(&self, checkpoint: ViewCheckpoint) {
        let mut state = self.state.write();
        state.positions = checkpoint.positions.into_iter().collect();
        state.entries = checkpoint.entries.into_iter().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(key: Option<&str>, value: Option<serde_json::Value>, partition: i32, offset: i64) -> ViewUpdate {
        ViewUpdate {
            key: key.map(str::to_string),
            value,
            partition,
            offset,
            timestamp: 1_700_000_000_000 + offset,
        }
    }

    #[test]
    fn test_last_value_wins() {
        let view = MaterializedView::new("sales-STATE-STORE", "sales");
        assert_eq!(
            view.apply(update(Some("P1"), Some(json!({"qty": 1})), 0, 0)),
            ApplyOutcome::Inserted
        );
        assert_eq!(
            view.apply(update(Some("P1"), Some(json!({"qty": 2})), 0, 1)),
            ApplyOutcome::Updated
        );
        assert_eq!(view.get("P1"), Some(json!({"qty": 2})));
        assert_eq!(view.len(), 1);
        assert_eq!(view.entry("P1").unwrap().offset, 1);
    }

    #[test]
    fn test_tombstone_removes_key() {
        let view = MaterializedView::new("s", "t");
        view.apply(update(Some("P1"), Some(json!(1)), 0, 0));
        assert_eq!(view.apply(update(Some("P1"), None, 0, 1)), ApplyOutcome::Deleted);
        assert!(view.get("P1").is_none());
        assert_eq!(view.apply(update(Some("P9"), None, 0, 2)), ApplyOutcome::DeleteIgnored);
        assert!(view.is_empty());
    }

    #[test]
    fn test_duplicate_offsets_ignored() {
        let view = MaterializedView::new("s", "t");
        view.apply(update(Some("P1"), Some(json!("a")), 0, 5));
        assert_eq!(
            view.apply(update(Some("P1"), Some(json!("b")), 0, 5)),
            ApplyOutcome::Duplicate
        );
        assert_eq!(
            view.apply(update(Some("P1"), Some(json!("c")), 0, 3)),
            ApplyOutcome::Duplicate
        );
        assert_eq!(view.get("P1"), Some(json!("a")));

        // Positions are per partition.
        assert_eq!(
            view.apply(update(Some("P1"), Some(json!("d")), 1, 0)),
            ApplyOutcome::Updated
        );
        assert_eq!(view.position(0), Some(5));
        assert_eq!(view.position(1), Some(0));
    }

    #[test]
    fn test_null_key_advances_position() {
        let view = MaterializedView::new("s", "t");
        assert_eq!(
            view.apply(update(None, Some(json!(1)), 0, 7)),
            ApplyOutcome::SkippedNullKey
        );
        assert!(view.is_empty());
        assert_eq!(view.position(0), Some(7));
        assert_eq!(view.apply(update(None, Some(json!(1)), 0, 7)), ApplyOutcome::Duplicate);
    }

    #[test]
    fn test_checkpoint_restore() {
        let view = MaterializedView::new("clickstream-STATE-STORE", "clickstream");
        view.apply(update(Some("u1"), Some(json!({"page": "/"})), 0, 10));
        view.apply(update(Some("u2"), Some(json!({"page": "/cart"})), 1, 4));

        let checkpoint = view.checkpoint();
        assert_eq!(checkpoint.positions, BTreeMap::from([(0, 10), (1, 4)]));

        let restored = MaterializedView::new("clickstream-STATE-STORE", "clickstream");
        restored.restore(checkpoint);
        assert_eq!(restored.snapshot(), view.snapshot());
        assert_eq!(restored.positions(), view.positions());
        assert_eq!(
            restored.apply(update(Some("u1"), Some(json!({})), 0, 10)),
            ApplyOutcome::Duplicate
        );
    }
}
