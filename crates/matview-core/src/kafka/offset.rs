//! Offset tracking for table source partitions.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// Tracks applied and committed offsets per (topic, partition).
pub struct OffsetTracker {
    /// Last applied offset per partition
    applied_offsets: DashMap<(String, i32), AtomicI64>,

    /// Last committed offset per partition
    committed_offsets: DashMap<(String, i32), AtomicI64>,
}

impl OffsetTracker {
    /// Create a new offset tracker.
    pub fn new() -> Self {
        Self {
            applied_offsets: DashMap::new(),
            committed_offsets: DashMap::new(),
        }
    }

    /// Record the last applied offset for a partition.
    pub fn update_applied(&self, topic: &str, partition: i32, offset: i64) {
        let key = (topic.to_string(), partition);
        self.applied_offsets
            .entry(key)
            .and_modify(|v| v.store(offset, Ordering::SeqCst))
            .or_insert_with(|| AtomicI64::new(offset));
    }

    /// Get the last applied offset for a partition.
    pub fn get_applied(&self, topic: &str, partition: i32) -> Option<i64> {
        let key = (topic.to_string(), partition);
        self.applied_offsets
            .get(&key)
            .map(|v| v.load(Ordering::SeqCst))
    }

    /// Mark an offset as committed.
    pub fn mark_committed(&self, topic: &str, partition: i32, offset: i64) {
        let key = (topic.to_string(), partition);
        self.committed_offsets
            .entry(key)
            .and_modify(|v| v.store(offset, Ordering::SeqCst))
            .or_insert_with(|| AtomicI64::new(offset));
    }

    /// Get the committed offset for a partition.
    pub fn get_committed(&self, topic: &str, partition: i32) -> Option<i64> {
        let key = (topic.to_string(), partition);
        self.committed_offsets
            .get(&key)
            .map(|v| v.load(Ordering::SeqCst))
    }

    /// Partitions of `topic` whose applied offset is ahead of the committed
    /// one, as (partition, applied offset), sorted by partition.
    pub fn pending(&self, topic: &str) -> Vec<(i32, i64)> {
        let mut pending: Vec<(i32, i64)> = self
            .applied_offsets
            .iter()
            .filter(|entry| entry.key().0 == topic)
            .filter_map(|entry| {
                let partition = entry.key().1;
                let applied = entry.value().load(Ordering::SeqCst);
                match self.get_committed(topic, partition) {
                    Some(committed) if committed >= applied => None,
                    _ => Some((partition, applied)),
                }
            })
            .collect();
        pending.sort_unstable();
        pending
    }
}

impl Default for OffsetTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_tracker() {
        let tracker = OffsetTracker::new();

        tracker.update_applied("sales", 0, 100);
        assert_eq!(tracker.get_applied("sales", 0), Some(100));

        tracker.mark_committed("sales", 0, 50);
        assert_eq!(tracker.get_committed("sales", 0), Some(50));
        assert_eq!(tracker.pending("sales"), vec![(0, 100)]);

        tracker.update_applied("sales", 0, 200);
        assert_eq!(tracker.get_applied("sales", 0), Some(200));
        assert_eq!(tracker.get_committed("clickstream", 0), None);
    }

    #[test]
    fn test_pending_partitions() {
        let tracker = OffsetTracker::new();

        tracker.update_applied("sales", 1, 20);
        tracker.update_applied("sales", 0, 10);
        tracker.update_applied("clickstream", 0, 5);
        assert_eq!(tracker.pending("sales"), vec![(0, 10), (1, 20)]);

        tracker.mark_committed("sales", 0, 10);
        assert_eq!(tracker.pending("sales"), vec![(1, 20)]);

        tracker.mark_committed("sales", 1, 20);
        assert!(tracker.pending("sales").is_empty());
        assert_eq!(tracker.pending("clickstream"), vec![(0, 5)]);
    }
}
