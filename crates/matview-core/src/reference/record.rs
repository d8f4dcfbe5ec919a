//! Reference record type.

use serde::{Deserialize, Serialize};

/// One row of the reference dataset.
///
/// Columns map by position: `id, category, numeric_a, numeric_b` become
/// `key, category, quantity, score`. The source file labels the numeric
/// columns `price` and `quantity`; only the position is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    /// Unique key (column 0)
    pub key: String,
    /// Category (column 1)
    pub category: String,
    /// First numeric column (column 2)
    pub quantity: i32,
    /// Second numeric column (column 3)
    pub score: i32,
}

impl ReferenceRecord {
    /// Create a record.
    pub fn new(key: impl Into<String>, category: impl Into<String>, quantity: i32, score: i32) -> Self {
        Self {
            key: key.into(),
            category: category.into(),
            quantity,
            score,
        }
    }
}
