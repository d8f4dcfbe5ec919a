//! Reference dataset loading.
//!
//! The dataset is read once at startup. Row-level problems are absorbed and
//! reported; only an unreadable file or a broken CSV stream is fatal.
//! Invalid UTF-8 is decoded with replacement characters, and blank lines
//! are not rows at all.

use super::ReferenceRecord;
use crate::storage::VirtualFileSystem;
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Number of columns a valid row carries.
pub const EXPECTED_COLUMNS: usize = 4;

/// Loaded records logged at debug level.
const SAMPLE_LOG_LIMIT: usize = 5;

/// Why a row was not loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// Fewer than four columns
    TooFewColumns {
        /// Columns present
        found: usize,
    },
    /// A numeric column did not parse as an integer
    InvalidNumber {
        /// Zero-based column index
        column: usize,
        /// Raw value
        value: String,
    },
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::TooFewColumns { found } => {
                write!(f, "expected {} columns, found {}", EXPECTED_COLUMNS, found)
            }
            DiscardReason::InvalidNumber { column, value } => {
                write!(f, "column {} is not an integer: '{}'", column, value)
            }
        }
    }
}

/// Result of parsing one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    /// Row produced a record
    Valid(ReferenceRecord),
    /// Row was skipped
    Discarded(DiscardReason),
}

/// A skipped row with its position in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscardedRow {
    /// One-based line number
    pub line: u64,
    /// Why it was skipped
    pub reason: DiscardReason,
}

/// Parse a single row.
///
/// Extra columns beyond the fourth are ignored.
pub fn parse_row<S: AsRef<str>>(fields: &[S]) -> RowOutcome {
    if fields.len() < EXPECTED_COLUMNS {
        return RowOutcome::Discarded(DiscardReason::TooFewColumns {
            found: fields.len(),
        });
    }

    let parse = |column: usize| -> std::result::Result<i32, DiscardReason> {
        let raw = fields[column].as_ref().trim();
        raw.parse::<i32>().map_err(|_| DiscardReason::InvalidNumber {
            column,
            value: raw.to_string(),
        })
    };

    let quantity = match parse(2) {
        Ok(v) => v,
        Err(reason) => return RowOutcome::Discarded(reason),
    };
    let score = match parse(3) {
        Ok(v) => v,
        Err(reason) => return RowOutcome::Discarded(reason),
    };

    RowOutcome::Valid(ReferenceRecord::new(
        fields[0].as_ref().trim(),
        fields[1].as_ref().trim(),
        quantity,
        score,
    ))
}

/// Read-only keyed table of reference records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceTable {
    records: HashMap<String, ReferenceRecord>,
}

impl ReferenceTable {
    /// Look up a record by key.
    pub fn get(&self, key: &str) -> Option<&ReferenceRecord> {
        self.records.get(key)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// Copy of the full table.
    pub fn snapshot(&self) -> HashMap<String, ReferenceRecord> {
        self.records.clone()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert(&mut self, record: ReferenceRecord) {
        self.records.insert(record.key.clone(), record);
    }
}

/// Loaded table plus the rows that were skipped.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Loaded records
    pub table: ReferenceTable,
    /// Skipped rows
    pub discarded: Vec<DiscardedRow>,
    /// Valid rows read, duplicates included
    pub rows_loaded: usize,
}

impl LoadReport {
    /// Number of skipped rows.
    pub fn discard_count(&self) -> usize {
        self.discarded.len()
    }
}

/// Parse CSV bytes into a report.
pub fn parse_csv(data: &[u8]) -> Result<LoadReport> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut report = LoadReport::default();

    for result in reader.byte_records() {
        let row = result.map_err(|e| Error::ReferenceData(format!("Malformed CSV: {}", e)))?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        let fields: Vec<_> = row.iter().map(String::from_utf8_lossy).collect();

        match parse_row(&fields) {
            RowOutcome::Valid(record) => {
                if report.rows_loaded < SAMPLE_LOG_LIMIT {
                    debug!(
                        key = %record.key,
                        category = %record.category,
                        quantity = record.quantity,
                        score = record.score,
                        "Loaded reference record"
                    );
                }
                report.rows_loaded += 1;
                report.table.insert(record);
            }
            RowOutcome::Discarded(reason) => {
                match &reason {
                    DiscardReason::TooFewColumns { found } => {
                        warn!(line, columns = found, "Skipping invalid row with {} columns", found)
                    }
                    DiscardReason::InvalidNumber { .. } => {
                        warn!(line, reason = %reason, "Skipping row with invalid number format")
                    }
                }
                report.discarded.push(DiscardedRow { line, reason });
            }
        }
    }

    Ok(report)
}

/// Loads the reference dataset through a virtual filesystem.
pub struct ReferenceDataLoader<'a> {
    vfs: &'a dyn VirtualFileSystem,
}

impl<'a> ReferenceDataLoader<'a> {
    /// Create a loader reading through `vfs`.
    pub fn new(vfs: &'a dyn VirtualFileSystem) -> Self {
        Self { vfs }
    }

    /// Read and parse the dataset at `path`.
    pub async fn load(&self, path: &str) -> Result<LoadReport> {
        info!(path = %path, "Loading reference data");
        let data = self.vfs.open(path).await?;
        let report = parse_csv(&data)?;

        info!(
            path = %path,
            records = report.table.len(),
            rows = report.rows_loaded,
            discarded = report.discard_count(),
            "Reference data loaded"
        );
        Ok(report)
    }
}
