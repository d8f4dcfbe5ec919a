//! Reference dataset loaded from object storage.

mod loader;
mod record;

pub use loader::{
    parse_csv, parse_row, DiscardReason, DiscardedRow, LoadReport, ReferenceDataLoader,
    ReferenceTable, RowOutcome, EXPECTED_COLUMNS,
};
pub use record::ReferenceRecord;
