//! Column and error sinks.
//!
//! Converters write through the [`ColumnSink`] trait so the conversion
//! pipeline never depends on a concrete storage layout; [`ValueColumn`] is
//! the in-memory nullable column used by [`crate::scanner::Batch`] and by
//! tests. Error reporting likewise flows through [`ErrorSink`], keeping the
//! validator testable without a live log.

use log::warn;

use crate::value::Value;

pub trait ColumnSink {
    fn append_value(&mut self, value: Value);
    fn append_null(&mut self);
    /// Appended for schema slots with no corresponding source field. For a
    /// nullable in-memory column the default is null.
    fn append_default(&mut self);
    fn row_count(&self) -> usize;
    /// Rolls the column back to `len` rows, discarding later appends.
    fn truncate(&mut self, len: usize);
}

/// Nullable in-memory column. Every cell is `Option<Value>` regardless of
/// the declared nullability of the destination; downstream filtering
/// decides whether non-nullable targets reject null rows.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ValueColumn {
    pub cells: Vec<Option<Value>>,
}

impl ValueColumn {
    pub fn new() -> Self {
        Self { cells: Vec::new() }
    }
}

impl ColumnSink for ValueColumn {
    fn append_value(&mut self, value: Value) {
        self.cells.push(Some(value));
    }

    fn append_null(&mut self) {
        self.cells.push(None);
    }

    fn append_default(&mut self) {
        self.cells.push(None);
    }

    fn row_count(&self) -> usize {
        self.cells.len()
    }

    fn truncate(&mut self, len: usize) {
        self.cells.truncate(len);
    }
}

pub trait ErrorSink {
    /// A discarded row with its diagnostic. Subject to the per-scan report
    /// cap; counting continues silently past it.
    fn report_error(&mut self, raw_row: &str, message: &str);

    /// Raw copy of a rejected record for the rejected-records feature.
    /// Independent of the report cap.
    fn report_rejected(&mut self, raw_row: &str, message: &str, source: &str);
}

/// Default sink: routes diagnostics to the log.
#[derive(Debug, Default)]
pub struct LoggingErrorSink;

impl ErrorSink for LoggingErrorSink {
    fn report_error(&mut self, raw_row: &str, message: &str) {
        warn!("Row rejected: {message}; row: '{raw_row}'");
    }

    fn report_rejected(&mut self, raw_row: &str, message: &str, source: &str) {
        warn!("Rejected record from {source}: {message}; row: '{raw_row}'");
    }
}

/// Test sink capturing every report.
#[derive(Debug, Default)]
pub struct CollectingErrorSink {
    pub errors: Vec<(String, String)>,
    pub rejected: Vec<(String, String, String)>,
}

impl ErrorSink for CollectingErrorSink {
    fn report_error(&mut self, raw_row: &str, message: &str) {
        self.errors.push((raw_row.to_string(), message.to_string()));
    }

    fn report_rejected(&mut self, raw_row: &str, message: &str, source: &str) {
        self.rejected
            .push((raw_row.to_string(), message.to_string(), source.to_string()));
    }
}
