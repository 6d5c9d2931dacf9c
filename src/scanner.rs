//! Scan orchestration: batch loop, row validation, capped error
//! reporting, and the schema-inference driver.
//!
//! A [`CsvScanner`] owns one reader over one byte source and produces
//! [`Batch`]es of typed, nullable columns. Row-level defects (shape
//! mismatch, invalid UTF-8, strict-mode conversion failure) discard the
//! row, bump `rows_filtered`, and emit a diagnostic while the count stays
//! at or under [`REPORT_ERROR_MAX`]; they never abort the batch. The one
//! exception is the Query context, where a row narrower than the schema
//! fails the whole scan, since a query cannot silently drop data.

use std::time::{Duration, Instant};

use log::debug;

use crate::{
    convert::{ConvertOptions, FieldConverter},
    display_bytes,
    errors::ScanError,
    reader::{ParseOptions, RecordReader},
    schema::{SlotMeta, SlotSchema, infer_field_type, merge_candidates},
    sink::{ColumnSink, ErrorSink, LoggingErrorSink, ValueColumn},
    source::ByteSource,
    tokenizer::CsvRow,
};

/// Detailed diagnostics stop after this many filtered rows; counting
/// continues silently.
pub const REPORT_ERROR_MAX: u64 = 50;

/// Who is consuming the scan; decides the column-count policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanContext {
    /// Bulk load: row width must match the schema exactly.
    Load,
    /// `INSERT ... FROM FILES`: narrow rows are filtered, extra trailing
    /// fields are ignored.
    InsertFromFiles,
    /// Interactive query over files: a narrow row fails the scan.
    Query,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub parse: ParseOptions,
    pub context: ScanContext,
    /// Strict mode fails rows on malformed values; lenient mode converts
    /// them to null.
    pub strict_mode: bool,
    /// Disables column-count enforcement in every context.
    pub flexible_column_mapping: bool,
    pub schema_sample_rows: usize,
    /// Accepted-row capacity of one batch.
    pub chunk_capacity: usize,
    /// Mirror rejected rows to the rejection sink, uncapped.
    pub log_rejected_records: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            parse: ParseOptions::default(),
            context: ScanContext::Load,
            strict_mode: false,
            flexible_column_mapping: false,
            schema_sample_rows: 100,
            chunk_capacity: 4096,
            log_rejected_records: false,
        }
    }
}

/// Per-scan counters, owned by one scanner and aggregated by the caller
/// across scanner instances.
#[derive(Debug, Default, Clone)]
pub struct ScanCounter {
    pub rows_filtered: u64,
    pub bytes_read: u64,
    pub file_read_count: u64,
    pub read_elapsed: Duration,
    pub convert_elapsed: Duration,
    pub total_elapsed: Duration,
}

impl ScanCounter {
    pub fn merge(&mut self, other: &ScanCounter) {
        self.rows_filtered += other.rows_filtered;
        self.bytes_read += other.bytes_read;
        self.file_read_count += other.file_read_count;
        self.read_elapsed += other.read_elapsed;
        self.convert_elapsed += other.convert_elapsed;
        self.total_elapsed += other.total_elapsed;
    }
}

/// One batch of converted rows: a nullable [`ValueColumn`] per retained
/// schema slot.
#[derive(Debug, Default)]
pub struct Batch {
    pub columns: Vec<ValueColumn>,
    rows: usize,
}

impl Batch {
    fn new(column_count: usize) -> Self {
        Self {
            columns: vec![ValueColumn::new(); column_count],
            rows: 0,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    fn commit_row(&mut self) {
        self.rows += 1;
    }

    /// Strict-mode rollback: drops any cells appended past `rows`.
    fn truncate_rows(&mut self, rows: usize) {
        for column in &mut self.columns {
            column.truncate(rows);
        }
    }
}

/// Tokenization strategy, fixed at construction from the parse options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanMode {
    Plain,
    Enclosed,
}

pub struct CsvScanner<S: ByteSource> {
    reader: RecordReader<S>,
    schema: SlotSchema,
    converters: Vec<FieldConverter>,
    options: ScanOptions,
    mode: ScanMode,
    counter: ScanCounter,
    row: CsvRow,
    headers_skipped: u64,
}

impl<S: ByteSource> CsvScanner<S> {
    /// One converter is allocated per retained slot; ignored positions
    /// (`None` entries) never get one.
    pub fn new(source: S, schema: SlotSchema, options: ScanOptions) -> Result<Self, ScanError> {
        options.parse.validate()?;
        let converters = schema
            .slots
            .iter()
            .flatten()
            .map(|meta| FieldConverter::new(meta.column_type))
            .collect();
        let mode = if options.parse.enclosure_mode() {
            ScanMode::Enclosed
        } else {
            ScanMode::Plain
        };
        Ok(Self {
            reader: RecordReader::new(source, options.parse.clone()),
            schema,
            converters,
            options,
            mode,
            counter: ScanCounter::default(),
            row: CsvRow::new(),
            headers_skipped: 0,
        })
    }

    pub fn counter(&self) -> &ScanCounter {
        &self.counter
    }

    pub fn schema(&self) -> &SlotSchema {
        &self.schema
    }

    pub fn source_name(&self) -> &str {
        self.reader.source_name()
    }

    /// Consumes `skip_header` rows once per file. Skipping uses the raw
    /// row-delimiter search in both modes. Progress is kept across a
    /// timeout so a retry does not over-skip.
    fn prepare(&mut self) -> Result<(), ScanError> {
        let skip = self.options.parse.skip_header;
        while self.headers_skipped < skip {
            match self.reader.next_record(&mut self.counter) {
                Ok(_) => self.headers_skipped += 1,
                Err(err) if err.is_end_of_stream() => {
                    return Err(ScanError::EndOfStream(format!(
                        "The parameter 'skip_header' is set to {}, but there are only {} rows in {}",
                        skip,
                        self.headers_skipped,
                        self.reader.source_name()
                    )));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Produces the next batch, reporting row-level defects to the log.
    /// Terminates with `Err(ScanError::EndOfStream)` once the stream is
    /// exhausted and every accepted row has been returned.
    pub fn next_batch(&mut self) -> Result<Batch, ScanError> {
        let mut errors = LoggingErrorSink;
        self.next_batch_with(&mut errors)
    }

    /// Like [`next_batch`](Self::next_batch) with an explicit error sink.
    pub fn next_batch_with(&mut self, errors: &mut dyn ErrorSink) -> Result<Batch, ScanError> {
        let started = Instant::now();
        let result = match self.mode {
            ScanMode::Plain => self.parse_plain(errors),
            ScanMode::Enclosed => self.parse_enclosed(errors),
        };
        self.counter.total_elapsed += started.elapsed();
        result
    }

    fn parse_plain(&mut self, errors: &mut dyn ErrorSink) -> Result<Batch, ScanError> {
        self.prepare()?;
        let mut batch = Batch::new(self.converters.len());
        let convert_options = ConvertOptions {
            invalid_field_as_null: !self.options.strict_mode,
        };
        while batch.row_count() < self.options.chunk_capacity {
            let record = match self.reader.next_record(&mut self.counter) {
                Ok(record) => record,
                Err(err) if err.is_end_of_stream() || err.is_timeout() => {
                    // A timeout before the first accepted row propagates so
                    // the caller can retry; after that the partial batch is
                    // a success and the timeout resurfaces on the next call.
                    if batch.row_count() > 0 {
                        break;
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            };
            if record.is_empty() {
                continue;
            }
            let fields = self.reader.split_record(&record);
            let actual = fields.len();
            match self.validate_shape(actual, || {
                String::from_utf8_lossy(self.reader.record_bytes(&record)).into_owned()
            }) {
                ShapeVerdict::Accept => {}
                ShapeVerdict::Filter(message) => {
                    let raw = String::from_utf8_lossy(self.reader.record_bytes(&record));
                    Self::filter_row(
                        &mut self.counter,
                        &self.options,
                        errors,
                        &raw,
                        &message,
                        self.reader.source_name(),
                    );
                    continue;
                }
                ShapeVerdict::Fail(message) => return Err(ScanError::DataQuality(message)),
            }
            let raw = self.reader.record_bytes(&record);
            if std::str::from_utf8(raw).is_err() {
                let raw = String::from_utf8_lossy(raw).into_owned();
                Self::filter_row(
                    &mut self.counter,
                    &self.options,
                    errors,
                    &raw,
                    "Invalid UTF-8 row",
                    self.reader.source_name(),
                );
                continue;
            }

            let filled = Instant::now();
            let row_start = batch.row_count();
            let mut accepted = true;
            let mut sink_index = 0;
            for position in 0..self.schema.field_count() {
                let Some(slot) = &self.schema.slots[position] else {
                    continue;
                };
                if position >= actual {
                    // Schema is wider than the row: missing trailing
                    // fields become defaults.
                    batch.columns[sink_index].append_default();
                    sink_index += 1;
                    continue;
                }
                let field = fields[position];
                if !self.converters[sink_index].convert(
                    field,
                    &mut batch.columns[sink_index],
                    &convert_options,
                ) {
                    batch.truncate_rows(row_start);
                    let message = value_mismatch_message(position, field, slot);
                    let raw = String::from_utf8_lossy(self.reader.record_bytes(&record));
                    Self::filter_row(
                        &mut self.counter,
                        &self.options,
                        errors,
                        &raw,
                        &message,
                        self.reader.source_name(),
                    );
                    accepted = false;
                    break;
                }
                sink_index += 1;
            }
            if accepted {
                batch.commit_row();
            }
            self.counter.convert_elapsed += filled.elapsed();
        }
        if batch.row_count() > 0 {
            Ok(batch)
        } else {
            Err(ScanError::EndOfStream(
                self.reader.source_name().to_string(),
            ))
        }
    }

    fn parse_enclosed(&mut self, errors: &mut dyn ErrorSink) -> Result<Batch, ScanError> {
        self.prepare()?;
        let mut batch = Batch::new(self.converters.len());
        let convert_options = ConvertOptions {
            invalid_field_as_null: !self.options.strict_mode,
        };
        while batch.row_count() < self.options.chunk_capacity {
            match self.reader.next_row(&mut self.row, &mut self.counter) {
                Ok(()) => {}
                Err(err) if err.is_end_of_stream() || err.is_timeout() => {
                    if batch.row_count() > 0 {
                        break;
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
            if self.row.is_empty() {
                continue;
            }
            let actual = self.row.field_count();
            match self.validate_shape(actual, || {
                String::from_utf8_lossy(self.reader.row_bytes(&self.row)).into_owned()
            }) {
                ShapeVerdict::Accept => {}
                ShapeVerdict::Filter(message) => {
                    let raw = String::from_utf8_lossy(self.reader.row_bytes(&self.row));
                    Self::filter_row(
                        &mut self.counter,
                        &self.options,
                        errors,
                        &raw,
                        &message,
                        self.reader.source_name(),
                    );
                    continue;
                }
                ShapeVerdict::Fail(message) => return Err(ScanError::DataQuality(message)),
            }
            let raw = self.reader.row_bytes(&self.row);
            if std::str::from_utf8(raw).is_err() {
                let raw = String::from_utf8_lossy(raw).into_owned();
                Self::filter_row(
                    &mut self.counter,
                    &self.options,
                    errors,
                    &raw,
                    "Invalid UTF-8 row",
                    self.reader.source_name(),
                );
                continue;
            }

            let filled = Instant::now();
            let row_start = batch.row_count();
            let mut accepted = true;
            let mut sink_index = 0;
            for position in 0..self.schema.field_count() {
                let Some(slot) = &self.schema.slots[position] else {
                    continue;
                };
                if position >= actual {
                    batch.columns[sink_index].append_default();
                    sink_index += 1;
                    continue;
                }
                let field = self.reader.field_bytes(&self.row.spans[position]);
                if !self.converters[sink_index].convert(
                    field,
                    &mut batch.columns[sink_index],
                    &convert_options,
                ) {
                    batch.truncate_rows(row_start);
                    let message = value_mismatch_message(position, field, slot);
                    let raw = String::from_utf8_lossy(self.reader.row_bytes(&self.row));
                    Self::filter_row(
                        &mut self.counter,
                        &self.options,
                        errors,
                        &raw,
                        &message,
                        self.reader.source_name(),
                    );
                    accepted = false;
                    break;
                }
                sink_index += 1;
            }
            if accepted {
                batch.commit_row();
            }
            self.counter.convert_elapsed += filled.elapsed();
        }
        if batch.row_count() > 0 {
            Ok(batch)
        } else {
            Err(ScanError::EndOfStream(
                self.reader.source_name().to_string(),
            ))
        }
    }

    fn validate_shape(&self, actual: usize, raw_row: impl Fn() -> String) -> ShapeVerdict {
        if self.options.flexible_column_mapping {
            return ShapeVerdict::Accept;
        }
        let expected = self.schema.field_count();
        let mismatched = match self.options.context {
            ScanContext::Load => actual != expected,
            ScanContext::InsertFromFiles | ScanContext::Query => actual < expected,
        };
        if !mismatched {
            return ShapeVerdict::Accept;
        }
        if self.options.context == ScanContext::Query {
            ShapeVerdict::Fail(column_mismatch_message_for_query(
                expected,
                actual,
                &self.options.parse,
                &raw_row(),
                self.reader.source_name(),
            ))
        } else {
            ShapeVerdict::Filter(column_mismatch_message_for_load(
                expected,
                actual,
                &self.options.parse,
            ))
        }
    }

    fn filter_row(
        counter: &mut ScanCounter,
        options: &ScanOptions,
        errors: &mut dyn ErrorSink,
        raw_row: &str,
        message: &str,
        source: &str,
    ) {
        counter.rows_filtered += 1;
        if counter.rows_filtered <= REPORT_ERROR_MAX {
            errors.report_error(raw_row, message);
        }
        if options.log_rejected_records {
            errors.report_rejected(raw_row, message, source);
        }
    }

    /// Samples up to `schema_sample_rows` non-blank rows and yields one
    /// candidate schema per row; blank rows do not consume a sample slot.
    pub fn infer_candidates(&mut self) -> Result<Vec<SlotSchema>, ScanError> {
        self.prepare()?;
        let mut candidates = Vec::new();
        if self.mode == ScanMode::Enclosed {
            while candidates.len() < self.options.schema_sample_rows {
                match self.reader.next_row(&mut self.row, &mut self.counter) {
                    Ok(()) => {}
                    Err(err) if err.is_end_of_stream() => break,
                    Err(err) => return Err(err),
                }
                if self.row.is_empty() {
                    continue;
                }
                let types = self
                    .row
                    .spans
                    .iter()
                    .map(|span| infer_field_type(self.reader.field_bytes(span)))
                    .collect::<Vec<_>>();
                candidates.push(SlotSchema::from_types(&types));
            }
        } else {
            while candidates.len() < self.options.schema_sample_rows {
                let record = match self.reader.next_record(&mut self.counter) {
                    Ok(record) => record,
                    Err(err) if err.is_end_of_stream() => break,
                    Err(err) => return Err(err),
                };
                if record.is_empty() {
                    continue;
                }
                let types = self
                    .reader
                    .split_record(&record)
                    .iter()
                    .map(|field| infer_field_type(field))
                    .collect::<Vec<_>>();
                candidates.push(SlotSchema::from_types(&types));
            }
        }
        debug!(
            "Sampled {} candidate schema(s) from {}",
            candidates.len(),
            self.reader.source_name()
        );
        Ok(candidates)
    }

    /// Convenience over [`infer_candidates`](Self::infer_candidates) plus
    /// the widening merge.
    pub fn infer_schema(&mut self) -> Result<SlotSchema, ScanError> {
        let candidates = self.infer_candidates()?;
        Ok(merge_candidates(&candidates))
    }
}

enum ShapeVerdict {
    Accept,
    Filter(String),
    Fail(String),
}

fn column_mismatch_message_for_load(
    expected: usize,
    actual: usize,
    parse: &ParseOptions,
) -> String {
    format!(
        "Target column count: {expected} doesn't match source value column count: {actual}. \
         Column separator: {}, Row delimiter: {}",
        display_bytes(&parse.column_delimiter),
        display_bytes(&parse.row_delimiter)
    )
}

fn column_mismatch_message_for_query(
    expected: usize,
    actual: usize,
    parse: &ParseOptions,
    row: &str,
    filename: &str,
) -> String {
    format!(
        "Schema column count: {expected} doesn't match source value column count: {actual}. \
         Column separator: {}, Row delimiter: {}, Row: '{row}', File: {filename}. \
         Consider enabling flexible column mapping",
        display_bytes(&parse.column_delimiter),
        display_bytes(&parse.row_delimiter)
    )
}

fn value_mismatch_message(position: usize, field: &[u8], slot: &SlotMeta) -> String {
    format!(
        "The field (name = {}, pos = {position}) could not be converted. Type: {}, \
         Value length: {}, Value: '{}'",
        slot.name,
        slot.column_type,
        field.len(),
        String::from_utf8_lossy(field)
    )
}
