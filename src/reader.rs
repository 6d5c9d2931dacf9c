//! Record-level reading: buffer refill, end-of-file synthesis, and
//! plain-mode record/field splitting.
//!
//! A [`RecordReader`] pulls one logical row at a time out of its
//! [`ScanBuffer`], refilling from the [`ByteSource`] on demand. Plain mode
//! (no enclosure, no escape) lives here: records are byte spans ending at
//! the row delimiter and fields are zero-copy slices split on the column
//! delimiter. The enclosure/escape tokenizer shares this reader and is
//! implemented in [`crate::tokenizer`].

use log::trace;

use crate::{
    buffer::{DEFAULT_INIT_CAPACITY, DEFAULT_MAX_CAPACITY, ScanBuffer},
    errors::ScanError,
    scanner::ScanCounter,
    source::ByteSource,
};

/// Tokenization settings, immutable for the lifetime of one scan.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub column_delimiter: Vec<u8>,
    pub row_delimiter: Vec<u8>,
    /// Rows skipped once per file before the first record.
    pub skip_header: u64,
    pub trim_space: bool,
    pub enclose: Option<u8>,
    pub escape: Option<u8>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            column_delimiter: b",".to_vec(),
            row_delimiter: b"\n".to_vec(),
            skip_header: 0,
            trim_space: false,
            enclose: None,
            escape: None,
        }
    }
}

impl ParseOptions {
    /// Enclosure/escape tokenization applies iff either byte is set.
    pub fn enclosure_mode(&self) -> bool {
        self.enclose.is_some() || self.escape.is_some()
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.column_delimiter.is_empty() {
            return Err(ScanError::InvalidOptions(
                "column delimiter must not be empty".to_string(),
            ));
        }
        if self.row_delimiter.is_empty() {
            return Err(ScanError::InvalidOptions(
                "row delimiter must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// One raw row: a byte span inside the reader's buffer, row delimiter
/// excluded. Invalidated by the next record pulled from the same reader.
#[derive(Debug, Clone, Copy)]
pub struct Record {
    pub(crate) start: usize,
    pub(crate) end: usize,
}

impl Record {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

pub struct RecordReader<S: ByteSource> {
    pub(crate) source: S,
    pub(crate) buffer: ScanBuffer,
    pub(crate) options: ParseOptions,
    /// Auxiliary arena holding escape-resolved field bytes, rebuilt per row.
    pub(crate) unescape: Vec<u8>,
}

impl<S: ByteSource> RecordReader<S> {
    pub fn new(source: S, options: ParseOptions) -> Self {
        Self::with_capacity(source, options, DEFAULT_INIT_CAPACITY, DEFAULT_MAX_CAPACITY)
    }

    pub fn with_capacity(
        source: S,
        options: ParseOptions,
        init_capacity: usize,
        max_capacity: usize,
    ) -> Self {
        Self {
            source,
            buffer: ScanBuffer::new(init_capacity, max_capacity),
            options,
            unescape: Vec::new(),
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.identity()
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Requests up to `free_space()` bytes from the source. On a zero-byte
    /// read (source exhausted) the final unterminated line, if any, gets a
    /// synthesized row delimiter; an empty buffer at that point is the true
    /// end of the stream. Returns whether the buffer's limit advanced, so
    /// the quoted-field tokenizer can tell "more bytes arrived" from "the
    /// stream is dry".
    pub(crate) fn fill_buffer(&mut self, counter: &mut ScanCounter) -> Result<bool, ScanError> {
        if self.buffer.free_space() == 0 {
            return Err(ScanError::BufferExhausted);
        }
        counter.file_read_count += 1;
        let started = std::time::Instant::now();
        let read = self.source.read(self.buffer.unfilled());
        counter.read_elapsed += started.elapsed();
        let n = read?;
        self.buffer.add_limit(n);

        let available = self.buffer.available();
        let delimiter_len = self.options.row_delimiter.len();
        let mut advanced = n > 0;
        if n == 0 {
            if available == 0 {
                return Err(ScanError::EndOfStream(self.source.identity().to_string()));
            }
            let terminated = available >= delimiter_len
                && self
                    .buffer
                    .find(&self.options.row_delimiter, available - delimiter_len)
                    .is_some();
            if !terminated {
                // Reached the end of the file without a final record
                // delimiter, which is valid; add the delimiter ourselves.
                if self.buffer.free_space() < delimiter_len && !self.buffer.try_grow() {
                    return Err(ScanError::RecordTooLong(self.buffer.max_capacity()));
                }
                let delimiter = self.options.row_delimiter.clone();
                self.buffer.append(&delimiter);
                trace!("Synthesized row delimiter at end of {}", self.source.identity());
                advanced = true;
            }
        } else {
            counter.bytes_read += n as u64;
        }
        Ok(advanced)
    }

    /// Pulls the next record span, refilling (and compacting or growing the
    /// buffer) until a row delimiter is visible.
    pub fn next_record(&mut self, counter: &mut ScanCounter) -> Result<Record, ScanError> {
        let delimiter_len = self.options.row_delimiter.len();
        let mut searched = 0usize;
        loop {
            if let Some(offset) = self.buffer.find(&self.options.row_delimiter, searched) {
                let start = self.buffer.position();
                let record = Record {
                    start,
                    end: start + offset,
                };
                self.buffer.skip(offset + delimiter_len);
                return Ok(record);
            }
            // Re-scan only the tail that could hold a straddled delimiter.
            searched = self.buffer.available().saturating_sub(delimiter_len - 1);
            self.buffer.compact();
            if self.buffer.free_space() == 0 && !self.buffer.try_grow() {
                return Err(ScanError::RecordTooLong(self.buffer.max_capacity()));
            }
            self.fill_buffer(counter)?;
        }
    }

    pub fn record_bytes(&self, record: &Record) -> &[u8] {
        self.buffer.bytes(record.start, record.end)
    }

    /// Splits a record into zero-copy field slices on the column delimiter.
    /// An empty record yields zero fields; callers treat that as a blank
    /// row to skip.
    pub fn split_record<'a>(&'a self, record: &Record) -> Vec<&'a [u8]> {
        split_fields(
            self.record_bytes(record),
            &self.options.column_delimiter,
            self.options.trim_space,
        )
    }
}

pub(crate) fn trim_ascii_spaces(field: &[u8]) -> &[u8] {
    let start = field.iter().position(|&b| b != b' ').unwrap_or(field.len());
    let end = field.iter().rposition(|&b| b != b' ').map_or(start, |i| i + 1);
    &field[start..end]
}

fn split_fields<'a>(record: &'a [u8], delimiter: &[u8], trim_space: bool) -> Vec<&'a [u8]> {
    if record.is_empty() {
        return Vec::new();
    }
    let narrow = |field: &'a [u8]| {
        if trim_space {
            trim_ascii_spaces(field)
        } else {
            field
        }
    };
    let mut fields = Vec::new();
    let mut rest = record;
    loop {
        match rest
            .windows(delimiter.len())
            .position(|window| window == delimiter)
        {
            Some(at) => {
                fields.push(narrow(&rest[..at]));
                rest = &rest[at + delimiter.len()..];
            }
            None => {
                fields.push(narrow(rest));
                return fields;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn reader(data: &[u8], options: ParseOptions) -> RecordReader<MemorySource> {
        RecordReader::with_capacity(MemorySource::new(data.to_vec(), "mem"), options, 16, 64)
    }

    fn collect_records(data: &[u8], options: ParseOptions) -> Vec<Vec<u8>> {
        let mut reader = reader(data, options);
        let mut counter = ScanCounter::default();
        let mut records = Vec::new();
        loop {
            match reader.next_record(&mut counter) {
                Ok(record) => records.push(reader.record_bytes(&record).to_vec()),
                Err(err) if err.is_end_of_stream() => break,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
        records
    }

    #[test]
    fn records_split_on_row_delimiter() {
        let records = collect_records(b"a,b\nc,d\n", ParseOptions::default());
        assert_eq!(records, vec![b"a,b".to_vec(), b"c,d".to_vec()]);
    }

    #[test]
    fn missing_trailing_delimiter_is_synthesized() {
        let with = collect_records(b"a,b\nc,d\n", ParseOptions::default());
        let without = collect_records(b"a,b\nc,d", ParseOptions::default());
        assert_eq!(with, without);
    }

    #[test]
    fn multi_byte_row_delimiter_straddles_refills() {
        // The first fill stops after the \r of the first \r\n pair (16-byte
        // initial buffer), so the match must be found across the refill.
        let data = b"aaaaaaaaaaaaaaa\r\nbbb\r\nc\r\n";
        let options = ParseOptions {
            row_delimiter: b"\r\n".to_vec(),
            ..ParseOptions::default()
        };
        let records = collect_records(data, options);
        assert_eq!(
            records,
            vec![
                b"aaaaaaaaaaaaaaa".to_vec(),
                b"bbb".to_vec(),
                b"c".to_vec()
            ]
        );
    }

    #[test]
    fn record_longer_than_max_capacity_fails() {
        let data = vec![b'x'; 100];
        let mut reader = reader(&data, ParseOptions::default());
        let mut counter = ScanCounter::default();
        let err = reader.next_record(&mut counter).unwrap_err();
        assert!(matches!(err, ScanError::RecordTooLong(64)));
    }

    #[test]
    fn buffer_grows_for_records_between_init_and_max() {
        let mut data = vec![b'x'; 40];
        data.push(b'\n');
        let records = collect_records(&data, ParseOptions::default());
        assert_eq!(records[0].len(), 40);
    }

    #[test]
    fn split_record_yields_zero_copy_fields() {
        let mut reader = reader(b"a,,c\n", ParseOptions::default());
        let mut counter = ScanCounter::default();
        let record = reader.next_record(&mut counter).unwrap();
        let fields = reader.split_record(&record);
        assert_eq!(fields, vec![b"a".as_slice(), b"".as_slice(), b"c".as_slice()]);
    }

    #[test]
    fn split_record_honors_multi_byte_column_delimiter() {
        let options = ParseOptions {
            column_delimiter: b"||".to_vec(),
            ..ParseOptions::default()
        };
        let mut reader = reader(b"a||b|c||d\n", options);
        let mut counter = ScanCounter::default();
        let record = reader.next_record(&mut counter).unwrap();
        let fields = reader.split_record(&record);
        assert_eq!(
            fields,
            vec![b"a".as_slice(), b"b|c".as_slice(), b"d".as_slice()]
        );
    }

    #[test]
    fn trim_space_narrows_fields_without_mutation() {
        let options = ParseOptions {
            trim_space: true,
            ..ParseOptions::default()
        };
        let mut reader = reader(b" a , b b ,\n", options);
        let mut counter = ScanCounter::default();
        let record = reader.next_record(&mut counter).unwrap();
        let fields = reader.split_record(&record);
        assert_eq!(
            fields,
            vec![b"a".as_slice(), b"b b".as_slice(), b"".as_slice()]
        );
        // The underlying record bytes keep their spaces.
        assert_eq!(reader.record_bytes(&record), b" a , b b ,");
    }

    #[test]
    fn empty_record_yields_zero_fields() {
        let mut reader = reader(b"\na\n", ParseOptions::default());
        let mut counter = ScanCounter::default();
        let record = reader.next_record(&mut counter).unwrap();
        assert!(record.is_empty());
        assert!(reader.split_record(&record).is_empty());
    }

    #[test]
    fn counter_tracks_bytes_read() {
        let mut reader = reader(b"a,b\nc,d\n", ParseOptions::default());
        let mut counter = ScanCounter::default();
        reader.next_record(&mut counter).unwrap();
        assert_eq!(counter.bytes_read, 8);
        assert!(counter.file_read_count >= 1);
    }

    #[test]
    fn end_of_stream_carries_source_name() {
        let mut reader = reader(b"", ParseOptions::default());
        let mut counter = ScanCounter::default();
        let err = reader.next_record(&mut counter).unwrap_err();
        match err {
            ScanError::EndOfStream(name) => assert_eq!(name, "mem"),
            other => panic!("expected end of stream, got {other}"),
        }
    }
}
