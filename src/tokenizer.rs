//! Enclosure/escape-aware row tokenization.
//!
//! This mode produces a [`CsvRow`] of [`FieldSpan`]s in one pass over the
//! buffer, honoring an enclosure byte (fields may contain delimiters when
//! wrapped) and an escape byte (escape + any byte yields that byte
//! literally). Untouched fields stay zero-copy spans into the primary
//! buffer; any field whose bytes had to be rewritten (doubled enclosure,
//! escape sequences, content spliced around a closing quote) is copied,
//! resolved, into the reader's unescape arena and its span points there.
//! The arena is cleared and rebuilt per row.
//!
//! Refills happen transparently mid-field: when a quoted field's closing
//! delimiter is not yet buffered, the tokenizer compacts (rebasing every
//! recorded span and cursor by the shift), grows if the buffer is full,
//! and reads more. An open quote when the stream is dry is an
//! [`ScanError::UnterminatedQuotedField`].

use crate::{
    errors::ScanError,
    reader::RecordReader,
    scanner::ScanCounter,
    source::ByteSource,
};

/// Where one field's bytes live. `Buffer` spans index the reader's primary
/// buffer; `Unescaped` spans index its unescape arena. One accessor,
/// [`RecordReader::field_bytes`], resolves either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSpan {
    Buffer { start: usize, len: usize },
    Unescaped { start: usize, len: usize },
}

impl FieldSpan {
    /// True when the field's bytes were rewritten into the unescape arena.
    pub fn is_escaped(&self) -> bool {
        matches!(self, FieldSpan::Unescaped { .. })
    }

    pub fn len(&self) -> usize {
        match *self {
            FieldSpan::Buffer { len, .. } | FieldSpan::Unescaped { len, .. } => len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One tokenized row: ordered column spans plus the raw-byte range of the
/// row inside the primary buffer (row delimiter excluded), kept for UTF-8
/// validation and diagnostics. Valid until the next row is pulled.
#[derive(Debug, Default, Clone)]
pub struct CsvRow {
    pub spans: Vec<FieldSpan>,
    pub(crate) parsed_start: usize,
    pub(crate) parsed_end: usize,
}

impl CsvRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field_count(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    fn clear(&mut self) {
        self.spans.clear();
        self.parsed_start = 0;
        self.parsed_end = 0;
    }
}

enum Terminator {
    Column,
    Row,
    /// Stream went dry without a row delimiter (an escape consumed the
    /// synthesized one); the row ends where the data does.
    Dry,
}

impl<S: ByteSource> RecordReader<S> {
    /// Tokenizes the next row in place. A blank row yields zero spans;
    /// callers skip those. End of stream surfaces as
    /// `Err(ScanError::EndOfStream)` with no row produced.
    pub fn next_row(&mut self, row: &mut CsvRow, counter: &mut ScanCounter) -> Result<(), ScanError> {
        row.clear();
        self.unescape.clear();
        let cur = self.buffer.position();
        let mut tokenizer = Tokenizer {
            col_delim: self.options.column_delimiter.clone(),
            row_delim: self.options.row_delimiter.clone(),
            enclose: self.options.enclose,
            escape: self.options.escape,
            trim: self.options.trim_space,
            reader: self,
            row,
            counter,
            cur,
            content_start: cur,
            mark: cur,
            arena_start: 0,
            copying: false,
            trailing_spaces: 0,
        };
        tokenizer.run()
    }

    /// Resolves a span to its bytes, in whichever storage owns them.
    pub fn field_bytes(&self, span: &FieldSpan) -> &[u8] {
        match *span {
            FieldSpan::Buffer { start, len } => self.buffer.bytes(start, start + len),
            FieldSpan::Unescaped { start, len } => &self.unescape[start..start + len],
        }
    }

    /// The raw bytes of a tokenized row, row delimiter excluded.
    pub fn row_bytes(&self, row: &CsvRow) -> &[u8] {
        self.buffer.bytes(row.parsed_start, row.parsed_end)
    }
}

struct Tokenizer<'a, S: ByteSource> {
    reader: &'a mut RecordReader<S>,
    row: &'a mut CsvRow,
    counter: &'a mut ScanCounter,
    col_delim: Vec<u8>,
    row_delim: Vec<u8>,
    enclose: Option<u8>,
    escape: Option<u8>,
    trim: bool,
    /// Scan cursor, absolute in the buffer. The read position itself stays
    /// at the row start until the row completes.
    cur: usize,
    /// Start of the current field's content (past any opening quote).
    content_start: usize,
    /// End of a quoted field's interior, pinned across post-quote scanning.
    mark: usize,
    arena_start: usize,
    copying: bool,
    trailing_spaces: usize,
}

impl<S: ByteSource> Tokenizer<'_, S> {
    fn run(&mut self) -> Result<(), ScanError> {
        if !self.ensure_ahead(1)? {
            return Err(ScanError::EndOfStream(
                self.reader.source_name().to_string(),
            ));
        }
        if self.at_sequence(true)? {
            // Blank row: zero columns.
            let consumed = self.row_delim.len();
            self.finish(0, consumed);
            return Ok(());
        }
        loop {
            match self.parse_field()? {
                Terminator::Column => self.cur += self.col_delim.len(),
                Terminator::Row => {
                    let end = self.cur;
                    self.cur += self.row_delim.len();
                    let consumed = self.cur - self.reader.buffer.position();
                    self.finish(end - self.reader.buffer.position(), consumed);
                    return Ok(());
                }
                Terminator::Dry => {
                    let len = self.cur - self.reader.buffer.position();
                    self.finish(len, len);
                    return Ok(());
                }
            }
        }
    }

    fn finish(&mut self, raw_len: usize, consumed: usize) {
        let start = self.reader.buffer.position();
        self.row.parsed_start = start;
        self.row.parsed_end = start + raw_len;
        self.reader.buffer.skip(consumed);
    }

    fn parse_field(&mut self) -> Result<Terminator, ScanError> {
        self.copying = false;
        self.trailing_spaces = 0;
        self.arena_start = self.reader.unescape.len();
        if self.trim {
            while self.ensure_ahead(1)? && self.byte(0) == b' ' {
                self.cur += 1;
            }
        }
        self.content_start = self.cur;
        if let Some(quote) = self.enclose {
            if self.ensure_ahead(1)? && self.byte(0) == quote {
                return self.parse_quoted(quote);
            }
        }
        self.parse_unquoted()
    }

    fn parse_unquoted(&mut self) -> Result<Terminator, ScanError> {
        loop {
            if self.at_sequence(true)? {
                self.push_unquoted_span();
                return Ok(Terminator::Row);
            }
            if self.at_sequence(false)? {
                self.push_unquoted_span();
                return Ok(Terminator::Column);
            }
            if !self.ensure_ahead(1)? {
                self.push_unquoted_span();
                return Ok(Terminator::Dry);
            }
            let b = self.byte(0);
            if Some(b) == self.escape {
                self.start_copy(self.cur);
                if self.ensure_ahead(2)? {
                    let literal = self.byte(1);
                    self.reader.unescape.push(literal);
                    self.cur += 2;
                } else {
                    // Dangling escape at the end of the stream.
                    self.reader.unescape.push(b);
                    self.cur += 1;
                }
                self.trailing_spaces = 0;
                continue;
            }
            if self.copying {
                self.reader.unescape.push(b);
            }
            self.trailing_spaces = if b == b' ' { self.trailing_spaces + 1 } else { 0 };
            self.cur += 1;
        }
    }

    fn parse_quoted(&mut self, quote: u8) -> Result<Terminator, ScanError> {
        self.cur += 1;
        self.content_start = self.cur;
        loop {
            if !self.ensure_ahead(1)? {
                return Err(ScanError::UnterminatedQuotedField(
                    self.reader.source_name().to_string(),
                ));
            }
            let b = self.byte(0);
            if b == quote {
                if self.ensure_ahead(2)? && self.byte(1) == quote {
                    // Doubled enclosure: one literal quote byte.
                    self.start_copy(self.cur);
                    self.reader.unescape.push(quote);
                    self.cur += 2;
                    continue;
                }
                break;
            }
            if Some(b) == self.escape {
                if !self.ensure_ahead(2)? {
                    return Err(ScanError::UnterminatedQuotedField(
                        self.reader.source_name().to_string(),
                    ));
                }
                self.start_copy(self.cur);
                let literal = self.byte(1);
                self.reader.unescape.push(literal);
                self.cur += 2;
                continue;
            }
            if self.copying {
                self.reader.unescape.push(b);
            }
            self.cur += 1;
        }
        self.mark = self.cur;
        self.cur += 1;
        if self.trim {
            while self.ensure_ahead(1)? && self.byte(0) == b' ' {
                self.cur += 1;
            }
        }
        if self.at_sequence(true)? {
            self.push_quoted_span();
            return Ok(Terminator::Row);
        }
        if self.at_sequence(false)? {
            self.push_quoted_span();
            return Ok(Terminator::Column);
        }
        if !self.ensure_ahead(1)? {
            self.push_quoted_span();
            return Ok(Terminator::Dry);
        }
        // Bytes between the closing quote and the next delimiter join the
        // field as literal content, which forces the copied representation.
        self.start_copy(self.mark);
        self.trailing_spaces = 0;
        self.parse_unquoted()
    }

    /// Begins the copied representation: the field's bytes so far,
    /// `[content_start, upto)`, move into the arena.
    fn start_copy(&mut self, upto: usize) {
        if !self.copying {
            let interior = self.reader.buffer.bytes(self.content_start, upto);
            self.reader.unescape.extend_from_slice(interior);
            self.copying = true;
        }
    }

    fn push_unquoted_span(&mut self) {
        let span = if self.copying {
            let mut len = self.reader.unescape.len() - self.arena_start;
            if self.trim {
                len -= self.trailing_spaces;
                self.reader.unescape.truncate(self.arena_start + len);
            }
            FieldSpan::Unescaped {
                start: self.arena_start,
                len,
            }
        } else {
            let mut end = self.cur;
            if self.trim {
                end -= self.trailing_spaces;
            }
            FieldSpan::Buffer {
                start: self.content_start,
                len: end - self.content_start,
            }
        };
        self.row.spans.push(span);
    }

    fn push_quoted_span(&mut self) {
        let span = if self.copying {
            FieldSpan::Unescaped {
                start: self.arena_start,
                len: self.reader.unescape.len() - self.arena_start,
            }
        } else {
            FieldSpan::Buffer {
                start: self.content_start,
                len: self.mark - self.content_start,
            }
        };
        self.row.spans.push(span);
    }

    fn byte(&self, offset: usize) -> u8 {
        self.reader.buffer.bytes(self.cur + offset, self.cur + offset + 1)[0]
    }

    /// Guarantees `n` bytes are buffered at the cursor, refilling as
    /// needed. False means the stream is dry with fewer than `n` bytes
    /// left.
    fn ensure_ahead(&mut self, n: usize) -> Result<bool, ScanError> {
        while self.reader.buffer.limit() < self.cur + n {
            if !self.refill()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether the cursor sits on the row (`true`) or column (`false`)
    /// delimiter sequence.
    fn at_sequence(&mut self, row_delimiter: bool) -> Result<bool, ScanError> {
        let len = if row_delimiter {
            self.row_delim.len()
        } else {
            self.col_delim.len()
        };
        if !self.ensure_ahead(len)? {
            return Ok(false);
        }
        let seq = if row_delimiter {
            &self.row_delim
        } else {
            &self.col_delim
        };
        Ok(self.reader.buffer.matches_at(self.cur, seq))
    }

    /// One refill round: compact (rebasing spans and cursors) or grow when
    /// full, then read. Returns whether the buffer's limit advanced.
    fn refill(&mut self) -> Result<bool, ScanError> {
        if self.reader.buffer.free_space() == 0 {
            let shift = self.reader.buffer.compact();
            if self.reader.buffer.free_space() == 0 && !self.reader.buffer.try_grow() {
                return Err(ScanError::RecordTooLong(self.reader.buffer.max_capacity()));
            }
            if shift > 0 {
                self.cur -= shift;
                self.content_start -= shift;
                self.mark -= shift;
                for span in &mut self.row.spans {
                    if let FieldSpan::Buffer { start, .. } = span {
                        *start -= shift;
                    }
                }
            }
        }
        self.reader.fill_buffer(self.counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reader::ParseOptions, source::MemorySource};

    fn enclosure_options() -> ParseOptions {
        ParseOptions {
            enclose: Some(b'"'),
            escape: Some(b'\\'),
            ..ParseOptions::default()
        }
    }

    fn reader_with(
        data: &[u8],
        options: ParseOptions,
        init: usize,
        max: usize,
    ) -> RecordReader<MemorySource> {
        RecordReader::with_capacity(MemorySource::new(data.to_vec(), "mem"), options, init, max)
    }

    fn tokenize_all(data: &[u8], options: ParseOptions) -> Vec<Vec<(Vec<u8>, bool)>> {
        let mut reader = reader_with(data, options, 16, 256);
        let mut counter = ScanCounter::default();
        let mut row = CsvRow::new();
        let mut rows = Vec::new();
        loop {
            match reader.next_row(&mut row, &mut counter) {
                Ok(()) => rows.push(
                    row.spans
                        .iter()
                        .map(|span| (reader.field_bytes(span).to_vec(), span.is_escaped()))
                        .collect(),
                ),
                Err(err) if err.is_end_of_stream() => return rows,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
    }

    fn fields(row: &[(Vec<u8>, bool)]) -> Vec<&[u8]> {
        row.iter().map(|(bytes, _)| bytes.as_slice()).collect()
    }

    #[test]
    fn unquoted_fields_stay_in_primary_buffer() {
        let rows = tokenize_all(b"a,b,c\n", enclosure_options());
        assert_eq!(fields(&rows[0]), vec![b"a".as_slice(), b"b", b"c"]);
        assert!(rows[0].iter().all(|(_, escaped)| !escaped));
    }

    #[test]
    fn quoted_field_without_specials_is_zero_copy() {
        let rows = tokenize_all(b"\"a,b\",c\n", enclosure_options());
        assert_eq!(fields(&rows[0]), vec![b"a,b".as_slice(), b"c"]);
        assert!(!rows[0][0].1, "plain quoted field should not be escaped");
    }

    #[test]
    fn doubled_quote_resolves_and_marks_escaped() {
        let rows = tokenize_all(b"\"he said \"\"hi\"\"\",x\n", enclosure_options());
        assert_eq!(rows[0][0].0, b"he said \"hi\"");
        assert!(rows[0][0].1);
        assert!(!rows[0][1].1);
    }

    #[test]
    fn escape_resolves_inside_and_outside_quotes() {
        let rows = tokenize_all(b"a\\,b,\"c\\\"d\"\n", enclosure_options());
        assert_eq!(rows[0][0].0, b"a,b");
        assert!(rows[0][0].1);
        assert_eq!(rows[0][1].0, b"c\"d");
        assert!(rows[0][1].1);
    }

    #[test]
    fn delimiters_inside_quotes_are_literal() {
        let rows = tokenize_all(b"\"a\nb\",\"c,d\"\n", enclosure_options());
        assert_eq!(rows[0][0].0, b"a\nb");
        assert_eq!(rows[0][1].0, b"c,d");
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn quoted_field_spanning_refills_is_intact() {
        // 16-byte initial buffer forces several refills and at least one
        // compaction inside the quoted field.
        let long = "x".repeat(90);
        let data = format!("head,\"{long}\",tail\nnext,r,s\n");
        let rows = tokenize_all(data.as_bytes(), enclosure_options());
        assert_eq!(rows[0][1].0, long.as_bytes());
        assert!(!rows[0][1].1);
        assert_eq!(fields(&rows[1]), vec![b"next".as_slice(), b"r", b"s"]);
    }

    #[test]
    fn unterminated_quote_at_end_of_stream_fails() {
        let mut reader = reader_with(b"a,\"open\n", enclosure_options(), 16, 256);
        let mut counter = ScanCounter::default();
        let mut row = CsvRow::new();
        let err = reader.next_row(&mut row, &mut counter).unwrap_err();
        assert!(matches!(err, ScanError::UnterminatedQuotedField(_)));
    }

    #[test]
    fn blank_row_yields_zero_spans() {
        let rows = tokenize_all(b"\na,b\n", enclosure_options());
        assert!(rows[0].is_empty());
        assert_eq!(fields(&rows[1]), vec![b"a".as_slice(), b"b"]);
    }

    #[test]
    fn empty_fields_are_preserved() {
        let rows = tokenize_all(b",a,\n", enclosure_options());
        assert_eq!(fields(&rows[0]), vec![b"".as_slice(), b"a", b""]);
    }

    #[test]
    fn final_row_without_delimiter_matches_terminated_row() {
        let with = tokenize_all(b"a,\"b\"\n", enclosure_options());
        let without = tokenize_all(b"a,\"b\"", enclosure_options());
        assert_eq!(with, without);
    }

    #[test]
    fn escape_only_mode_without_enclosure() {
        let options = ParseOptions {
            escape: Some(b'\\'),
            ..ParseOptions::default()
        };
        let rows = tokenize_all(b"a\\,b,c\n", options);
        assert_eq!(rows[0][0].0, b"a,b");
        assert_eq!(rows[0][1].0, b"c");
    }

    #[test]
    fn trim_space_applies_around_quotes_and_bare_fields() {
        let options = ParseOptions {
            trim_space: true,
            ..enclosure_options()
        };
        let rows = tokenize_all(b"  \"a b\"  , c ,d  \n", options);
        assert_eq!(rows[0][0].0, b"a b");
        assert!(!rows[0][0].1);
        assert_eq!(rows[0][1].0, b"c");
        assert_eq!(rows[0][2].0, b"d");
    }

    #[test]
    fn content_after_closing_quote_joins_field() {
        let rows = tokenize_all(b"\"ab\"cd,x\n", enclosure_options());
        assert_eq!(rows[0][0].0, b"abcd");
        assert!(rows[0][0].1);
        assert_eq!(rows[0][1].0, b"x");
    }

    #[test]
    fn multi_byte_delimiters_with_quoting() {
        let options = ParseOptions {
            column_delimiter: b"||".to_vec(),
            row_delimiter: b"\r\n".to_vec(),
            enclose: Some(b'"'),
            escape: None,
            ..ParseOptions::default()
        };
        let rows = tokenize_all(b"\"a||b\"||c\r\nd||e\r\n", options);
        assert_eq!(rows[0][0].0, b"a||b");
        assert_eq!(rows[0][1].0, b"c");
        assert_eq!(fields(&rows[1]), vec![b"d".as_slice(), b"e"]);
    }

    #[test]
    fn row_bytes_cover_raw_row_without_delimiter() {
        let mut reader = reader_with(b"a,\"b,c\"\nd\n", enclosure_options(), 32, 256);
        let mut counter = ScanCounter::default();
        let mut row = CsvRow::new();
        reader.next_row(&mut row, &mut counter).unwrap();
        assert_eq!(reader.row_bytes(&row), b"a,\"b,c\"");
    }

    #[test]
    fn unescape_arena_resets_between_rows() {
        let rows = tokenize_all(b"\"a\"\"b\"\n\"c\"\"d\"\n", enclosure_options());
        assert_eq!(rows[0][0].0, b"a\"b");
        assert_eq!(rows[1][0].0, b"c\"d");
    }
}
