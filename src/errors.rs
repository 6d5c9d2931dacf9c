//! Error taxonomy for the scan pipeline.
//!
//! Per-row problems (shape mismatch, invalid UTF-8, strict-mode conversion
//! failure) never surface here; they are counted and reported through the
//! error sink while the scan continues. `ScanError` covers everything that
//! ends a file's scan: normal end of stream, pathological input, source
//! failures, and the Query-context promotion of a row problem to a scan
//! failure.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    /// Normal termination. The message names the exhausted source, or
    /// explains why no records were available (e.g. `skip_header` consumed
    /// the whole file).
    #[error("end of stream: {0}")]
    EndOfStream(String),

    /// `fill` was invoked with no free space left; the caller must consume
    /// buffered records before refilling.
    #[error("buffer exhausted: no free space before refill")]
    BufferExhausted,

    /// A single record exceeds the maximum buffer capacity.
    #[error("record length exceeds buffer limit of {0} bytes")]
    RecordTooLong(usize),

    /// The stream ended inside an open enclosure.
    #[error("unterminated quoted field at end of {0}")]
    UnterminatedQuotedField(String),

    /// A row-level defect promoted to a scan failure (Query context).
    #[error("{0}")]
    DataQuality(String),

    /// The byte source timed out; retryable by the caller.
    #[error("source timed out: {0}")]
    Timeout(String),

    #[error("invalid scan options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ScanError {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ScanError::EndOfStream(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ScanError::Timeout(_))
    }
}
