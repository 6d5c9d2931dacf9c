//! Byte-stream sources feeding the scan buffer.
//!
//! The scanner never touches files directly; it pulls bytes through the
//! [`ByteSource`] trait so callers can hand it plain files, in-memory
//! buffers, or range-positioned streams. A `read` returning zero bytes
//! means the source is exhausted.

use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::Path,
};

use log::debug;

use crate::errors::ScanError;

pub trait ByteSource {
    /// Reads up to `buf.len()` bytes. Returns the byte count actually read;
    /// zero signals end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ScanError>;

    /// Advances past `n` bytes without delivering them.
    fn skip(&mut self, n: u64) -> Result<(), ScanError>;

    /// Stable name for diagnostics, usually the file path.
    fn identity(&self) -> &str;
}

/// A buffered file on the local filesystem.
pub struct FileSource {
    reader: BufReader<File>,
    name: String,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self, ScanError> {
        let file = File::open(path)?;
        debug!("Opened byte source {:?}", path);
        Ok(Self {
            reader: BufReader::new(file),
            name: path.display().to_string(),
        })
    }
}

impl ByteSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ScanError> {
        Ok(self.reader.read(buf)?)
    }

    fn skip(&mut self, n: u64) -> Result<(), ScanError> {
        self.reader.seek(SeekFrom::Current(n as i64))?;
        Ok(())
    }

    fn identity(&self) -> &str {
        &self.name
    }
}

/// An in-memory source, used by unit tests and benches.
pub struct MemorySource {
    data: Vec<u8>,
    offset: usize,
    name: String,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>, name: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            offset: 0,
            name: name.into(),
        }
    }
}

impl ByteSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ScanError> {
        let remaining = self.data.len() - self.offset;
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> Result<(), ScanError> {
        let remaining = (self.data.len() - self.offset) as u64;
        if n > remaining {
            return Err(ScanError::EndOfStream(self.name.clone()));
        }
        self.offset += n as usize;
        Ok(())
    }

    fn identity(&self) -> &str {
        &self.name
    }
}
